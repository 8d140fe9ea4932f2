//! Local activation state machine tests.

use crate::generators::{make_enode, register, Setup};
use crate::harness::{routable_addr, secret};
use enode_active::{ActiveConfig, ActiveEnode, ActiveStatus, ActiveType};
use enode_chain::{CollateralOutput, Signer};
use enode_types::{sha256d, Outpoint, PayScript, COLLATERAL_AMOUNT};

const NOW: i64 = 1_700_000_000;
const TIP: u32 = 200;

fn active_with_config(setup: &Setup, config: ActiveConfig) -> ActiveEnode {
    ActiveEnode::new(
        setup.params.clone(),
        setup.chain.clone(),
        setup.net.clone(),
        setup.wallet.clone(),
        setup.signer.clone(),
        setup.sync.clone(),
        setup.registry.clone(),
        setup.identity.clone(),
        config,
    )
}

fn local_setup() -> (Setup, ActiveEnode, CollateralOutput) {
    let setup = Setup::new(TIP, NOW);
    let service = routable_addr(50, setup.params.mainnet_port);
    setup.net.allow_connect(service);

    // Wallet-held collateral, funded deep enough.
    let collateral_key = secret(40);
    let pubkey = setup.signer.derive_pubkey(&collateral_key).unwrap();
    let outpoint = Outpoint::new(sha256d(b"own-collateral"), 0);
    setup.chain.add_utxo(
        outpoint,
        COLLATERAL_AMOUNT,
        PayScript::pay_to_pubkey(&pubkey),
        TIP - 50,
    );
    let collateral = CollateralOutput {
        outpoint,
        pubkey,
        privkey: collateral_key,
    };
    setup.wallet.fund(collateral.clone());

    let active = active_with_config(
        &setup,
        ActiveConfig {
            is_enode: true,
            listen: true,
            external_address: Some(service),
            enode_key: Some(secret(41)),
        },
    );
    (setup, active, collateral)
}

#[test]
fn waits_for_blockchain_sync() {
    let (setup, active, _) = local_setup();
    setup.chain.set_synced(false);
    active.manage_state(NOW);
    assert_eq!(active.status(), ActiveStatus::SyncInProcess);
    assert!(!active.pinger_enabled());
}

#[test]
fn local_activation_announces_and_starts() {
    let (setup, active, collateral) = local_setup();
    setup.finish_sync(NOW - 600);

    active.manage_state(NOW);

    assert_eq!(active.active_type(), ActiveType::Local);
    assert_eq!(active.status(), ActiveStatus::Started);
    assert!(active.pinger_enabled());

    // The announce landed in the registry and was relayed.
    let record = setup
        .registry
        .get(&collateral.outpoint)
        .expect("own record registered");
    assert_eq!(record.collateral_pubkey, collateral.pubkey);
    assert!(!setup.net.relayed.read().is_empty());

    // The coin is locked and the identity cell is filled.
    assert_eq!(setup.wallet.locked_coins.read()[0], collateral.outpoint);
    assert_eq!(setup.identity.outpoint(), Some(collateral.outpoint));

    // A later tick finds the record in the registry and stays started.
    setup.registry.check(NOW + 30);
    active.manage_state(NOW + 30);
    assert_eq!(active.status(), ActiveStatus::Started);
}

#[test]
fn fresh_collateral_is_input_too_new() {
    let (setup, active, collateral) = local_setup();
    setup.finish_sync(NOW - 600);

    // Re-fund the collateral right at the tip.
    setup.chain.add_utxo(
        collateral.outpoint,
        COLLATERAL_AMOUNT,
        PayScript::pay_to_pubkey(&collateral.pubkey),
        TIP,
    );

    active.manage_state(NOW);
    assert_eq!(active.status(), ActiveStatus::InputTooNew);
    assert!(!active.pinger_enabled());
}

#[test]
fn no_listen_is_not_capable() {
    let setup = Setup::new(TIP, NOW);
    let active = active_with_config(
        &setup,
        ActiveConfig {
            is_enode: true,
            listen: false,
            external_address: Some(routable_addr(50, setup.params.mainnet_port)),
            enode_key: Some(secret(41)),
        },
    );
    active.manage_state(NOW);
    assert_eq!(active.status(), ActiveStatus::NotCapable);
    assert!(active.status_text().contains("accept connections"));
}

#[test]
fn wrong_port_is_not_capable() {
    let setup = Setup::new(TIP, NOW);
    let active = active_with_config(
        &setup,
        ActiveConfig {
            is_enode: true,
            listen: true,
            external_address: Some(routable_addr(50, 12_345)),
            enode_key: Some(secret(41)),
        },
    );
    active.manage_state(NOW);
    assert_eq!(active.status(), ActiveStatus::NotCapable);
    assert!(active.status_text().contains("Invalid port"));
}

#[test]
fn remote_activation_adopts_the_network_record() {
    let setup = Setup::new(TIP, NOW);
    setup.finish_sync(NOW - 600);

    // The operator's announce already circulates; our wallet is empty.
    let mn = make_enode(&setup, 1, NOW);
    register(&setup, &mn, NOW);
    setup.registry.check(NOW);

    let service = mn.announce.addr;
    setup.net.allow_connect(service);
    let active = active_with_config(
        &setup,
        ActiveConfig {
            is_enode: true,
            listen: true,
            external_address: Some(service),
            enode_key: Some(mn.enode_key.clone()),
        },
    );

    active.manage_state(NOW);
    assert_eq!(active.active_type(), ActiveType::Remote);
    assert_eq!(active.status(), ActiveStatus::Started);
    assert_eq!(setup.identity.outpoint(), Some(mn.outpoint()));
}

#[test]
fn remote_without_a_record_is_not_capable() {
    let setup = Setup::new(TIP, NOW);
    setup.finish_sync(NOW - 600);
    let service = routable_addr(50, setup.params.mainnet_port);
    setup.net.allow_connect(service);

    let active = active_with_config(
        &setup,
        ActiveConfig {
            is_enode: true,
            listen: true,
            external_address: Some(service),
            enode_key: Some(secret(41)),
        },
    );
    active.manage_state(NOW);
    assert_eq!(active.active_type(), ActiveType::Remote);
    assert_eq!(active.status(), ActiveStatus::NotCapable);
    assert!(active.status_text().contains("not in enode list"));
}

#[test]
fn pinger_refreshes_the_own_record() {
    let (setup, active, collateral) = local_setup();
    setup.finish_sync(NOW - 600);
    active.manage_state(NOW);
    assert_eq!(active.status(), ActiveStatus::Started);

    let first_ping = setup
        .registry
        .get(&collateral.outpoint)
        .unwrap()
        .last_ping
        .sig_time;

    // Too early: the ping interval has not passed.
    assert!(!active.send_ping(NOW + 60));

    // Past the interval a new ping lands in the registry.
    assert!(active.send_ping(NOW + 11 * 60));
    let second_ping = setup
        .registry
        .get(&collateral.outpoint)
        .unwrap()
        .last_ping
        .sig_time;
    assert!(second_ping > first_ping);
}
