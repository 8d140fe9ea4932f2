//! Service wiring and dispatch tests.

use crate::generators::{make_enode, Setup};
use crate::harness::{routable_addr, secret, MockChain, MockNet, MockWallet};
use enode_active::ActiveConfig;
use enode_chain::EcdsaSigner;
use enode_node::{NodeConfig, Services};
use enode_types::NetworkParams;
use std::sync::Arc;

const NOW: i64 = 1_700_000_000;
const TIP: u32 = 200;

fn services(dir: &std::path::Path) -> (Arc<Services>, Arc<MockChain>, Arc<MockNet>) {
    let chain = Arc::new(MockChain::new(TIP, NOW));
    let net = Arc::new(MockNet::new());
    let wallet = Arc::new(MockWallet::new());
    let signer = Arc::new(EcdsaSigner::new());
    let config = NodeConfig {
        params: NetworkParams::mainnet(),
        data_dir: dir.to_path_buf(),
        active: ActiveConfig {
            is_enode: false,
            listen: true,
            external_address: None,
            enode_key: Some(secret(41)),
        },
    };
    let services = Services::new(config, chain.clone(), net.clone(), wallet, signer);
    (services, chain, net)
}

#[test]
fn announce_flows_through_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let (services, chain, net) = services(dir.path());

    // Borrow a valid announce from a separately wired setup that
    // shares the deterministic chain contents.
    let donor = Setup::new(TIP, NOW);
    let mn = make_enode(&donor, 1, NOW);
    // Mirror the collateral on the services' chain.
    chain.add_utxo(
        mn.outpoint(),
        enode_types::COLLATERAL_AMOUNT,
        mn.payee(),
        1,
    );

    let peer = net.add_peer(routable_addr(99, 33_000));
    services.handle_message(&peer, "mnannounce", &mn.announce.to_bytes());

    assert!(services.registry.has(&mn.outpoint()));
    assert_eq!(net.misbehavior_of(&peer), 0);
}

#[test]
fn malformed_payloads_are_penalized() {
    let dir = tempfile::tempdir().unwrap();
    let (services, _chain, net) = services(dir.path());

    let peer = net.add_peer(routable_addr(99, 33_000));
    services.handle_message(&peer, "mnannounce", b"garbage");
    assert_eq!(net.misbehavior_of(&peer), 100);

    // Unknown commands are not ours to punish.
    services.handle_message(&peer, "headers", b"whatever");
    assert_eq!(net.misbehavior_of(&peer), 100);
}

#[test]
fn messages_are_deferred_until_blockchain_sync() {
    let dir = tempfile::tempdir().unwrap();
    let (services, chain, net) = services(dir.path());
    chain.set_synced(false);

    let peer = net.add_peer(routable_addr(99, 33_000));
    services.handle_message(&peer, "mnannounce", b"garbage");
    // Not even decoded, so no penalty either.
    assert_eq!(net.misbehavior_of(&peer), 0);
}

#[test]
fn sync_tick_drives_asset_requests() {
    let dir = tempfile::tempdir().unwrap();
    let (services, _chain, net) = services(dir.path());
    for tag in 1..4 {
        net.add_peer(routable_addr(tag, 30_000 + tag as u16));
    }

    // First tick asks for sporks.
    services.sync_tick();
    let sporks_asks = net
        .sent
        .read()
        .iter()
        .filter(|msg| msg.command == "getsporks")
        .count();
    assert_eq!(sporks_asks, 3);

    // Next tick moves on to the registry list.
    services.sync_tick();
    let list_asks = net
        .sent
        .read()
        .iter()
        .filter(|msg| msg.command == "dseg")
        .count();
    assert_eq!(list_asks, 3);
}

#[test]
fn tip_notifications_fan_out() {
    let dir = tempfile::tempdir().unwrap();
    let (services, chain, _net) = services(dir.path());

    chain.set_tip(TIP + 1);
    services.updated_block_tip(TIP + 1);
    assert_eq!(services.registry.tip_height(), Some(TIP + 1));
}

#[test]
fn caches_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let (services, chain, _net) = services(dir.path());

    let donor = Setup::new(TIP, NOW);
    let mn = make_enode(&donor, 1, NOW);
    chain.add_utxo(
        mn.outpoint(),
        enode_types::COLLATERAL_AMOUNT,
        mn.payee(),
        1,
    );
    let now = NOW;
    let (accepted, _) = services.registry.check_and_update(None, &mn.announce, false, now);
    assert!(accepted);
    services.save_caches();

    let (restored, _, _) = self::services(dir.path());
    restored.load_caches();
    assert!(restored.registry.has(&mn.outpoint()));
}
