//! Test data builders wired against the mock host.

use crate::harness::{block_hash, routable_addr, secret, MockChain, MockNet, MockWallet};
use enode_chain::{Chain, EcdsaSigner, SharedIdentity, Signer, SporkSet};
use enode_messages::{Announce, Ping};
use enode_payments::PaymentEngine;
use enode_registry::EnodeRegistry;
use enode_sync::SyncManager;
use enode_types::{
    params::PROTOCOL_VERSION, sha256d, NetworkParams, Outpoint, PayScript, SecretKey,
    COLLATERAL_AMOUNT,
};
use std::sync::Arc;

/// Fully wired subsystem over the mock host.
pub struct Setup {
    pub params: NetworkParams,
    pub chain: Arc<MockChain>,
    pub net: Arc<MockNet>,
    pub wallet: Arc<MockWallet>,
    pub signer: Arc<EcdsaSigner>,
    pub sporks: Arc<SporkSet>,
    pub sync: Arc<SyncManager>,
    pub identity: SharedIdentity,
    pub registry: Arc<EnodeRegistry>,
    pub payments: Arc<PaymentEngine>,
}

impl Setup {
    /// Mainnet wiring with a mock chain at `tip` and clock at `now`.
    pub fn new(tip: u32, now: i64) -> Self {
        let params = NetworkParams::mainnet();
        let chain = Arc::new(MockChain::new(tip, now));
        let net = Arc::new(MockNet::new());
        let wallet = Arc::new(MockWallet::new());
        let signer = Arc::new(EcdsaSigner::new());
        let sporks = Arc::new(SporkSet::new());
        let sync = Arc::new(SyncManager::new());
        let identity = SharedIdentity::new();
        let registry = Arc::new(EnodeRegistry::new(
            params.clone(),
            chain.clone(),
            net.clone(),
            signer.clone(),
            sporks.clone(),
            sync.clone(),
            identity.clone(),
        ));
        let payments = Arc::new(PaymentEngine::new(
            params.clone(),
            chain.clone(),
            net.clone(),
            signer.clone(),
            sporks.clone(),
            sync.clone(),
            registry.clone(),
            identity.clone(),
        ));
        registry.updated_block_tip(tip);
        payments.updated_block_tip(tip, now);
        Self {
            params,
            chain,
            net,
            wallet,
            signer,
            sporks,
            sync,
            identity,
            registry,
            payments,
        }
    }

    /// Drive the sync machine to `Finished` using three scratch peers.
    pub fn finish_sync(&self, now: i64) {
        for tag in 200..203 {
            self.net.add_peer(routable_addr(tag, 40_000 + tag as u16));
        }
        crate::harness::sync_to_finished(&self.sync, &self.net, now);
    }
}

/// One test enode's keys and announcement.
pub struct TestEnode {
    pub announce: Announce,
    pub collateral_key: SecretKey,
    pub enode_key: SecretKey,
}

impl TestEnode {
    /// The registry key.
    pub fn outpoint(&self) -> Outpoint {
        self.announce.outpoint
    }

    /// The script this enode gets paid to.
    pub fn payee(&self) -> PayScript {
        PayScript::pay_to_pubkey(&self.announce.collateral_pubkey)
    }
}

/// Build a fully valid enode announce and back it with mock-chain
/// collateral. `tag` seeds the keys and outpoint, `now` stamps the
/// signatures: the announce is aged past the pre-enable window and the
/// ping is one minute old.
pub fn make_enode(setup: &Setup, tag: u8, now: i64) -> TestEnode {
    make_enode_at(setup, tag, routable_addr(tag, setup.params.mainnet_port), now)
}

/// Like [`make_enode`] with an explicit address.
pub fn make_enode_at(
    setup: &Setup,
    tag: u8,
    addr: enode_types::NetAddr,
    now: i64,
) -> TestEnode {
    let collateral_key = secret(tag);
    let enode_key = secret(tag.wrapping_add(100).max(1));
    let collateral_pubkey = setup.signer.derive_pubkey(&collateral_key).unwrap();
    let enode_pubkey = setup.signer.derive_pubkey(&enode_key).unwrap();
    let outpoint = Outpoint::new(sha256d(&[tag, 0x77]), 0);

    setup.chain.add_utxo(
        outpoint,
        COLLATERAL_AMOUNT,
        PayScript::pay_to_pubkey(&collateral_pubkey),
        1,
    );

    let tip = setup.chain.tip_height().unwrap();
    let mut ping = Ping {
        outpoint,
        block_hash: block_hash(tip - Ping::BLOCK_DEPTH),
        sig_time: 0,
        sig: Vec::new(),
    };
    ping.sign(&*setup.signer, &enode_key, now - 60).unwrap();

    let mut announce = Announce {
        outpoint,
        addr,
        collateral_pubkey,
        enode_pubkey,
        sig: Vec::new(),
        sig_time: 0,
        protocol_version: PROTOCOL_VERSION,
        last_ping: ping,
    };
    announce
        .sign(&*setup.signer, &collateral_key, now - 3600)
        .unwrap();

    TestEnode {
        announce,
        collateral_key,
        enode_key,
    }
}

/// Push an announce through the full validation pipeline and assert it
/// was accepted.
pub fn register(setup: &Setup, enode: &TestEnode, now: i64) {
    let (accepted, dos) = setup
        .registry
        .check_and_update(None, &enode.announce, false, now);
    assert!(accepted, "test announce rejected (dos={dos})");
    setup.registry.check_enode(&enode.outpoint(), true, now);
}
