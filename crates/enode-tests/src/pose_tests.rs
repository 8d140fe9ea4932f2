//! Proof-of-service verification tests.

use crate::generators::{make_enode, make_enode_at, register, Setup};
use crate::harness::{block_hash, routable_addr};
use enode_messages::Verify;
use enode_registry::EnodeState;
use enode_types::POSE_BAN_MAX_SCORE;

const NOW: i64 = 1_700_000_000;
const TIP: u32 = 200;

fn shared_addr(setup: &Setup) -> enode_types::NetAddr {
    routable_addr(77, setup.params.mainnet_port)
}

#[test]
fn same_addr_clusters_converge_to_a_ban() {
    let setup = Setup::new(TIP, NOW);
    setup.finish_sync(NOW - 600);

    // The verified node first so one pass reaches the whole cluster.
    // Announces matching the local operating key get pinned verified,
    // which is exactly the state this test needs.
    let addr = shared_addr(&setup);
    let verified = make_enode_at(&setup, 1, addr, NOW);
    setup.identity.set(enode_chain::ActiveIdentity {
        outpoint: enode_types::Outpoint::default(),
        addr,
        enode_pubkey: verified.announce.enode_pubkey,
        enode_key: verified.enode_key.clone(),
    });
    register(&setup, &verified, NOW);
    setup.identity.clear();
    assert!(setup
        .registry
        .get(&verified.outpoint())
        .unwrap()
        .is_pose_verified());

    let mut dupes = Vec::new();
    for tag in 2..5 {
        let mn = make_enode_at(&setup, tag, addr, NOW);
        register(&setup, &mn, NOW);
        dupes.push(mn);
    }
    setup.registry.check(NOW);

    // One pass bumps every duplicate by one.
    setup.registry.check_same_addr();
    for mn in &dupes {
        assert_eq!(setup.registry.get(&mn.outpoint()).unwrap().pose_ban_score, 1);
    }
    assert!(setup
        .registry
        .get(&verified.outpoint())
        .unwrap()
        .is_pose_verified());

    // Four more passes reach the ban threshold.
    for _ in 0..4 {
        setup.registry.check_same_addr();
    }
    setup.registry.check(NOW + 10);
    for mn in &dupes {
        let record = setup.registry.get(&mn.outpoint()).unwrap();
        assert_eq!(record.pose_ban_score, POSE_BAN_MAX_SCORE);
        assert_eq!(record.state, EnodeState::PoSeBan);
        assert!(record.pose_ban_height > TIP);
    }
    // The verified node is untouched.
    assert_eq!(
        setup.registry.get(&verified.outpoint()).unwrap().state,
        EnodeState::Enabled
    );
}

#[test]
fn ambiguous_clusters_are_left_alone() {
    let setup = Setup::new(TIP, NOW);
    setup.finish_sync(NOW - 600);

    let addr = shared_addr(&setup);
    for tag in 1..4 {
        let mn = make_enode_at(&setup, tag, addr, NOW);
        register(&setup, &mn, NOW);
    }
    setup.registry.check(NOW);

    // Nobody is verified: nobody gets banned.
    setup.registry.check_same_addr();
    for mn in setup.registry.all() {
        assert_eq!(mn.pose_ban_score, 0);
    }
}

#[test]
fn verify_request_gets_a_signed_reply_from_an_enode() {
    let setup = Setup::new(TIP, NOW);
    setup.finish_sync(NOW - 600);
    let me = make_enode(&setup, 1, NOW);
    register(&setup, &me, NOW);
    setup.registry.check(NOW);

    // Act as the enode under challenge.
    setup.identity.set(enode_chain::ActiveIdentity {
        outpoint: me.outpoint(),
        addr: me.announce.addr,
        enode_pubkey: me.announce.enode_pubkey,
        enode_key: me.enode_key.clone(),
    });

    let challenger = setup.net.add_peer(routable_addr(90, 33_000));
    let mnv = Verify::request(me.announce.addr, 4242, TIP - 1);
    let (accepted, dos) = setup.registry.handle_verify(&challenger, mnv, NOW);
    assert!(accepted);
    assert_eq!(dos, 0);

    // The reply went back with sig1 filled in and verifiable.
    let sent = setup.net.sent.read();
    let reply_bytes = &sent
        .iter()
        .rfind(|msg| msg.command == "mnverify")
        .expect("a verify reply")
        .payload;
    let reply = Verify::from_bytes(reply_bytes).unwrap();
    assert!(reply.is_reply());
    reply
        .verify_reply_sig(
            &*setup.signer,
            &me.announce.enode_pubkey,
            &block_hash(TIP - 1),
        )
        .unwrap();

    // A repeat challenge inside the window is penalized.
    let again = Verify::request(me.announce.addr, 4243, TIP - 1);
    let (accepted, dos) = setup.registry.handle_verify(&challenger, again, NOW + 1);
    assert!(!accepted);
    assert_eq!(dos, 20);
}

#[test]
fn verify_broadcast_clears_the_real_node_and_bumps_the_rest() {
    let setup = Setup::new(TIP, NOW);
    setup.finish_sync(NOW - 600);

    let addr = shared_addr(&setup);
    let real = make_enode_at(&setup, 1, addr, NOW);
    let fake1 = make_enode_at(&setup, 2, addr, NOW);
    let fake2 = make_enode_at(&setup, 3, addr, NOW);
    let verifier = make_enode(&setup, 4, NOW);
    for mn in [&real, &fake1, &fake2, &verifier] {
        register(&setup, mn, NOW);
    }
    setup.registry.check(NOW);

    let ranking_hash = block_hash(TIP - 1);
    let mut mnv = Verify::request(addr, 777, TIP - 1);
    mnv.outpoint1 = real.outpoint();
    mnv.outpoint2 = verifier.outpoint();
    mnv.sign_reply(&*setup.signer, &real.enode_key, &ranking_hash)
        .unwrap();
    mnv.sign_broadcast(&*setup.signer, &verifier.enode_key, &ranking_hash)
        .unwrap();

    let gossiper = setup.net.add_peer(routable_addr(91, 33_100));
    let (accepted, dos) = setup.registry.handle_verify(&gossiper, mnv.clone(), NOW);
    assert!(accepted, "broadcast rejected (dos={dos})");

    assert_eq!(
        setup.registry.get(&real.outpoint()).unwrap().pose_ban_score,
        -1
    );
    assert_eq!(setup.registry.get(&fake1.outpoint()).unwrap().pose_ban_score, 1);
    assert_eq!(setup.registry.get(&fake2.outpoint()).unwrap().pose_ban_score, 1);
    // The verifier itself is untouched.
    assert_eq!(
        setup
            .registry
            .get(&verifier.outpoint())
            .unwrap()
            .pose_ban_score,
        0
    );

    // Replays are idempotent.
    let (accepted, _) = setup.registry.handle_verify(&gossiper, mnv, NOW + 1);
    assert!(accepted);
    assert_eq!(setup.registry.get(&fake1.outpoint()).unwrap().pose_ban_score, 1);
}

#[test]
fn self_verification_broadcast_is_a_bannable_offense() {
    let setup = Setup::new(TIP, NOW);
    setup.finish_sync(NOW - 600);
    let mn = make_enode(&setup, 1, NOW);
    register(&setup, &mn, NOW);
    setup.registry.check(NOW);

    let mut mnv = Verify::request(mn.announce.addr, 5, TIP - 1);
    mnv.outpoint1 = mn.outpoint();
    mnv.outpoint2 = mn.outpoint();
    mnv.sig1 = vec![1; 65];
    mnv.sig2 = vec![2; 65];

    let gossiper = setup.net.add_peer(routable_addr(91, 33_100));
    let (accepted, dos) = setup.registry.handle_verify(&gossiper, mnv, NOW);
    assert!(!accepted);
    assert_eq!(dos, 100);
}

#[test]
fn forged_broadcast_signatures_change_nothing() {
    let setup = Setup::new(TIP, NOW);
    setup.finish_sync(NOW - 600);

    let addr = shared_addr(&setup);
    let real = make_enode_at(&setup, 1, addr, NOW);
    let fake = make_enode_at(&setup, 2, addr, NOW);
    let verifier = make_enode(&setup, 3, NOW);
    for mn in [&real, &fake, &verifier] {
        register(&setup, mn, NOW);
    }
    setup.registry.check(NOW);

    let mut mnv = Verify::request(addr, 8, TIP - 1);
    mnv.outpoint1 = real.outpoint();
    mnv.outpoint2 = verifier.outpoint();
    mnv.sig1 = vec![3; 65];
    mnv.sig2 = vec![4; 65];

    let gossiper = setup.net.add_peer(routable_addr(91, 33_100));
    let (accepted, _) = setup.registry.handle_verify(&gossiper, mnv, NOW);
    assert!(!accepted);
    assert_eq!(setup.registry.get(&real.outpoint()).unwrap().pose_ban_score, 0);
    assert_eq!(setup.registry.get(&fake.outpoint()).unwrap().pose_ban_score, 0);
}
