//! Payment vote pipeline and coinbase validation tests.

use crate::generators::{make_enode, register, Setup, TestEnode};
use crate::harness::routable_addr;
use enode_chain::{CoinbaseOutputs, PeerId, TxOut};
use enode_messages::PaymentVote;
use enode_types::{hash160, PayScript};

const NOW: i64 = 1_700_000_000;
const TIP: u32 = 200;
const VOTE_HEIGHT: u32 = 210;

struct VoteWorld {
    setup: Setup,
    voters: Vec<TestEnode>,
    peer: PeerId,
}

fn world(voter_count: u8) -> VoteWorld {
    let setup = Setup::new(TIP, NOW);
    let peer = setup.net.add_peer(routable_addr(250, 45_000));
    setup.finish_sync(NOW - 600);

    let mut voters = Vec::new();
    for tag in 1..=voter_count {
        let mn = make_enode(&setup, tag, NOW);
        register(&setup, &mn, NOW);
        voters.push(mn);
    }
    setup.registry.check(NOW);
    VoteWorld {
        setup,
        voters,
        peer,
    }
}

fn signed_vote(world: &VoteWorld, voter: &TestEnode, payee: &PayScript) -> PaymentVote {
    let mut vote = PaymentVote::new(voter.outpoint(), VOTE_HEIGHT, payee.clone());
    vote.sign(&*world.setup.signer, &voter.enode_key).unwrap();
    vote
}

#[test]
fn identical_vote_is_counted_once() {
    let world = world(3);
    let payee = PayScript::pay_to_key_id(&hash160(b"payee-p"));

    for voter in &world.voters {
        let vote = signed_vote(&world, voter, &payee);
        let (accepted, dos) = world.setup.payments.handle_vote(&world.peer, vote, NOW);
        assert!(accepted);
        assert_eq!(dos, 0);
    }
    assert_eq!(world.setup.payments.vote_count(), 3);

    // The fourth copy of an existing vote changes nothing.
    let repeat = signed_vote(&world, &world.voters[0], &payee);
    let (accepted, _) = world.setup.payments.handle_vote(&world.peer, repeat, NOW);
    assert!(!accepted);
    assert_eq!(world.setup.payments.vote_count(), 3);
    assert_eq!(
        world.setup.payments.get_block_payee(VOTE_HEIGHT),
        Some(payee)
    );
}

#[test]
fn one_vote_per_voter_and_height() {
    let world = world(1);
    let p = PayScript::pay_to_key_id(&hash160(b"payee-p"));
    let q = PayScript::pay_to_key_id(&hash160(b"payee-q"));

    let first = signed_vote(&world, &world.voters[0], &p);
    let (accepted, _) = world.setup.payments.handle_vote(&world.peer, first, NOW);
    assert!(accepted);

    // Different payee, same voter and height: a double vote.
    let second = signed_vote(&world, &world.voters[0], &q);
    let (accepted, _) = world.setup.payments.handle_vote(&world.peer, second, NOW);
    assert!(!accepted);
    assert_eq!(world.setup.payments.vote_count(), 2); // parked unverified copy
    assert_eq!(world.setup.payments.get_block_payee(VOTE_HEIGHT), Some(p));
}

#[test]
fn best_payee_and_coinbase_validation() {
    let world = world(7);
    let p = PayScript::pay_to_key_id(&hash160(b"payee-p"));
    let q = PayScript::pay_to_key_id(&hash160(b"payee-q"));

    // Six votes for P push it past the enforcement threshold; one for Q.
    for voter in &world.voters[..6] {
        let vote = signed_vote(&world, voter, &p);
        assert!(world.setup.payments.handle_vote(&world.peer, vote, NOW).0);
    }
    let vote = signed_vote(&world, &world.voters[6], &q);
    assert!(world.setup.payments.handle_vote(&world.peer, vote, NOW).0);

    assert_eq!(world.setup.payments.get_block_payee(VOTE_HEIGHT), Some(p.clone()));

    let total = 100 * enode_types::COIN;
    let payment = world.setup.params.enode_payment(VOTE_HEIGHT, total);
    let coinbase_to = |script: &PayScript| CoinbaseOutputs {
        total_value: total,
        outputs: vec![
            TxOut {
                value: total - payment,
                script: PayScript::pay_to_key_id(&hash160(b"miner")),
            },
            TxOut {
                value: payment,
                script: script.clone(),
            },
        ],
    };

    assert!(world
        .setup
        .payments
        .is_transaction_valid(&coinbase_to(&p), VOTE_HEIGHT));
    assert!(!world
        .setup
        .payments
        .is_transaction_valid(&coinbase_to(&q), VOTE_HEIGHT));
}

#[test]
fn votes_out_of_range_are_dropped() {
    let world = world(1);
    let payee = PayScript::pay_to_key_id(&hash160(b"payee-p"));

    let mut too_far = PaymentVote::new(world.voters[0].outpoint(), TIP + 21, payee.clone());
    too_far
        .sign(&*world.setup.signer, &world.voters[0].enode_key)
        .unwrap();
    let (accepted, dos) = world.setup.payments.handle_vote(&world.peer, too_far, NOW);
    assert!(!accepted);
    assert_eq!(dos, 0);

    // Right at the future edge is fine.
    let mut at_edge = PaymentVote::new(world.voters[0].outpoint(), TIP + 20, payee);
    at_edge
        .sign(&*world.setup.signer, &world.voters[0].enode_key)
        .unwrap();
    let (accepted, _) = world.setup.payments.handle_vote(&world.peer, at_edge, NOW);
    assert!(accepted);
}

#[test]
fn bad_signature_is_penalized_only_for_future_votes_when_synced() {
    let world = world(2);
    let payee = PayScript::pay_to_key_id(&hash160(b"payee-p"));

    // Signed by the wrong key.
    let mut forged = PaymentVote::new(world.voters[0].outpoint(), VOTE_HEIGHT, payee);
    forged
        .sign(&*world.setup.signer, &world.voters[1].enode_key)
        .unwrap();
    let (accepted, dos) = world.setup.payments.handle_vote(&world.peer, forged, NOW);
    assert!(!accepted);
    // Synced and the height is in the future: penalize.
    assert_eq!(dos, 20);
}

#[test]
fn unknown_voter_triggers_an_ask() {
    let world = world(1);
    let payee = PayScript::pay_to_key_id(&hash160(b"payee-p"));

    let stranger = Setup::new(TIP, NOW);
    let ghost = make_enode(&stranger, 9, NOW);
    let vote = {
        let mut vote = PaymentVote::new(ghost.outpoint(), VOTE_HEIGHT, payee);
        vote.sign(&*world.setup.signer, &ghost.enode_key).unwrap();
        vote
    };

    let before = world.setup.net.commands_to(&world.peer).len();
    let (accepted, dos) = world.setup.payments.handle_vote(&world.peer, vote, NOW);
    assert!(!accepted);
    assert_eq!(dos, 0);
    // The registry asked the sender for the missing entry.
    let after = world.setup.net.commands_to(&world.peer);
    assert!(after.len() > before);
    assert_eq!(*after.last().unwrap(), "dseg");
}

#[test]
fn fill_block_payee_falls_back_to_local_election() {
    let world = world(3);
    let payment = 30 * enode_types::COIN;

    // No votes for this height yet: local election decides.
    let (payee, amount) = world
        .setup
        .payments
        .fill_block_payee(TIP + 1, payment, NOW)
        .expect("a payee");
    assert_eq!(amount, payment);
    assert!(world
        .voters
        .iter()
        .any(|voter| voter.payee() == payee));
}

#[test]
fn block_value_validation_sets_reason() {
    let world = world(1);
    let (ok, reason) = world.setup.payments.is_block_value_valid(100, 300, 100);
    assert!(ok);
    assert!(reason.is_empty());

    let (ok, reason) = world.setup.payments.is_block_value_valid(101, 300, 100);
    assert!(!ok);
    assert!(reason.contains("pays too much"));
}

#[test]
fn vote_history_is_pruned_to_the_storage_window() {
    let world = world(1);
    let payee = PayScript::pay_to_key_id(&hash160(b"payee-p"));

    let vote = signed_vote(&world, &world.voters[0], &payee);
    assert!(world.setup.payments.handle_vote(&world.peer, vote, NOW).0);
    assert_eq!(world.setup.payments.block_count(), 1);

    // Jump far past the storage window.
    let far = TIP + world.setup.payments.storage_limit() as u32 + VOTE_HEIGHT;
    world.setup.chain.set_tip(far);
    world.setup.payments.updated_block_tip(far, NOW);
    world.setup.payments.check_and_remove();
    assert_eq!(world.setup.payments.block_count(), 0);
    assert_eq!(world.setup.payments.vote_count(), 0);
}
