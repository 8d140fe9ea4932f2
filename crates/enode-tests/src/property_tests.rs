//! Property-based invariants over the registry and vote store.

use crate::generators::{make_enode, register, Setup};
use crate::harness::routable_addr;
use enode_chain::{CoinbaseOutputs, TxOut};
use enode_messages::{wire, PaymentVote};
use enode_types::{
    hash160, score_distance, sha256d, Hash256, Outpoint, PayScript,
    PAYMENT_SIGNATURES_REQUIRED,
};
use proptest::prelude::*;

const NOW: i64 = 1_700_000_000;
const TIP: u32 = 200;

fn arb_outpoint() -> impl Strategy<Value = Outpoint> {
    (prop::array::uniform32(any::<u8>()), 0u32..4)
        .prop_map(|(bytes, index)| Outpoint::new(Hash256::from_bytes(bytes), index))
}

fn arb_block_hash() -> impl Strategy<Value = Hash256> {
    prop::array::uniform32(any::<u8>()).prop_map(Hash256::from_bytes)
}

proptest! {
    /// Scores survive outpoint re-serialization bit-exactly.
    #[test]
    fn score_is_invariant_under_reserialization(
        outpoint in arb_outpoint(),
        block_hash in arb_block_hash(),
    ) {
        let direct = score_distance(&outpoint, &block_hash);

        let mut w = wire::Writer::new();
        w.write_outpoint_input(&outpoint);
        let bytes = w.into_bytes();
        let mut r = wire::Reader::new(&bytes);
        let reparsed = r.read_outpoint_input().unwrap();

        prop_assert_eq!(direct, score_distance(&reparsed, &block_hash));
    }

    /// The distance is symmetric in its two hash arguments by
    /// construction, and never depends on evaluation order.
    #[test]
    fn score_is_deterministic(
        outpoint in arb_outpoint(),
        block_hash in arb_block_hash(),
    ) {
        prop_assert_eq!(
            score_distance(&outpoint, &block_hash),
            score_distance(&outpoint, &block_hash)
        );
    }

    /// Registry outpoints stay unique under arbitrary add sequences.
    #[test]
    fn registry_outpoints_are_unique(tags in prop::collection::vec(1u8..30, 1..20)) {
        let setup = Setup::new(TIP, NOW);
        for tag in tags {
            let mn = make_enode(&setup, tag, NOW);
            // Duplicate tags produce duplicate outpoints; the registry
            // must swallow them.
            setup.registry.check_and_update(None, &mn.announce, false, NOW);
        }
        let all = setup.registry.all();
        let mut outpoints: Vec<Outpoint> = all.iter().map(|mn| mn.outpoint).collect();
        outpoints.sort();
        outpoints.dedup();
        prop_assert_eq!(outpoints.len(), all.len());
    }

    /// Accepted updates never lower a record's sig_time without the
    /// recovery override.
    #[test]
    fn sig_time_is_monotone(deltas in prop::collection::vec(-600i64..600, 1..10)) {
        let setup = Setup::new(TIP, NOW);
        let mn = make_enode(&setup, 1, NOW);
        register(&setup, &mn, NOW);

        let mut highest = setup.registry.get(&mn.outpoint()).unwrap().sig_time;
        for (i, delta) in deltas.into_iter().enumerate() {
            let mut update = mn.announce.clone();
            // Space updates out so the announce throttle never hides
            // a regression.
            let at = NOW - 3600 + (i as i64 + 1) * 700 + delta;
            update
                .sign(&*setup.signer, &mn.collateral_key, at)
                .unwrap();
            setup
                .registry
                .check_and_update(None, &update, false, NOW + (i as i64 + 1) * 400);

            let held = setup.registry.get(&mn.outpoint()).unwrap().sig_time;
            prop_assert!(held >= highest, "sig_time regressed: {held} < {highest}");
            highest = highest.max(held);
        }
    }

    /// Feeding the same vote repeatedly leaves exactly one tally entry.
    #[test]
    fn vote_processing_is_idempotent(repeats in 2usize..6) {
        let setup = Setup::new(TIP, NOW);
        let peer = setup.net.add_peer(routable_addr(250, 45_000));
        setup.finish_sync(NOW - 600);

        let voter = make_enode(&setup, 1, NOW);
        register(&setup, &voter, NOW);
        setup.registry.check(NOW);

        let mut vote = PaymentVote::new(
            voter.outpoint(),
            210,
            PayScript::pay_to_key_id(&hash160(b"payee")),
        );
        vote.sign(&*setup.signer, &voter.enode_key).unwrap();

        for _ in 0..repeats {
            setup.payments.handle_vote(&peer, vote.clone(), NOW);
        }
        prop_assert_eq!(setup.payments.vote_count(), 1);
        prop_assert_eq!(setup.payments.get_block_payee(210), Some(vote.payee.clone()));
    }

    /// If a coinbase passes validation while some payee holds six or
    /// more votes, the coinbase must contain that exact payment.
    #[test]
    fn coinbase_validator_is_sound(
        vote_splits in prop::collection::vec(1usize..8, 1..4),
        pay_first in any::<bool>(),
    ) {
        let mut payees = enode_payments::BlockPayees::new(210);
        for (which, count) in vote_splits.iter().enumerate() {
            let script = PayScript::pay_to_key_id(&hash160(&[which as u8 + 1]));
            for voter in 0..*count {
                let vote = PaymentVote::new(
                    Outpoint::new(sha256d(&[which as u8, voter as u8]), 0),
                    210,
                    script.clone(),
                );
                payees.add_vote(&vote);
            }
        }

        let paid_script = PayScript::pay_to_key_id(&hash160(&[if pay_first { 1 } else { 2 }]));
        let payment = 30u64;
        let coinbase = CoinbaseOutputs {
            total_value: 100,
            outputs: vec![TxOut { value: payment, script: paid_script.clone() }],
        };

        let accepted = payees.is_transaction_valid(&coinbase, payment);
        if accepted && payees.max_votes() >= PAYMENT_SIGNATURES_REQUIRED {
            // Some six-vote payee must be exactly paid.
            let paid_six_vote_payee = payees
                .payees
                .iter()
                .filter(|p| p.vote_count() >= PAYMENT_SIGNATURES_REQUIRED)
                .any(|p| coinbase.pays(p.script(), payment));
            prop_assert!(paid_six_vote_payee);
        }
    }

    /// From one verified node and k duplicates at an address, repeated
    /// conflict resolution pushes every duplicate to a ban.
    #[test]
    fn pose_resolution_converges(k in 1usize..5) {
        let setup = Setup::new(TIP, NOW);
        setup.finish_sync(NOW - 600);

        let addr = routable_addr(60, setup.params.mainnet_port);
        let verified = crate::generators::make_enode_at(&setup, 1, addr, NOW);
        setup.identity.set(enode_chain::ActiveIdentity {
            outpoint: Outpoint::default(),
            addr,
            enode_pubkey: verified.announce.enode_pubkey,
            enode_key: verified.enode_key.clone(),
        });
        register(&setup, &verified, NOW);
        setup.identity.clear();

        let mut dupes = Vec::new();
        for tag in 0..k {
            let mn = crate::generators::make_enode_at(&setup, tag as u8 + 2, addr, NOW);
            register(&setup, &mn, NOW);
            dupes.push(mn.outpoint());
        }
        setup.registry.check(NOW);

        for _ in 0..enode_types::POSE_BAN_MAX_SCORE {
            setup.registry.check_same_addr();
        }
        setup.registry.check(NOW + 10);

        for outpoint in dupes {
            let record = setup.registry.get(&outpoint).unwrap();
            prop_assert_eq!(record.state, enode_registry::EnodeState::PoSeBan);
        }
        prop_assert!(setup.registry.get(&verified.outpoint()).unwrap().is_pose_verified());
    }
}
