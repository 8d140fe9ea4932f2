//! Election determinism tests.

use crate::generators::{make_enode, register, Setup};
use crate::harness::block_hash;
use enode_types::score_distance;

const NOW: i64 = 1_700_000_000;

#[test]
fn payment_queue_picks_higher_score_deterministically() {
    let setup = Setup::new(200, NOW);
    let a = make_enode(&setup, 0x11, NOW);
    let b = make_enode(&setup, 0x22, NOW);
    register(&setup, &a, NOW);
    register(&setup, &b, NOW);
    setup.registry.check(NOW);

    // Identical payment history.
    setup.registry.set_last_paid(&a.outpoint(), 100, 0);
    setup.registry.set_last_paid(&b.outpoint(), 100, 0);

    // Hand-compute both scores at the ranking block for height 210.
    let ranking_hash = block_hash(109);
    let score_a = score_distance(&a.outpoint(), &ranking_hash);
    let score_b = score_distance(&b.outpoint(), &ranking_hash);
    assert_ne!(score_a, score_b);
    let expected = if score_a > score_b {
        a.outpoint()
    } else {
        b.outpoint()
    };

    let (winner, count) = setup
        .registry
        .next_enode_in_queue(210, true, NOW, &|_| false);
    assert_eq!(count, 2);
    assert_eq!(winner.expect("a winner").outpoint, expected);

    // Pure function of the snapshot: same answer every time.
    for _ in 0..3 {
        let (winner, _) = setup
            .registry
            .next_enode_in_queue(210, true, NOW, &|_| false);
        assert_eq!(winner.unwrap().outpoint, expected);
    }
}

#[test]
fn insertion_order_does_not_change_the_winner() {
    let forward = Setup::new(200, NOW);
    let backward = Setup::new(200, NOW);

    let tags = [0x11u8, 0x22, 0x33, 0x44];
    for &tag in &tags {
        let mn = make_enode(&forward, tag, NOW);
        register(&forward, &mn, NOW);
    }
    for &tag in tags.iter().rev() {
        let mn = make_enode(&backward, tag, NOW);
        register(&backward, &mn, NOW);
    }
    forward.registry.check(NOW);
    backward.registry.check(NOW);

    let (w1, c1) = forward
        .registry
        .next_enode_in_queue(210, true, NOW, &|_| false);
    let (w2, c2) = backward
        .registry
        .next_enode_in_queue(210, true, NOW, &|_| false);
    assert_eq!(c1, c2);
    assert_eq!(w1.unwrap().outpoint, w2.unwrap().outpoint);
}

#[test]
fn ranks_are_dense_and_stable() {
    let setup = Setup::new(200, NOW);
    for tag in [1u8, 2, 3, 4, 5] {
        let mn = make_enode(&setup, tag, NOW);
        register(&setup, &mn, NOW);
    }
    setup.registry.check(NOW);

    let ranks = setup.registry.get_ranks(199, 0);
    assert_eq!(ranks.len(), 5);
    let positions: Vec<usize> = ranks.iter().map(|(rank, _)| *rank).collect();
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);

    for (rank, mn) in &ranks {
        assert_eq!(
            setup.registry.get_rank(&mn.outpoint, 199, 0),
            Some(*rank)
        );
        assert_eq!(
            setup
                .registry
                .get_by_rank(*rank, 199, 0)
                .unwrap()
                .outpoint,
            mn.outpoint
        );
    }

    // Unknown outpoints have no rank.
    let stranger = enode_types::Outpoint::new(enode_types::sha256d(b"stranger"), 0);
    assert_eq!(setup.registry.get_rank(&stranger, 199, 0), None);
}

#[test]
fn scheduled_enodes_are_skipped() {
    let setup = Setup::new(200, NOW);
    let a = make_enode(&setup, 0x11, NOW);
    let b = make_enode(&setup, 0x22, NOW);
    register(&setup, &a, NOW);
    register(&setup, &b, NOW);
    setup.registry.check(NOW);

    let skip = a.outpoint();
    let (winner, count) = setup
        .registry
        .next_enode_in_queue(210, true, NOW, &|mn| mn.outpoint == skip);
    assert_eq!(count, 1);
    assert_eq!(winner.unwrap().outpoint, b.outpoint());
}
