#![cfg(not(feature = "loom"))]

use std::sync::atomic::AtomicUsize;
use taskgraph::partitioner::{
    DynamicPartitioner, Partitioner, PartitionerType, StaticPartitioner,
};

#[test]
fn adjusted_fair_shares_cover_the_range_exactly() {
    for n in [1usize, 2, 5, 16, 97, 1000] {
        for w in 1..=8usize.min(n) {
            let part = StaticPartitioner::default();
            let total: usize = (0..w).map(|wk| part.adjusted_chunk_size(n, w, wk)).sum();
            assert_eq!(total, n, "n={n} w={w}");
        }
    }
}

#[test]
fn adjusted_chunk_size_honors_an_explicit_chunk() {
    let part = StaticPartitioner::new(7);
    assert_eq!(part.adjusted_chunk_size(100, 4, 0), 7);
    assert_eq!(part.adjusted_chunk_size(100, 4, 3), 7);
}

#[test]
fn static_fair_shares_tile_the_range() {
    let n = 103;
    let w = 4;
    let part = StaticPartitioner::default();

    let mut covered = vec![false; n];
    let mut curr_b = 0;
    for wk in 0..w {
        let chunk = part.adjusted_chunk_size(n, w, wk);
        part.loop_partitions(n, w, curr_b, chunk, |b, e| {
            for slot in &mut covered[b..e] {
                assert!(!*slot, "index claimed twice");
                *slot = true;
            }
        });
        curr_b += chunk;
    }
    assert!(covered.iter().all(|c| *c));
}

#[test]
fn static_explicit_chunks_interleave_without_overlap() {
    let n = 50;
    let w = 3;
    let part = StaticPartitioner::new(4);

    let mut covered = vec![false; n];
    for wk in 0..w {
        part.loop_partitions(n, w, wk * 4, 4, |b, e| {
            for slot in &mut covered[b..e] {
                assert!(!*slot, "index claimed twice");
                *slot = true;
            }
        });
    }
    assert!(covered.iter().all(|c| *c));
}

#[test]
fn static_loop_until_stops_at_the_first_true() {
    let part = StaticPartitioner::new(2);
    let mut chunks = Vec::new();
    part.loop_until(10, 1, 0, 2, |b, e| {
        chunks.push((b, e));
        b >= 4
    });
    assert_eq!(chunks, [(0, 2), (2, 4), (4, 6)]);
}

#[test]
fn dynamic_claims_tile_the_range() {
    let n = 37;
    let part = DynamicPartitioner::new(5);
    let next = AtomicUsize::new(0);

    let mut covered = vec![false; n];
    // single-threaded claiming still exercises the cursor protocol
    part.loop_partitions(n, 1, &next, |b, e| {
        for slot in &mut covered[b..e] {
            assert!(!*slot, "index claimed twice");
            *slot = true;
        }
    });
    assert!(covered.iter().all(|c| *c));
}

#[test]
fn dynamic_loop_until_leaves_the_remaining_range_unclaimed_by_this_worker() {
    let part = DynamicPartitioner::new(3);
    let next = AtomicUsize::new(0);
    let mut chunks = Vec::new();
    part.loop_until(30, 1, &next, |b, e| {
        chunks.push((b, e));
        true
    });
    assert_eq!(chunks, [(0, 3)]);
}

#[test]
fn dynamic_chunk_size_has_a_floor_of_one() {
    let part = DynamicPartitioner::new(0);
    let next = AtomicUsize::new(0);
    let mut count = 0;
    part.loop_partitions(4, 1, &next, |b, e| {
        assert_eq!(e, b + 1);
        count += 1;
    });
    assert_eq!(count, 4);
}

#[test]
fn partitioner_value_reports_its_kind_and_chunk() {
    let stat: Partitioner = StaticPartitioner::new(6).into();
    let dyna: Partitioner = DynamicPartitioner::new(2).into();

    assert_eq!(stat.kind(), PartitionerType::Static);
    assert_eq!(stat.chunk_size(), 6);
    assert_eq!(dyna.kind(), PartitionerType::Dynamic);
    assert_eq!(dyna.chunk_size(), 2);
    assert_eq!(Partitioner::default().kind(), PartitionerType::Static);
}
