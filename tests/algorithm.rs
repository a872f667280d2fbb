#![cfg(not(feature = "loom"))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use taskgraph::algorithm::{
    make_find_if_not_task, make_find_if_task, make_max_element_task, make_min_element_task,
    RangeView,
};
use taskgraph::graph::Graph;
use taskgraph::node::{Handle, Node};
use taskgraph::partitioner::{DynamicPartitioner, Partitioner, StaticPartitioner};
use taskgraph::runtime::{RayonExecutor, Runtime, Topology};
use taskgraph::util::ResultSlot;

const WAIT: Duration = Duration::from_secs(10);

fn pool(workers: usize) -> &'static RayonExecutor {
    static POOLS: OnceLock<Vec<RayonExecutor>> = OnceLock::new();
    let pools = POOLS.get_or_init(|| {
        (1..=8)
            .map(|w| RayonExecutor::new(w).expect("worker pool"))
            .collect()
    });
    &pools[workers - 1]
}

fn run_find_if(
    data: Vec<i64>,
    predicate: impl Fn(&i64) -> bool + Send + Sync + 'static,
    workers: usize,
    part: impl Into<Partitioner>,
) -> usize {
    let slot = Arc::new(ResultSlot::new());
    let mut task = make_find_if_task(RangeView::from(data), Arc::clone(&slot), predicate, part);
    let mut rt = Runtime::new(pool(workers));
    task(&mut rt);
    slot.wait_timeout(WAIT).expect("find_if published a result")
}

fn run_find_if_not(
    data: Vec<i64>,
    predicate: impl Fn(&i64) -> bool + Send + Sync + 'static,
    workers: usize,
    part: impl Into<Partitioner>,
) -> usize {
    let slot = Arc::new(ResultSlot::new());
    let mut task =
        make_find_if_not_task(RangeView::from(data), Arc::clone(&slot), predicate, part);
    let mut rt = Runtime::new(pool(workers));
    task(&mut rt);
    slot.wait_timeout(WAIT)
        .expect("find_if_not published a result")
}

fn run_min(data: Vec<i64>, workers: usize, part: impl Into<Partitioner>) -> usize {
    let slot = Arc::new(ResultSlot::new());
    let mut task = make_min_element_task(
        RangeView::from(data),
        Arc::clone(&slot),
        |a: &i64, b: &i64| a < b,
        part,
    );
    let mut rt = Runtime::new(pool(workers));
    task(&mut rt);
    slot.wait_timeout(WAIT)
        .expect("min_element published a result")
}

fn run_max(data: Vec<i64>, workers: usize, part: impl Into<Partitioner>) -> usize {
    let slot = Arc::new(ResultSlot::new());
    let mut task = make_max_element_task(
        RangeView::from(data),
        Arc::clone(&slot),
        |a: &i64, b: &i64| a < b,
        part,
    );
    let mut rt = Runtime::new(pool(workers));
    task(&mut rt);
    slot.wait_timeout(WAIT)
        .expect("max_element published a result")
}

#[test]
fn find_if_hits_the_first_match() {
    let found = run_find_if(
        vec![1, 2, 3, 4, 5, 6, 7, 8],
        |x| *x == 5,
        4,
        StaticPartitioner::new(1),
    );
    assert_eq!(found, 4);
}

#[test]
fn find_if_miss_reports_the_range_length() {
    let found = run_find_if(vec![1, 2, 3, 4], |x| *x < 0, 2, DynamicPartitioner::new(1));
    assert_eq!(found, 4);
}

#[test]
fn find_if_not_hits_the_first_mismatch() {
    let found = run_find_if_not(
        vec![2, 2, 2, 3, 2, 2],
        |x| *x == 2,
        3,
        StaticPartitioner::default(),
    );
    assert_eq!(found, 3);
}

#[test]
fn find_result_is_independent_of_workers_and_partitioner() {
    let data: Vec<i64> = (0..997).map(|x| (x * 37) % 101).collect();
    let expected = data.iter().position(|x| *x % 17 == 3).unwrap_or(data.len());

    for workers in [1, 2, 3, 4, 8] {
        for part in [
            Partitioner::Static(StaticPartitioner::default()),
            Partitioner::Static(StaticPartitioner::new(1)),
            Partitioner::Static(StaticPartitioner::new(7)),
            Partitioner::Dynamic(DynamicPartitioner::default()),
            Partitioner::Dynamic(DynamicPartitioner::new(13)),
        ] {
            let found = run_find_if(data.clone(), |x| *x % 17 == 3, workers, part);
            assert_eq!(found, expected, "workers={workers} part={part:?}");
        }
    }
}

#[test]
fn find_on_an_empty_range_reports_zero() {
    assert_eq!(run_find_if(vec![], |_| true, 4, StaticPartitioner::default()), 0);
    assert_eq!(
        run_find_if(vec![], |_| true, 4, DynamicPartitioner::default()),
        0
    );
}

#[test]
fn find_single_element_range() {
    assert_eq!(run_find_if(vec![9], |x| *x == 9, 4, StaticPartitioner::default()), 0);
    assert_eq!(run_find_if(vec![9], |x| *x == 7, 4, StaticPartitioner::default()), 1);
}

#[test]
fn find_serial_fallback_matches_the_parallel_path() {
    let data: Vec<i64> = (0..64).collect();
    let serial = run_find_if(data.clone(), |x| *x == 40, 1, StaticPartitioner::default());
    let parallel = run_find_if(data, |x| *x == 40, 8, StaticPartitioner::default());
    assert_eq!(serial, 40);
    assert_eq!(parallel, 40);
}

#[test]
fn min_element_with_custom_comparator() {
    let data = vec![5, 3, 9, 1, 4, 1, 7];
    for workers in [1, 3] {
        for part in [
            Partitioner::Static(StaticPartitioner::default()),
            Partitioner::Dynamic(DynamicPartitioner::default()),
        ] {
            let index = run_min(data.clone(), workers, part);
            // ties break arbitrarily in parallel runs; compare values
            assert_eq!(data[index], 1, "workers={workers} part={part:?}");
        }
    }
}

#[test]
fn max_element_with_fewer_elements_than_workers() {
    for part in [
        Partitioner::Static(StaticPartitioner::default()),
        Partitioner::Dynamic(DynamicPartitioner::default()),
    ] {
        let index = run_max(vec![10, 20], 8, part);
        assert_eq!(index, 1, "part={part:?}");
    }
}

#[test]
fn min_and_max_agree_with_the_serial_algorithms_on_values() {
    let data: Vec<i64> = (0..512).map(|x| (x * 131 + 17) % 257 - 128).collect();
    let min_value = *data.iter().min().unwrap();
    let max_value = *data.iter().max().unwrap();

    for workers in [2, 4, 8] {
        for part in [
            Partitioner::Static(StaticPartitioner::default()),
            Partitioner::Static(StaticPartitioner::new(3)),
            Partitioner::Dynamic(DynamicPartitioner::default()),
            Partitioner::Dynamic(DynamicPartitioner::new(5)),
        ] {
            let min_index = run_min(data.clone(), workers, part);
            let max_index = run_max(data.clone(), workers, part);
            assert_eq!(data[min_index], min_value, "workers={workers} part={part:?}");
            assert_eq!(data[max_index], max_value, "workers={workers} part={part:?}");
        }
    }
}

#[test]
fn min_element_on_empty_and_single_ranges() {
    assert_eq!(run_min(vec![], 4, StaticPartitioner::default()), 0);
    assert_eq!(run_min(vec![42], 4, StaticPartitioner::default()), 0);
    assert_eq!(run_max(vec![42], 4, DynamicPartitioner::default()), 0);
}

#[test]
fn min_element_when_every_element_ties() {
    let data = vec![6; 100];
    for part in [
        Partitioner::Static(StaticPartitioner::default()),
        Partitioner::Dynamic(DynamicPartitioner::default()),
    ] {
        let index = run_min(data.clone(), 4, part);
        assert_eq!(data[index], 6);
    }
}

#[test]
fn cancellation_before_dispatch_skips_every_user_body() {
    let topology = Arc::new(Topology::new());
    let mut graph = Graph::new();
    let node = graph.emplace_back(Node::new(
        "find",
        Some(Arc::downgrade(&topology)),
        None,
        0,
        Handle::Placeholder,
    ));

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let data: Vec<i64> = (0..1000).collect();
    let n = data.len();

    let slot = Arc::new(ResultSlot::new());
    let mut task = make_find_if_task(
        RangeView::from(data),
        Arc::clone(&slot),
        move |x| {
            counted.fetch_add(1, Ordering::Relaxed);
            *x == 999
        },
        StaticPartitioner::default(),
    );

    topology.cancel();
    let mut rt = Runtime::with_node(pool(4), node);
    task(&mut rt);

    assert_eq!(slot.wait_timeout(WAIT).unwrap(), n);
    assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[test]
fn min_element_cancelled_mid_iteration_stops_at_chunk_boundaries() {
    let topology = Arc::new(Topology::new());
    let mut graph = Graph::new();
    let node = graph.emplace_back(Node::new(
        "min",
        Some(Arc::downgrade(&topology)),
        None,
        0,
        Handle::Placeholder,
    ));

    let data: Vec<i64> = (0..50_000).collect();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let cancel = Arc::clone(&topology);

    let slot = Arc::new(ResultSlot::new());
    let mut task = make_min_element_task(
        RangeView::from(data),
        Arc::clone(&slot),
        move |a: &i64, b: &i64| {
            counted.fetch_add(1, Ordering::Relaxed);
            cancel.cancel();
            a < b
        },
        StaticPartitioner::new(8),
    );

    let mut rt = Runtime::with_node(pool(4), node);
    task(&mut rt);
    slot.wait_timeout(WAIT).expect("result published");

    // a worker's own comparator call set the bit, so its next boundary
    // check sees it: at most one seed, one in-flight chunk and one merge
    // per worker
    let total = calls.load(Ordering::Relaxed);
    assert!(total < 200, "comparator kept running after cancellation: {total} calls");
}

#[test]
fn max_element_cancelled_mid_iteration_stops_at_chunk_boundaries() {
    let topology = Arc::new(Topology::new());
    let mut graph = Graph::new();
    let node = graph.emplace_back(Node::new(
        "max",
        Some(Arc::downgrade(&topology)),
        None,
        0,
        Handle::Placeholder,
    ));

    let data: Vec<i64> = (0..50_000).collect();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let cancel = Arc::clone(&topology);

    let slot = Arc::new(ResultSlot::new());
    let mut task = make_max_element_task(
        RangeView::from(data),
        Arc::clone(&slot),
        move |a: &i64, b: &i64| {
            counted.fetch_add(1, Ordering::Relaxed);
            cancel.cancel();
            a < b
        },
        DynamicPartitioner::new(8),
    );

    let mut rt = Runtime::with_node(pool(4), node);
    task(&mut rt);
    slot.wait_timeout(WAIT).expect("result published");

    let total = calls.load(Ordering::Relaxed);
    assert!(total < 200, "comparator kept running after cancellation: {total} calls");
}

#[test]
fn a_panicking_sub_task_is_captured_on_the_enclosing_node() {
    let mut graph = Graph::new();
    let node = graph.emplace_back(Node::new("find", None, None, 0, Handle::Placeholder));

    let data: Vec<i64> = (0..256).collect();
    let slot = Arc::new(ResultSlot::new());
    let mut task = make_find_if_task(
        RangeView::from(data),
        Arc::clone(&slot),
        |x| {
            assert!(*x != 200, "predicate rejected {x}");
            false
        },
        StaticPartitioner::default(),
    );

    let mut rt = Runtime::with_node(pool(4), node);
    task(&mut rt);

    // the finalizer still runs: every sub-task releases its share even when
    // its body panicked
    slot.wait_timeout(WAIT).expect("result published");
    let payload = node.take_exception().expect("panic captured on the node");
    let message = payload.downcast::<String>().expect("assert payload");
    assert!(message.contains("predicate rejected 200"));
    assert!(node.take_exception().is_none());
}

#[test]
fn the_finalizer_publishes_exactly_once() {
    let data: Vec<i64> = (0..300).collect();
    let slot = Arc::new(ResultSlot::new());
    let mut task = make_find_if_task(
        RangeView::from(data),
        Arc::clone(&slot),
        |x| *x == 123,
        DynamicPartitioner::new(8),
    );
    let mut rt = Runtime::new(pool(4));
    task(&mut rt);

    let first = slot.wait_timeout(WAIT).unwrap();
    let second = slot.wait_timeout(WAIT).unwrap();
    assert_eq!(first, 123);
    assert_eq!(second, 123);
}
