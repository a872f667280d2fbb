use super::RangeView;
use crate::node::NodeRef;
use crate::partitioner::{DynamicPartitioner, Partitioner, StaticPartitioner};
use crate::runtime::{PreemptionGuard, Runtime};
use crate::sync::{Arc, AtomicUsize, Ordering};
use crate::util::ResultSlot;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// Shared state of one min/max invocation: the running best index under a
/// mutex, merged into once per worker. The last share to drop publishes the
/// final index.
struct ReduceState<T, C> {
    range: RangeView<T>,
    comp: Arc<C>,
    find_max: bool,
    best: Mutex<usize>,
    result: Arc<ResultSlot<usize>>,
    node: Option<NodeRef>,
}

impl<T, C> ReduceState<T, C>
where
    C: Fn(&T, &T) -> bool,
{
    fn is_cancelled(&self) -> bool {
        self.node.is_some_and(|node| node.is_cancelled())
    }

    /// Whether `candidate` strictly beats `best` under the comparator's
    /// orientation.
    fn beats(&self, candidate: usize, best: usize) -> bool {
        let slice = self.range.as_slice();
        if self.find_max {
            (*self.comp)(&slice[best], &slice[candidate])
        } else {
            (*self.comp)(&slice[candidate], &slice[best])
        }
    }

    /// Seeds a worker's local extremum from its first two elements. Note the
    /// inversion: for max the second element wins the tie, for min the
    /// first.
    fn seed(&self, a: usize, b: usize) -> usize {
        let slice = self.range.as_slice();
        let a_before_b = (*self.comp)(&slice[a], &slice[b]);
        match (self.find_max, a_before_b) {
            (false, true) | (true, false) => a,
            (false, false) | (true, true) => b,
        }
    }

    /// Final per-worker merge under the mutex.
    fn merge(&self, local: usize) {
        let mut best = self.best.lock().unwrap_or_else(PoisonError::into_inner);
        if self.beats(local, *best) {
            *best = local;
        }
    }
}

impl<T, C> Drop for ReduceState<T, C> {
    fn drop(&mut self) {
        let best = *self.best.lock().unwrap_or_else(PoisonError::into_inner);
        trace!(best, "reduction finalized");
        self.result.set(best);
    }
}

/// Builds a task body that runs a parallel `min_element` over `range`.
///
/// `comp(a, b)` must return `true` iff `a` orders strictly before `b`. The
/// index of a minimal element (or `N` for an empty range) is published into
/// `result` exactly once, after every sub-task has released its share. When
/// several elements tie, which one is reported is unspecified.
pub fn make_min_element_task<T, C>(
    range: RangeView<T>,
    result: Arc<ResultSlot<usize>>,
    comp: C,
    part: impl Into<Partitioner>,
) -> impl FnMut(&mut Runtime<'_>) + Send
where
    T: Send + Sync + 'static,
    C: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    make_extremum_task(range, result, comp, part.into(), false)
}

/// Builds a task body that runs a parallel `max_element` over `range`.
///
/// Same contract as [`make_min_element_task`] with the comparator
/// orientation flipped: the published index holds an element no other
/// element strictly exceeds under `comp`.
pub fn make_max_element_task<T, C>(
    range: RangeView<T>,
    result: Arc<ResultSlot<usize>>,
    comp: C,
    part: impl Into<Partitioner>,
) -> impl FnMut(&mut Runtime<'_>) + Send
where
    T: Send + Sync + 'static,
    C: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    make_extremum_task(range, result, comp, part.into(), true)
}

fn make_extremum_task<T, C>(
    range: RangeView<T>,
    result: Arc<ResultSlot<usize>>,
    comp: C,
    part: Partitioner,
    find_max: bool,
) -> impl FnMut(&mut Runtime<'_>) + Send
where
    T: Send + Sync + 'static,
    C: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    let comp = Arc::new(comp);

    move |rt: &mut Runtime<'_>| {
        let n = range.len();
        let mut w = rt.executor().num_workers();
        let node = rt.current_node();

        if node.is_some_and(|node| node.is_cancelled()) {
            result.set(if n == 0 { n } else { 0 });
            return;
        }

        // only myself - no need to spawn sub-tasks
        if w <= 1 || n <= part.chunk_size() {
            trace!(n, "reduction running serially");
            result.set(serial_extremum(range.as_slice(), &*comp, find_max));
            return;
        }

        let _preemption_guard = PreemptionGuard::new(rt);

        // use no more workers than the iteration count
        if n < w {
            w = n;
        }
        debug!(n, w, kind = ?part.kind(), find_max, "reduction dispatching sub-tasks");

        // the best index seeds at element 0; workers reduce the remaining
        // m elements at logical offsets [0, m) = absolute [1, n)
        let m = n - 1;
        let state = Arc::new(ReduceState {
            range: range.clone(),
            comp: Arc::clone(&comp),
            find_max,
            best: Mutex::new(0),
            result: Arc::clone(&result),
            node,
        });

        match part {
            Partitioner::Static(p) => {
                let mut wk = 0;
                let mut curr_b = 0;
                while wk < w && curr_b < m {
                    // chunks of at least two elements keep the local seed valid
                    let chunk_size = usize::max(2, p.adjusted_chunk_size(m, w, wk));
                    let task = static_sub_task(Arc::clone(&state), p, m, w, curr_b, chunk_size);
                    wk += 1;
                    if wk == w {
                        task();
                        break;
                    }
                    curr_b += chunk_size;
                    if curr_b >= m {
                        task();
                        break;
                    }
                    rt.silent_async(task);
                }
            }
            Partitioner::Dynamic(p) => {
                let next = Arc::new(AtomicUsize::new(0));
                for wk in 1..=w {
                    let task = dynamic_sub_task(Arc::clone(&state), p, m, w, Arc::clone(&next));
                    if wk == w {
                        task();
                    } else {
                        rt.silent_async(task);
                    }
                }
            }
        }
    }
}

fn serial_extremum<T, C>(slice: &[T], comp: &C, find_max: bool) -> usize
where
    C: Fn(&T, &T) -> bool,
{
    if slice.is_empty() {
        return 0;
    }
    let mut best = 0;
    for x in 1..slice.len() {
        let better = if find_max {
            comp(&slice[best], &slice[x])
        } else {
            comp(&slice[x], &slice[best])
        };
        if better {
            best = x;
        }
    }
    best
}

fn static_sub_task<T, C>(
    state: Arc<ReduceState<T, C>>,
    p: StaticPartitioner,
    m: usize,
    w: usize,
    curr_b: usize,
    chunk_size: usize,
) -> impl FnOnce() + Send
where
    T: Send + Sync + 'static,
    C: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    move || {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            reduce_static(&state, p, m, w, curr_b, chunk_size);
        }));
        if let Err(payload) = outcome {
            if let Some(node) = state.node {
                node.set_exception(payload);
            }
        }
        // dropping `state` releases this sub-task's share of the finalizer
    }
}

fn dynamic_sub_task<T, C>(
    state: Arc<ReduceState<T, C>>,
    p: DynamicPartitioner,
    m: usize,
    w: usize,
    next: Arc<AtomicUsize>,
) -> impl FnOnce() + Send
where
    T: Send + Sync + 'static,
    C: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    move || {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            reduce_dynamic(&state, p, m, w, &next);
        }));
        if let Err(payload) = outcome {
            if let Some(node) = state.node {
                node.set_exception(payload);
            }
        }
    }
}

/// One worker's reduction over its static slice of the logical range
/// `[curr_b, …) ⊂ [0, m)`; logical offset `x` is element `x + 1` of the
/// view. Cancellation is honored at every chunk boundary; the partial
/// reduction is still merged.
fn reduce_static<T, C>(
    state: &ReduceState<T, C>,
    p: StaticPartitioner,
    m: usize,
    w: usize,
    curr_b: usize,
    chunk_size: usize,
) where
    C: Fn(&T, &T) -> bool,
{
    if state.is_cancelled() {
        return;
    }
    if m - curr_b == 1 {
        state.merge(curr_b + 1);
        return;
    }

    // seed from the first two owned elements; the chunk loop clamps its
    // first chunk past them
    let mut local = state.seed(curr_b + 1, curr_b + 2);
    let mut prev_e = curr_b + 2;

    p.loop_until(m, w, curr_b, chunk_size, |mut part_b, part_e| {
        if state.is_cancelled() {
            return true;
        }
        if part_b < prev_e {
            part_b = prev_e;
        }
        for x in part_b..part_e {
            if state.beats(x + 1, local) {
                local = x + 1;
            }
        }
        prev_e = part_e;
        false
    });

    state.merge(local);
}

/// One worker's reduction over dynamically claimed chunks. The worker
/// pre-claims two elements to seed its local extremum, then drains the
/// shared cursor. Cancellation is honored at every chunk boundary; the
/// partial reduction is still merged.
fn reduce_dynamic<T, C>(
    state: &ReduceState<T, C>,
    p: DynamicPartitioner,
    m: usize,
    w: usize,
    next: &AtomicUsize,
) where
    C: Fn(&T, &T) -> bool,
{
    if state.is_cancelled() {
        return;
    }
    let s0 = next.fetch_add(2, Ordering::Relaxed);
    if s0 >= m {
        return;
    }
    if m - s0 == 1 {
        state.merge(s0 + 1);
        return;
    }

    let mut local = state.seed(s0 + 1, s0 + 2);

    p.loop_until(m, w, next, |part_b, part_e| {
        if state.is_cancelled() {
            return true;
        }
        for x in part_b..part_e {
            if state.beats(x + 1, local) {
                local = x + 1;
            }
        }
        false
    });

    state.merge(local);
}
