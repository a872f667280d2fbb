use super::RangeView;
use crate::node::NodeRef;
use crate::partitioner::{DynamicPartitioner, Partitioner, StaticPartitioner};
use crate::runtime::{PreemptionGuard, Runtime};
use crate::sync::{Arc, AtomicUsize, Ordering};
use crate::util::{atomic_min, ResultSlot};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, trace};

/// Shared state of one find invocation. Every sub-task owns one share; the
/// last share to drop publishes the winning offset, so the result is
/// installed exactly once, after all sub-tasks have finished.
struct FindState<T, P> {
    range: RangeView<T>,
    predicate: Arc<P>,
    expect: bool,
    offset: AtomicUsize,
    result: Arc<ResultSlot<usize>>,
    node: Option<NodeRef>,
}

impl<T, P> FindState<T, P>
where
    P: Fn(&T) -> bool,
{
    fn is_cancelled(&self) -> bool {
        self.node.is_some_and(|node| node.is_cancelled())
    }

    /// Scans one chunk. Returns `true` to stop this worker: either a peer
    /// already won at a smaller index, the submission was cancelled, or the
    /// chunk contained a hit.
    fn run_chunk(&self, curr_b: usize, curr_e: usize) -> bool {
        // early prune
        if self.offset.load(Ordering::Relaxed) < curr_b {
            return true;
        }
        if self.is_cancelled() {
            return true;
        }
        let slice = self.range.as_slice();
        for x in curr_b..curr_e {
            if (*self.predicate)(&slice[x]) == self.expect {
                atomic_min(&self.offset, x);
                return true;
            }
        }
        false
    }
}

impl<T, P> Drop for FindState<T, P> {
    fn drop(&mut self) {
        let offset = self.offset.load(Ordering::Relaxed);
        trace!(offset, "find finalized");
        self.result.set(offset);
    }
}

/// Builds a task body that runs a parallel `find_if` over `range`.
///
/// The returned closure implements the parallel skeleton when invoked with a
/// [`Runtime`]: it splits `[0, N)` across the executor's workers with
/// `part`, prunes peers as soon as any worker finds a smaller hit, and
/// publishes the smallest matching index (or `N` when there is none) into
/// `result` exactly once, after every sub-task has released its share.
pub fn make_find_if_task<T, P>(
    range: RangeView<T>,
    result: Arc<ResultSlot<usize>>,
    predicate: P,
    part: impl Into<Partitioner>,
) -> impl FnMut(&mut Runtime<'_>) + Send
where
    T: Send + Sync + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    make_find_task(range, result, predicate, part.into(), true)
}

/// Like [`make_find_if_task`], but a hit is the first element for which the
/// predicate returns `false`.
pub fn make_find_if_not_task<T, P>(
    range: RangeView<T>,
    result: Arc<ResultSlot<usize>>,
    predicate: P,
    part: impl Into<Partitioner>,
) -> impl FnMut(&mut Runtime<'_>) + Send
where
    T: Send + Sync + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    make_find_task(range, result, predicate, part.into(), false)
}

fn make_find_task<T, P>(
    range: RangeView<T>,
    result: Arc<ResultSlot<usize>>,
    predicate: P,
    part: Partitioner,
    expect: bool,
) -> impl FnMut(&mut Runtime<'_>) + Send
where
    T: Send + Sync + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    let predicate = Arc::new(predicate);

    move |rt: &mut Runtime<'_>| {
        let n = range.len();
        let mut w = rt.executor().num_workers();
        let node = rt.current_node();

        if node.is_some_and(|node| node.is_cancelled()) {
            result.set(n);
            return;
        }

        // only myself - no need to spawn sub-tasks
        if w <= 1 || n <= part.chunk_size() {
            trace!(n, "find running serially");
            let slice = range.as_slice();
            let found = slice
                .iter()
                .position(|x| (*predicate)(x) == expect)
                .unwrap_or(n);
            result.set(found);
            return;
        }

        let _preemption_guard = PreemptionGuard::new(rt);

        // use no more workers than the iteration count
        if n < w {
            w = n;
        }
        debug!(n, w, kind = ?part.kind(), "find dispatching sub-tasks");

        let state = Arc::new(FindState {
            range: range.clone(),
            predicate: Arc::clone(&predicate),
            expect,
            offset: AtomicUsize::new(n),
            result: Arc::clone(&result),
            node,
        });

        match part {
            Partitioner::Static(p) => {
                let mut wk = 0;
                let mut curr_b = 0;
                while wk < w && curr_b < n {
                    let chunk_size = p.adjusted_chunk_size(n, w, wk);
                    let task = static_sub_task(Arc::clone(&state), p, n, w, curr_b, chunk_size);
                    wk += 1;
                    if wk == w {
                        task();
                        break;
                    }
                    curr_b += chunk_size;
                    if curr_b >= n {
                        task();
                        break;
                    }
                    rt.silent_async(task);
                }
            }
            Partitioner::Dynamic(p) => {
                let next = Arc::new(AtomicUsize::new(0));
                for wk in 1..=w {
                    let task = dynamic_sub_task(Arc::clone(&state), p, n, w, Arc::clone(&next));
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

fn static_sub_task<T, P>(
    state: Arc<FindState<T, P>>,
    p: StaticPartitioner,
    n: usize,
    w: usize,
    curr_b: usize,
    chunk_size: usize,
) -> impl FnOnce() + Send
where
    T: Send + Sync + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    move || {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            p.loop_until(n, w, curr_b, chunk_size, |b, e| state.run_chunk(b, e));
        }));
        if let Err(payload) = outcome {
            if let Some(node) = state.node {
                node.set_exception(payload);
            }
        }
        // dropping `state` releases this sub-task's share of the finalizer
    }
}

fn dynamic_sub_task<T, P>(
    state: Arc<FindState<T, P>>,
    p: DynamicPartitioner,
    n: usize,
    w: usize,
    next: Arc<AtomicUsize>,
) -> impl FnOnce() + Send
where
    T: Send + Sync + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    move || {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            p.loop_until(n, w, &next, |b, e| state.run_chunk(b, e));
        }));
        if let Err(payload) = outcome {
            if let Some(node) = state.node {
                node.set_exception(payload);
            }
        }
    }
}
