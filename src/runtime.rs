use crate::node::{estate, NodeRef};
use crate::sync::{AtomicU8, Ordering};

/// A fire-and-forget unit of work submitted to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The slice of a worker pool the core relies on: a worker count and
/// asynchronous dispatch. Scheduling and work stealing live behind this
/// seam.
pub trait Executor: Send + Sync {
    fn num_workers(&self) -> usize;

    /// Submits `job` for eventual execution on some worker. No completion
    /// signal is delivered; callers that need one share state with the job.
    fn silent_async(&self, job: Job);
}

/// Tracks the lifecycle of a submitted graph. The core reads only the
/// cancellation bit.
#[derive(Debug, Default)]
pub struct Topology {
    estate: AtomicU8,
}

impl Topology {
    pub fn new() -> Self {
        Self {
            estate: AtomicU8::new(estate::NONE),
        }
    }

    /// Requests cooperative cancellation of the whole submission.
    pub fn cancel(&self) {
        self.estate.fetch_or(estate::CANCELLED, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.estate.load(Ordering::Relaxed) & estate::CANCELLED != 0
    }

    pub fn estate(&self) -> u8 {
        self.estate.load(Ordering::Relaxed)
    }
}

/// Execution context handed to a running node body.
#[derive(Clone, Copy)]
pub struct Runtime<'e> {
    executor: &'e dyn Executor,
    node: Option<NodeRef>,
}

impl<'e> Runtime<'e> {
    pub fn new(executor: &'e dyn Executor) -> Self {
        Self {
            executor,
            node: None,
        }
    }

    /// A runtime bound to the node currently being executed.
    pub fn with_node(executor: &'e dyn Executor, node: NodeRef) -> Self {
        Self {
            executor,
            node: Some(node),
        }
    }

    pub fn executor(&self) -> &'e dyn Executor {
        self.executor
    }

    pub fn current_node(&self) -> Option<NodeRef> {
        self.node
    }

    /// Submits a fire-and-forget sub-task to the executor.
    pub fn silent_async(&self, job: impl FnOnce() + Send + 'static) {
        self.executor.silent_async(Box::new(job));
    }
}

impl core::fmt::Debug for Runtime<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime").field("node", &self.node).finish()
    }
}

/// Scoped `PREEMPTED` marker on the node a runtime is bound to.
///
/// While the guard lives, the node is suspended awaiting nested work and the
/// executor must not tear it down; the bit clears on every exit path when
/// the guard drops.
#[must_use]
#[derive(Debug)]
pub struct PreemptionGuard {
    node: Option<NodeRef>,
}

impl PreemptionGuard {
    pub fn new(rt: &Runtime<'_>) -> Self {
        let node = rt.current_node();
        if let Some(node) = node {
            node.set_preempted();
        }
        Self { node }
    }
}

impl Drop for PreemptionGuard {
    fn drop(&mut self) {
        if let Some(node) = self.node {
            node.clear_preempted();
        }
    }
}

/// Reference [`Executor`] backed by a rayon thread pool. The pool's work
/// stealing provides the asynchronous dispatch the algorithms need.
#[derive(Debug)]
pub struct RayonExecutor {
    pool: rayon::ThreadPool,
}

impl RayonExecutor {
    pub fn new(num_workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .build()?;
        Ok(Self { pool })
    }
}

impl Executor for RayonExecutor {
    fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn silent_async(&self, job: Job) {
        self.pool.spawn(job);
    }
}
