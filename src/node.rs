use crate::error::Panic;
use crate::graph::Graph;
use crate::runtime::{Runtime, Topology};
use crate::sync::{AtomicU32, AtomicU8, AtomicUsize, Mutex, Ordering};
use core::fmt;
use core::ptr::NonNull;
use smallvec::SmallVec;
use std::sync::{Arc, Weak};

/// Node-state bits. Flags live in the top nibble; the low bits hold the
/// number of conditional predecessors counted by
/// [`Node::set_up_join_counter`].
pub mod nstate {
    pub const NONE: u32 = 0;
    /// The node has at least one conditional predecessor.
    pub const CONDITIONED: u32 = 1 << 28;
    /// The node is suspended awaiting nested work.
    pub const PREEMPTED: u32 = 1 << 29;
    /// Flag bits; everything below is the conditioner count.
    pub const MASK: u32 = 0xF000_0000;
}

/// Execution-state bits, shared across threads.
pub mod estate {
    pub const NONE: u8 = 0;
    /// The owning submission was cancelled.
    pub const CANCELLED: u8 = 1;
    /// A guard forbids tearing the node down.
    pub const ANCHORED: u8 = 1 << 1;
}

/// Dependent-async lifecycle states, observed by dependents with acquire
/// ordering.
pub mod astate {
    pub const UNFINISHED: u8 = 0;
    /// A dependent is inserting an edge; completion must wait.
    pub const LOCKED: u8 = 1;
    pub const FINISHED: u8 = 2;
}

/// Parameters applied to a node at construction.
#[derive(Debug)]
pub struct TaskParams {
    /// Human-readable label, possibly empty.
    pub name: String,
    /// Opaque user pointer. The core stores it and never dereferences it.
    pub data: *mut (),
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            data: core::ptr::null_mut(),
        }
    }
}

impl From<&str> for TaskParams {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }
}

impl From<String> for TaskParams {
    fn from(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

/// The default-empty parameter tag.
impl From<()> for TaskParams {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

pub type BasicBody = Box<dyn FnMut() + Send + 'static>;
pub type RuntimeBody = Box<dyn FnMut(&mut Runtime<'_>) + Send + 'static>;
pub type InterruptibleBody = Box<dyn FnMut(&mut Runtime<'_>, bool) + Send + 'static>;
pub type SubflowBody = Box<dyn FnMut(&mut Graph) + Send + 'static>;
pub type ConditionBody = Box<dyn FnMut() -> usize + Send + 'static>;
pub type MultiConditionBody = Box<dyn FnMut() -> SmallVec<[usize; 4]> + Send + 'static>;

/// Static work body: nullary, or taking the runtime context.
pub enum StaticWork {
    Plain(BasicBody),
    Contextual(RuntimeBody),
}

impl fmt::Debug for StaticWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain(_) => "StaticWork::Plain",
            Self::Contextual(_) => "StaticWork::Contextual",
        })
    }
}

/// Async work body in one of three arities.
pub enum AsyncWork {
    Plain(BasicBody),
    Contextual(RuntimeBody),
    Interruptible(InterruptibleBody),
}

impl fmt::Debug for AsyncWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain(_) => "AsyncWork::Plain",
            Self::Contextual(_) => "AsyncWork::Contextual",
            Self::Interruptible(_) => "AsyncWork::Interruptible",
        })
    }
}

/// Subflow payload: the spawning body plus the owned graph of dynamically
/// produced nodes.
pub struct SubflowHandle {
    pub work: SubflowBody,
    pub subgraph: Graph,
}

impl fmt::Debug for SubflowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubflowHandle")
            .field("subgraph", &self.subgraph)
            .finish_non_exhaustive()
    }
}

/// Module payload: a non-owning reference to another graph, executed inline
/// with this node as its parent.
#[derive(Debug)]
pub struct ModuleHandle {
    graph: NonNull<Graph>,
}

impl ModuleHandle {
    pub fn new(graph: &Graph) -> Self {
        Self {
            graph: NonNull::from(graph),
        }
    }

    /// # Safety contract
    /// The referenced graph must outlive every execution of the module node;
    /// the caller that composed the graphs upholds this.
    pub fn graph(&self) -> &Graph {
        unsafe { self.graph.as_ref() }
    }
}

/// Dependent-async payload: the work body plus the shared-ownership count
/// and completion state dependents observe.
#[derive(Debug)]
pub struct DependentAsyncHandle {
    work: AsyncWork,
    use_count: AtomicUsize,
    state: AtomicU8,
}

impl DependentAsyncHandle {
    pub fn new(work: AsyncWork) -> Self {
        Self {
            work,
            use_count: AtomicUsize::new(1),
            state: AtomicU8::new(astate::UNFINISHED),
        }
    }

    pub fn work_mut(&mut self) -> &mut AsyncWork {
        &mut self.work
    }

    /// Takes one share of the node; returns the new count.
    pub fn acquire_ref(&self) -> usize {
        self.use_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Releases one share; returns the remaining count. The holder observing
    /// zero recycles the node.
    pub fn release_ref(&self) -> usize {
        self.use_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Single-step state transition, e.g. `UNFINISHED -> LOCKED` while a
    /// dependent inserts an edge.
    pub fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn mark_finished(&self) {
        self.state.store(astate::FINISHED, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.state() == astate::FINISHED
    }
}

/// The variant payload of a node.
pub enum Handle {
    Placeholder,
    Static(StaticWork),
    Subflow(SubflowHandle),
    Condition(ConditionBody),
    MultiCondition(MultiConditionBody),
    Module(ModuleHandle),
    Async(AsyncWork),
    DependentAsync(DependentAsyncHandle),
}

impl Handle {
    /// Stable variant index used by executor dispatch tables.
    pub fn index(&self) -> usize {
        match self {
            Self::Placeholder => Node::PLACEHOLDER,
            Self::Static(_) => Node::STATIC,
            Self::Subflow(_) => Node::SUBFLOW,
            Self::Condition(_) => Node::CONDITION,
            Self::MultiCondition(_) => Node::MULTI_CONDITION,
            Self::Module(_) => Node::MODULE,
            Self::Async(_) => Node::ASYNC,
            Self::DependentAsync(_) => Node::DEPENDENT_ASYNC,
        }
    }

    pub fn static_work(work: impl FnMut() + Send + 'static) -> Self {
        Self::Static(StaticWork::Plain(Box::new(work)))
    }

    pub fn static_with_runtime(work: impl FnMut(&mut Runtime<'_>) + Send + 'static) -> Self {
        Self::Static(StaticWork::Contextual(Box::new(work)))
    }

    /// Subflow with an initially empty subgraph; the body populates it when
    /// the node first runs.
    pub fn subflow(work: impl FnMut(&mut Graph) + Send + 'static) -> Self {
        Self::subflow_with_graph(work, Graph::new())
    }

    pub fn subflow_with_graph(
        work: impl FnMut(&mut Graph) + Send + 'static,
        subgraph: Graph,
    ) -> Self {
        Self::Subflow(SubflowHandle {
            work: Box::new(work),
            subgraph,
        })
    }

    pub fn condition(work: impl FnMut() -> usize + Send + 'static) -> Self {
        Self::Condition(Box::new(work))
    }

    pub fn multi_condition(
        work: impl FnMut() -> SmallVec<[usize; 4]> + Send + 'static,
    ) -> Self {
        Self::MultiCondition(Box::new(work))
    }

    pub fn module(graph: &Graph) -> Self {
        Self::Module(ModuleHandle::new(graph))
    }

    pub fn async_work(work: impl FnMut() + Send + 'static) -> Self {
        Self::Async(AsyncWork::Plain(Box::new(work)))
    }

    pub fn async_with_runtime(work: impl FnMut(&mut Runtime<'_>) + Send + 'static) -> Self {
        Self::Async(AsyncWork::Contextual(Box::new(work)))
    }

    pub fn async_interruptible(
        work: impl FnMut(&mut Runtime<'_>, bool) + Send + 'static,
    ) -> Self {
        Self::Async(AsyncWork::Interruptible(Box::new(work)))
    }

    pub fn dependent_async(work: AsyncWork) -> Self {
        Self::DependentAsync(DependentAsyncHandle::new(work))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placeholder => f.write_str("Placeholder"),
            Self::Static(w) => w.fmt(f),
            Self::Subflow(s) => s.fmt(f),
            Self::Condition(_) => f.write_str("Condition"),
            Self::MultiCondition(_) => f.write_str("MultiCondition"),
            Self::Module(m) => m.fmt(f),
            Self::Async(w) => w.fmt(f),
            Self::DependentAsync(d) => d.fmt(f),
        }
    }
}

/// A vertex of a task dependency graph.
///
/// Owned by its [`Graph`]; referenced everywhere else through the non-owning
/// [`NodeRef`] handle. Edge lists are structurally mutated only while the
/// graph is being built; during execution all cross-thread traffic goes
/// through the atomic join counter, the state bitfields and the exception
/// slot.
#[derive(derive_more::Debug)]
pub struct Node {
    nstate: AtomicU32,
    estate: AtomicU8,
    name: String,
    data: *mut (),
    topology: Option<Weak<Topology>>,
    parent: Option<NodeRef>,
    pub(crate) successors: SmallVec<[NodeRef; 4]>,
    pub(crate) dependents: SmallVec<[NodeRef; 4]>,
    join_counter: AtomicUsize,
    pub(crate) handle: Handle,
    #[debug(skip)]
    exception: Mutex<Option<Panic>>,
}

// SAFETY: `data` is an opaque pointer the core never dereferences; `parent`
// and the edge lists are raw handles into graphs whose structural mutation is
// confined to the building thread. Everything touched during execution is an
// atomic, a mutex, or immutable.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    pub const PLACEHOLDER: usize = 0;
    pub const STATIC: usize = 1;
    pub const SUBFLOW: usize = 2;
    pub const CONDITION: usize = 3;
    pub const MULTI_CONDITION: usize = 4;
    pub const MODULE: usize = 5;
    pub const ASYNC: usize = 6;
    pub const DEPENDENT_ASYNC: usize = 7;

    pub fn new(
        params: impl Into<TaskParams>,
        topology: Option<Weak<Topology>>,
        parent: Option<NodeRef>,
        join_counter: usize,
        handle: Handle,
    ) -> Self {
        Self::with_state(
            nstate::NONE,
            estate::NONE,
            params,
            topology,
            parent,
            join_counter,
            handle,
        )
    }

    pub fn with_state(
        nstate: u32,
        estate: u8,
        params: impl Into<TaskParams>,
        topology: Option<Weak<Topology>>,
        parent: Option<NodeRef>,
        join_counter: usize,
        handle: Handle,
    ) -> Self {
        let TaskParams { name, data } = params.into();
        Self {
            nstate: AtomicU32::new(nstate),
            estate: AtomicU8::new(estate),
            name,
            data,
            topology,
            parent,
            successors: SmallVec::new(),
            dependents: SmallVec::new(),
            join_counter: AtomicUsize::new(join_counter),
            handle,
            exception: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> *mut () {
        self.data
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut Handle {
        &mut self.handle
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent
    }

    pub fn topology(&self) -> Option<Arc<Topology>> {
        self.topology.as_ref().and_then(Weak::upgrade)
    }

    pub fn num_successors(&self) -> usize {
        self.successors.len()
    }

    pub fn num_dependents(&self) -> usize {
        self.dependents.len()
    }

    pub fn num_weak_dependents(&self) -> usize {
        self.dependents
            .iter()
            .filter(|p| p.is_conditioner())
            .count()
    }

    pub fn num_strong_dependents(&self) -> usize {
        self.dependents
            .iter()
            .filter(|p| !p.is_conditioner())
            .count()
    }

    /// A conditioner's outgoing edges are weak: it activates successors by
    /// explicit selection instead of join-counter decrements.
    pub fn is_conditioner(&self) -> bool {
        matches!(
            self.handle,
            Handle::Condition(_) | Handle::MultiCondition(_)
        )
    }

    pub fn is_preempted(&self) -> bool {
        self.nstate.load(Ordering::Relaxed) & nstate::PREEMPTED != 0
    }

    /// Cancellation is read from the owning topology or the immediate
    /// parent; the chain is not walked further.
    pub fn is_cancelled(&self) -> bool {
        if let Some(topology) = self.topology.as_ref().and_then(Weak::upgrade) {
            if topology.is_cancelled() {
                return true;
            }
        }
        if let Some(parent) = self.parent {
            if parent.estate() & estate::CANCELLED != 0 {
                return true;
            }
        }
        false
    }

    pub fn nstate(&self) -> u32 {
        self.nstate.load(Ordering::Relaxed)
    }

    pub fn estate(&self) -> u8 {
        self.estate.load(Ordering::Relaxed)
    }

    /// Number of conditional predecessors recorded by the last
    /// [`set_up_join_counter`](Self::set_up_join_counter).
    pub fn num_conditioners(&self) -> usize {
        (self.nstate() & !nstate::MASK) as usize
    }

    pub fn cancel(&self) {
        self.estate.fetch_or(estate::CANCELLED, Ordering::Relaxed);
    }

    pub fn join_counter(&self) -> usize {
        self.join_counter.load(Ordering::Relaxed)
    }

    /// Records the completion of one strong predecessor and returns the
    /// remaining count; zero makes the node dispatchable. The decrement is
    /// `AcqRel` so the predecessor's effects happen-before the dispatch.
    pub fn decrement_join_counter(&self) -> usize {
        self.join_counter.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Recomputes the join counter from the dependent list: conditioners are
    /// tallied into the `nstate` conditioner count (setting `CONDITIONED`),
    /// everything else into the strong count stored in the counter. Called
    /// at the start of each execution; the previous tally is discarded.
    pub fn set_up_join_counter(&self) {
        let mut ns = self.nstate.load(Ordering::Relaxed) & nstate::MASK & !nstate::CONDITIONED;
        let mut strong = 0;
        for p in &self.dependents {
            if p.is_conditioner() {
                ns = (ns + 1) | nstate::CONDITIONED;
            } else {
                strong += 1;
            }
        }
        self.nstate.store(ns, Ordering::Relaxed);
        self.join_counter.store(strong, Ordering::Relaxed);
    }

    /// Stores a captured body failure. The first writer wins; later payloads
    /// from peer sub-tasks are dropped.
    pub fn set_exception(&self, payload: Panic) {
        let mut slot = self.exception.lock().expect("Node::set_exception: poisoned");
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    /// Takes the captured failure, leaving the slot empty.
    pub fn take_exception(&self) -> Option<Panic> {
        self.exception
            .lock()
            .expect("Node::take_exception: poisoned")
            .take()
    }

    /// Re-raises the captured failure, if any. Reading clears the slot.
    pub fn rethrow_exception(&self) {
        if let Some(payload) = self.take_exception() {
            std::panic::resume_unwind(payload);
        }
    }

    pub(crate) fn set_preempted(&self) {
        self.nstate.fetch_or(nstate::PREEMPTED, Ordering::Relaxed);
    }

    pub(crate) fn clear_preempted(&self) {
        self.nstate.fetch_and(!nstate::PREEMPTED, Ordering::Relaxed);
    }

    pub(crate) fn set_anchored(&self) {
        self.estate.fetch_or(estate::ANCHORED, Ordering::Relaxed);
    }

    pub(crate) fn clear_anchored(&self) {
        self.estate.fetch_and(!estate::ANCHORED, Ordering::Relaxed);
    }
}

/// Non-owning handle to a [`Node`] inside a [`Graph`].
///
/// Copyable and cheap; valid while the owning graph holds the node. All
/// accessors go through the shared reference, so a handle can be used from
/// any worker during execution.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeRef {
    ptr: NonNull<Node>,
}

// SAFETY: the pointee is `Sync` and the pointer itself is plain data.
unsafe impl Send for NodeRef {}
unsafe impl Sync for NodeRef {}

impl NodeRef {
    pub(crate) fn from_ptr(ptr: NonNull<Node>) -> Self {
        Self { ptr }
    }

    pub fn as_ptr(self) -> *const Node {
        self.ptr.as_ptr()
    }

    // SAFETY of every dereference below: the handle was produced by
    // `Graph::emplace_back` and the owning graph is alive for as long as
    // handles circulate (the execution-window contract).
    fn node(&self) -> &Node {
        unsafe { self.ptr.as_ref() }
    }

    /// Appends a directed edge `self -> v`, mirroring it in `v`'s dependent
    /// list. Structural mutation; only legal while the graph is being built.
    pub fn precede(self, v: NodeRef) {
        unsafe {
            (*self.ptr.as_ptr()).successors.push(v);
            (*v.ptr.as_ptr()).dependents.push(self);
        }
    }

    pub fn name(&self) -> &str {
        self.node().name()
    }

    pub fn handle_index(self) -> usize {
        self.node().handle.index()
    }

    pub fn num_successors(self) -> usize {
        self.node().num_successors()
    }

    pub fn num_dependents(self) -> usize {
        self.node().num_dependents()
    }

    pub fn num_strong_dependents(self) -> usize {
        self.node().num_strong_dependents()
    }

    pub fn num_weak_dependents(self) -> usize {
        self.node().num_weak_dependents()
    }

    pub fn successors(self) -> SmallVec<[NodeRef; 4]> {
        self.node().successors.clone()
    }

    pub fn dependents(self) -> SmallVec<[NodeRef; 4]> {
        self.node().dependents.clone()
    }

    pub fn is_conditioner(self) -> bool {
        self.node().is_conditioner()
    }

    pub fn is_preempted(self) -> bool {
        self.node().is_preempted()
    }

    pub fn is_cancelled(self) -> bool {
        self.node().is_cancelled()
    }

    pub fn nstate(self) -> u32 {
        self.node().nstate()
    }

    pub fn estate(self) -> u8 {
        self.node().estate()
    }

    pub fn num_conditioners(self) -> usize {
        self.node().num_conditioners()
    }

    pub fn cancel(self) {
        self.node().cancel();
    }

    pub fn join_counter(self) -> usize {
        self.node().join_counter()
    }

    pub fn decrement_join_counter(self) -> usize {
        self.node().decrement_join_counter()
    }

    pub fn set_up_join_counter(self) {
        self.node().set_up_join_counter();
    }

    pub fn set_exception(self, payload: Panic) {
        self.node().set_exception(payload);
    }

    pub fn take_exception(self) -> Option<Panic> {
        self.node().take_exception()
    }

    pub fn rethrow_exception(self) {
        self.node().rethrow_exception();
    }

    pub(crate) fn set_preempted(self) {
        self.node().set_preempted();
    }

    pub(crate) fn clear_preempted(self) {
        self.node().clear_preempted();
    }
}

/// Scoped hold on a node's `ANCHORED` bit.
///
/// While the guard lives, no other worker may tear the node down. The bit is
/// flipped with relaxed atomics; the surrounding join-counter protocol
/// carries the causality.
#[must_use]
#[derive(Debug)]
pub struct AnchorGuard {
    node: NodeRef,
}

impl AnchorGuard {
    pub fn new(node: NodeRef) -> Self {
        node.node().set_anchored();
        Self { node }
    }
}

impl Drop for AnchorGuard {
    fn drop(&mut self) {
        self.node.node().clear_anchored();
    }
}
