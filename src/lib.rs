//! Task-graph core with partitioned parallel search and reduction
//! skeletons.
//!
//! This crate provides the vertex model of a task dependency graph and the
//! parallel algorithm skeletons an executor dispatches over it. It:
//! - Models eight structurally different kinds of work in one node type
//!   (placeholder, static, subflow, conditional, multi-conditional, module
//!   composition, async, dependent-async) with stable variant indices for
//!   dispatch tables.
//! - Distinguishes *weak* (conditional) from *strong* dependencies and
//!   encodes readiness in an atomic join counter: strong predecessors
//!   decrement it, conditioners instead select which successor to activate.
//! - Splits bulk iteration across a worker pool with static and dynamic
//!   partitioners, prunes peers as soon as any worker succeeds, and
//!   delivers each algorithm's answer exactly once through a shared-lifetime
//!   finalizer.
//!
//! Key modules:
//! - `graph`: the owning, move-only container of nodes.
//! - `node`: the polymorphic vertex, its state bitfields, the join-counter
//!   protocol and the anchor guard.
//! - `partitioner`: static and dynamic range-splitting policies.
//! - `algorithm`: parallel `find_if`, `find_if_not`, `min_element` and
//!   `max_element` task builders.
//! - `runtime`: the executor seam, the per-node runtime context, the
//!   preemption guard and the topology cancellation bit.
//!
//! Quick start:
//! 1. Build a [`graph::Graph`], emplace [`node::Node`]s and wire edges with
//!    [`node::NodeRef::precede`].
//! 2. Create an algorithm body with e.g.
//!    [`algorithm::make_find_if_task`] and hand it a
//!    [`runtime::Runtime`] backed by your worker pool (tests use
//!    [`runtime::RayonExecutor`]).
//! 3. Read the published answer from the shared
//!    [`util::ResultSlot`] once the graph has joined.
//!
//! The crate schedules nothing itself: dispatch, work stealing and graph
//! lifecycle tracking live behind the `runtime::Executor` and
//! `runtime::Topology` seams.

/// Parallel `find_if`, `find_if_not`, `min_element` and `max_element` task
/// builders plus the shared `RangeView` they iterate.
pub mod algorithm;
/// Error types and the captured-panic payload alias.
pub mod error;
/// The owning, ordered, move-only node container.
pub mod graph;
/// The polymorphic graph vertex, its state bitfields and edge protocol.
pub mod node;
/// Range-splitting policies for the parallel algorithms.
pub mod partitioner;
/// The executor seam, runtime context, preemption guard and topology.
pub mod runtime;
mod sync;
/// `atomic_min` and the write-once result publication cell.
pub mod util;
