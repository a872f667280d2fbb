use crate::node::{Handle, Node, NodeRef};
use core::fmt;
use core::ptr::NonNull;

/// An owning, ordered collection of [`Node`]s.
///
/// A graph is the ultimate storage for a task dependency graph. Nodes are
/// heap-allocated so their addresses stay stable while the graph grows, and
/// every [`NodeRef`] handed out by [`emplace_back`](Self::emplace_back)
/// stays valid until the node is erased or the graph is dropped.
///
/// A graph is move-only.
pub struct Graph {
    pub(crate) nodes: Vec<NonNull<Node>>,
}

// SAFETY: the graph owns its nodes exclusively; `Node` is `Send + Sync`.
unsafe impl Send for Graph {}
unsafe impl Sync for Graph {}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Moves `node` into the graph and returns a borrowed handle to it.
    pub fn emplace_back(&mut self, node: Node) -> NodeRef {
        // SAFETY: `Box::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(node))) };
        self.nodes.push(ptr);
        NodeRef::from_ptr(ptr)
    }

    /// Removes and recycles the unique entry equal to `node`. A handle that
    /// does not belong to this graph is ignored.
    pub fn erase(&mut self, node: NodeRef) {
        if let Some(index) = self
            .nodes
            .iter()
            .position(|p| p.as_ptr().cast_const() == node.as_ptr())
        {
            let ptr = self.nodes.remove(index);
            // SAFETY: the entry was allocated by `emplace_back` and is no
            // longer reachable through the graph.
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates the nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.nodes.iter().map(|p| NodeRef::from_ptr(*p))
    }

    /// Recycles every node, draining nested subflow graphs into a flat work
    /// list first so arbitrarily deep nesting never recurses.
    pub fn clear(&mut self) {
        let mut nodes = core::mem::take(&mut self.nodes);
        let mut i = 0;
        while i < nodes.len() {
            // SAFETY: `nodes` holds exclusively owned allocations detached
            // from any graph; no handles are dereferenced during teardown.
            let node = unsafe { &mut *nodes[i].as_ptr() };
            if let Handle::Subflow(sf) = &mut node.handle {
                nodes.append(&mut sf.subgraph.nodes);
            }
            i += 1;
        }
        for ptr in nodes {
            // SAFETY: allocated by `emplace_back`, removed from every list
            // above, dropped exactly once. Each subgraph was emptied, so the
            // nested drop cannot recurse.
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph").field("len", &self.len()).finish()
    }
}
