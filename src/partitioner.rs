use crate::sync::{AtomicUsize, Ordering};

/// Scheduling discipline used to carve an index range among workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionerType {
    /// Disjoint precomputed slices per worker.
    Static,
    /// Competitive claiming through a shared atomic cursor.
    Dynamic,
}

/// Static partitioning policy.
///
/// With an explicit chunk size, worker `w` owns the interleaved chunks
/// starting at its spawn offset, striding by `W * chunk`. With the automatic
/// chunk size (zero), every worker receives one contiguous fair share of
/// `[0, N)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticPartitioner {
    chunk_size: usize,
}

impl StaticPartitioner {
    /// `chunk_size == 0` selects the automatic fair-share split.
    pub const fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// The chunk length worker `w` takes next, given range length `n` and
    /// `w_total` workers. The shares of all workers cover `[0, n)` exactly.
    pub fn adjusted_chunk_size(&self, n: usize, w_total: usize, w: usize) -> usize {
        if self.chunk_size == 0 {
            n / w_total + usize::from(w < n % w_total)
        } else {
            self.chunk_size
        }
    }

    /// Drives `body` over this worker's sub-chunks of `[0, n)`, starting at
    /// `curr_b` and striding by `w_total * chunk_size`.
    pub fn loop_partitions(
        &self,
        n: usize,
        w_total: usize,
        mut curr_b: usize,
        chunk_size: usize,
        mut body: impl FnMut(usize, usize),
    ) {
        let stride = w_total * chunk_size;
        while curr_b < n {
            let curr_e = usize::min(curr_b + chunk_size, n);
            body(curr_b, curr_e);
            curr_b += stride;
        }
    }

    /// Like [`loop_partitions`](Self::loop_partitions), but `body` returning
    /// `true` ends the iteration immediately.
    pub fn loop_until(
        &self,
        n: usize,
        w_total: usize,
        mut curr_b: usize,
        chunk_size: usize,
        mut body: impl FnMut(usize, usize) -> bool,
    ) {
        let stride = w_total * chunk_size;
        while curr_b < n {
            let curr_e = usize::min(curr_b + chunk_size, n);
            if body(curr_b, curr_e) {
                return;
            }
            curr_b += stride;
        }
    }
}

/// Dynamic partitioning policy.
///
/// All workers claim successive chunks from a shared atomic cursor; a worker
/// that finishes a chunk immediately claims the next unowned one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicPartitioner {
    chunk_size: usize,
}

impl DynamicPartitioner {
    pub const fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Drives `body` over chunks claimed by fetch-adding `next`.
    pub fn loop_partitions(
        &self,
        n: usize,
        _w_total: usize,
        next: &AtomicUsize,
        mut body: impl FnMut(usize, usize),
    ) {
        let chunk_size = usize::max(1, self.chunk_size);
        loop {
            let curr_b = next.fetch_add(chunk_size, Ordering::Relaxed);
            if curr_b >= n {
                return;
            }
            body(curr_b, usize::min(curr_b + chunk_size, n));
        }
    }

    /// Like [`loop_partitions`](Self::loop_partitions), but `body` returning
    /// `true` ends the iteration immediately.
    pub fn loop_until(
        &self,
        n: usize,
        _w_total: usize,
        next: &AtomicUsize,
        mut body: impl FnMut(usize, usize) -> bool,
    ) {
        let chunk_size = usize::max(1, self.chunk_size);
        loop {
            let curr_b = next.fetch_add(chunk_size, Ordering::Relaxed);
            if curr_b >= n {
                return;
            }
            if body(curr_b, usize::min(curr_b + chunk_size, n)) {
                return;
            }
        }
    }
}

impl Default for DynamicPartitioner {
    fn default() -> Self {
        Self { chunk_size: 1 }
    }
}

/// A value-level partitioner choice handed to the parallel algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioner {
    Static(StaticPartitioner),
    Dynamic(DynamicPartitioner),
}

impl Partitioner {
    pub fn kind(&self) -> PartitionerType {
        match self {
            Self::Static(_) => PartitionerType::Static,
            Self::Dynamic(_) => PartitionerType::Dynamic,
        }
    }

    pub fn chunk_size(&self) -> usize {
        match self {
            Self::Static(p) => p.chunk_size(),
            Self::Dynamic(p) => p.chunk_size(),
        }
    }
}

impl Default for Partitioner {
    fn default() -> Self {
        Self::Static(StaticPartitioner::default())
    }
}

impl From<StaticPartitioner> for Partitioner {
    fn from(p: StaticPartitioner) -> Self {
        Self::Static(p)
    }
}

impl From<DynamicPartitioner> for Partitioner {
    fn from(p: DynamicPartitioner) -> Self {
        Self::Dynamic(p)
    }
}

/// The partitioner used when callers do not specify one.
pub type DefaultPartitioner = StaticPartitioner;
