//! Finite pool of frame and bitmap handles
//!
//! Every frame or bitmap alive in the process holds a [`HandleLease`]. The
//! lease returns its slot when dropped, so release happens on every exit
//! path, error paths included. A leaked frame keeps its slot forever and the
//! pool eventually refuses new handles, the same way a camera stalls when its
//! buffers are never requeued.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Frames produced by a capture source.
    Source,
    /// Views, bitmaps and frames built mid-transform.
    Intermediate,
    /// Reconstructed frames handed to the output stream.
    Output,
}

impl HandleKind {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Default)]
struct Counters {
    acquired: [AtomicU64; HandleKind::COUNT],
    released: [AtomicU64; HandleKind::COUNT],
}

pub struct HandlePool {
    capacity: usize,
    outstanding: AtomicUsize,
    counters: CachePadded<Counters>,
}

impl HandlePool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            outstanding: AtomicUsize::new(0),
            counters: CachePadded::new(Counters::default()),
        })
    }

    /// Take one handle slot. Fails with [`Error::ResourceExhausted`] when
    /// every slot is held.
    pub fn acquire(self: &Arc<Self>, kind: HandleKind) -> Result<HandleLease> {
        let capacity = self.capacity;
        if self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < capacity).then_some(held + 1)
            })
            .is_err()
        {
            warn!(?kind, capacity, "Handle pool exhausted");
            return Err(Error::ResourceExhausted { capacity });
        }

        self.counters.acquired[kind.index()].fetch_add(1, Ordering::Relaxed);
        Ok(HandleLease {
            pool: Arc::clone(self),
            kind,
        })
    }

    fn release(&self, kind: HandleKind) {
        self.counters.released[kind.index()].fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn acquired(&self, kind: HandleKind) -> u64 {
        self.counters.acquired[kind.index()].load(Ordering::Relaxed)
    }

    pub fn released(&self, kind: HandleKind) -> u64 {
        self.counters.released[kind.index()].load(Ordering::Relaxed)
    }

    pub fn outstanding_of(&self, kind: HandleKind) -> u64 {
        self.acquired(kind).saturating_sub(self.released(kind))
    }
}

impl fmt::Debug for HandlePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlePool")
            .field("capacity", &self.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Scoped ownership of one pool slot.
pub struct HandleLease {
    pool: Arc<HandlePool>,
    kind: HandleKind,
}

impl HandleLease {
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn pool(&self) -> &Arc<HandlePool> {
        &self.pool
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.pool.release(self.kind);
    }
}

impl fmt::Debug for HandleLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleLease").field("kind", &self.kind).finish()
    }
}
