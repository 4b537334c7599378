//! Crop pipeline: strategies, per-frame transform, run loop

pub mod strategy;
pub mod transform;

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

pub use strategy::{PipelineMode, Strategy};
pub use transform::FramePipeline;

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    emitted: AtomicU64,
    dropped: AtomicU64,
    source_errors: AtomicU64,
    reallocations: AtomicU64,
}

/// Frame counters shared between the pipeline task and its observers.
#[derive(Default)]
pub struct PipelineCounters {
    inner: CachePadded<Counters>,
}

impl PipelineCounters {
    pub(crate) fn record_received(&self) {
        self.inner.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_emitted(&self) {
        self.inner.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_source_error(&self) {
        self.inner.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reallocations(&self, n: u64) {
        self.inner.reallocations.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_received: self.inner.received.load(Ordering::Relaxed),
            frames_emitted: self.inner.emitted.load(Ordering::Relaxed),
            frames_dropped: self.inner.dropped.load(Ordering::Relaxed),
            source_errors: self.inner.source_errors.load(Ordering::Relaxed),
            buffer_reallocations: self.inner.reallocations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_received: u64,
    pub frames_emitted: u64,
    pub frames_dropped: u64,
    pub source_errors: u64,
    pub buffer_reallocations: u64,
}
