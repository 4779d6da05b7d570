//! Pipeline tracing hooks
//!
//! Every stage of the update pipeline reports to a [`TraceSink`]. All sink
//! methods default to no-ops, so implementing only the events you care about
//! is fine. The perf-report sink builds on these hooks; tests use them to
//! observe batch completion without polling.

use crate::region::UpdateRegion;
use crate::update::{BatchInfo, UpdateId};
use inkwave_specs::ModeId;
use std::time::{Duration, Instant};

/// Monotonic time source for trace sinks
///
/// Injectable so tests can drive deterministic timestamps.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's epoch.
    fn now(&self) -> Duration;
}

/// Wall clock counting from its creation.
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Per-stage observer of the update pipeline
///
/// Methods are called from the caller thread (`update_queued`), the
/// generator thread, and the vsync thread; implementations must be
/// thread-safe.
pub trait TraceSink: Send + Sync {
    /// An update entered the pending queue.
    fn update_queued(&self, _id: UpdateId, _mode: ModeId, _region: &UpdateRegion) {}

    /// The generator picked an update off the queue.
    fn update_dequeued(&self, _id: UpdateId) {}

    /// One packed frame was generated for the updates in `ids`.
    fn frame_generated(&self, _ids: &[UpdateId]) {}

    /// A finished batch was handed to the vsync side.
    fn batch_submitted(&self, _info: &BatchInfo, _frames: usize) {}

    /// The vsync thread picked up a batch.
    fn batch_started(&self, _info: &BatchInfo) {}

    /// One frame was copied and flipped.
    fn frame_flipped(&self, _info: &BatchInfo) {}

    /// Every frame of a batch has been displayed.
    fn batch_completed(&self, _info: &BatchInfo) {}
}

/// Sink that ignores every event; the default.
pub struct NullTrace;

impl TraceSink for NullTrace {}
