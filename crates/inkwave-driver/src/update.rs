//! Queued update records

use crate::region::UpdateRegion;
use inkwave_specs::{Intensity, ModeId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a queued update, strictly increasing process-wide.
pub type UpdateId = u64;

static NEXT_UPDATE_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_update_id() -> UpdateId {
    NEXT_UPDATE_ID.fetch_add(1, Ordering::Relaxed)
}

/// One queued update request
///
/// Immutable once enqueued, except through merging: folding a compatible
/// peer in extends `region`, appends its `ids`, and rewrites the target
/// intensity plane. In immediate mode the region also shrinks between
/// frames to the still-active subregion.
#[derive(Debug, Clone)]
pub(crate) struct Update {
    /// Update ids folded into this record, in enqueue order
    pub ids: Vec<UpdateId>,
    /// Waveform mode driving the transition
    pub mode: ModeId,
    /// Step-tracking generation instead of batched frames
    pub immediate: bool,
    /// Target region in EPD coordinates
    pub region: UpdateRegion,
    /// Target intensities for `region`, row-major
    pub buffer: Vec<Intensity>,
}

impl Update {
    /// Creates a single-id record with a fresh monotonic id.
    pub fn single(mode: ModeId, immediate: bool, region: UpdateRegion, buffer: Vec<Intensity>) -> Self {
        debug_assert_eq!(buffer.len(), region.area());

        Self {
            ids: vec![next_update_id()],
            mode,
            immediate,
            region,
            buffer,
        }
    }

    /// Writes the target intensities into a panel-sized plane of the given
    /// row stride.
    pub fn apply(&self, plane: &mut [Intensity], stride: u32) {
        let stride = stride as usize;
        let width = self.region.width as usize;

        let mut src = 0;
        let mut dst = self.region.top as usize * stride + self.region.left as usize;

        for _ in 0..self.region.height {
            plane[dst..dst + width].copy_from_slice(&self.buffer[src..src + width]);
            src += width;
            dst += stride;
        }
    }
}

/// Metadata travelling alongside a frame batch to the vsync side.
#[derive(Debug, Clone, Default)]
pub struct BatchInfo {
    /// Ids of every update folded into the batch, in enqueue order
    pub ids: Vec<UpdateId>,
    /// Waveform mode of the batch
    pub mode: ModeId,
    /// Whether the batch came from immediate-mode generation
    pub immediate: bool,
    /// Region covered at generation time
    pub region: UpdateRegion,
}

impl BatchInfo {
    pub(crate) fn of(update: &Update) -> Self {
        Self {
            ids: update.ids.clone(),
            mode: update.mode,
            immediate: update.immediate,
            region: update.region,
        }
    }
}
