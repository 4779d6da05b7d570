//! Waveform frame generation
//!
//! The generator thread owns three panel-sized planes: `current` (what the
//! panel shows), `next` (the target after pending work), and per-pixel step
//! counters used by immediate mode. Updates are popped off the queue,
//! compatible neighbours are folded in, and each waveform step is encoded
//! into a packed frame: eight pixels per 16-bit word, two bits per pixel,
//! pixel 0 in the most significant bit pair.

use crate::display::Shared;
use crate::region::UpdateRegion;
use crate::update::{BatchInfo, Update};
use inkwave_specs::{
    Intensity, PanelSpec, PhaseMatrix, WaveformError, WaveformTable, PIXELS_PER_WORD,
};
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) struct FrameGenerator {
    spec: &'static PanelSpec,
    table: Arc<WaveformTable>,
    shared: Arc<Shared>,
    null_frame: Vec<u8>,
    /// Intensities currently on the panel
    current: Vec<Intensity>,
    /// Target intensities once pending work completes
    next: Vec<Intensity>,
    /// Immediate mode: next waveform step per pixel, 0 = not in transition
    steps: Vec<u32>,
    /// Generator-side frame batch, swapped with the vsync side
    frames: Vec<Vec<u8>>,
}

impl FrameGenerator {
    pub fn new(
        spec: &'static PanelSpec,
        table: Arc<WaveformTable>,
        shared: Arc<Shared>,
        null_frame: Vec<u8>,
    ) -> Self {
        let size = spec.epd_size();

        Self {
            spec,
            table,
            shared,
            null_frame,
            current: vec![0; size],
            next: vec![0; size],
            steps: vec![0; size],
            frames: Vec::new(),
        }
    }

    /// Generator thread body: drain the queue until told to stop.
    pub fn run(&mut self) {
        while let Some(update) = self.pop_update() {
            let result = if update.immediate {
                self.generate_immediate(update)
            } else {
                self.generate_batch(update)
            };

            if let Err(err) = result {
                log::error!("waveform generation failed: {err}");
                return;
            }
        }
    }

    /// Blocks until an update is available or shutdown is requested.
    fn pop_update(&mut self) -> Option<Update> {
        let shared = Arc::clone(&self.shared);
        let mut queue = shared.queue.lock().unwrap();

        while queue.updates.is_empty() && !queue.stopping {
            queue = shared.updates_cv.wait(queue).unwrap();
        }

        if queue.stopping {
            return None;
        }

        let update = queue.updates.pop_front()?;
        shared.trace.update_dequeued(update.ids[0]);
        Some(update)
    }

    /// Folds compatible queued peers into the in-flight update.
    ///
    /// Scans from the queue front and stops at the first peer with a
    /// different mode or immediacy. In immediate mode a peer that would
    /// change the target of a pixel currently in transition also stops the
    /// scan, unmerged. Merged peers write their targets into `next`, union
    /// their region in, and append their ids.
    fn merge_updates(&mut self, current: &mut Update) {
        let shared = Arc::clone(&self.shared);
        let mut queue = shared.queue.lock().unwrap();

        loop {
            let compatible = match queue.updates.front() {
                None => break,
                Some(peer) => {
                    peer.immediate == current.immediate
                        && peer.mode == current.mode
                        && !(current.immediate && self.peer_retargets_transition(peer))
                }
            };

            if !compatible {
                break;
            }

            let Some(peer) = queue.updates.pop_front() else {
                break;
            };

            peer.apply(&mut self.next, self.spec.epd_width);
            current.region.extend(&peer.region);
            current.ids.extend_from_slice(&peer.ids);
        }
    }

    /// True when the peer assigns a new target to any in-transition pixel.
    fn peer_retargets_transition(&self, peer: &Update) -> bool {
        let width = self.spec.epd_width as usize;

        let mut src = 0;
        let mut base = peer.region.top as usize * width + peer.region.left as usize;

        for _ in 0..peer.region.height {
            for offset in 0..peer.region.width as usize {
                let idx = base + offset;
                if self.steps[idx] > 0 && self.next[idx] != peer.buffer[src] {
                    return true;
                }
                src += 1;
            }
            base += width;
        }

        false
    }

    /// Batched generation: one frame per waveform step, all steps up front.
    fn generate_batch(&mut self, mut update: Update) -> Result<(), WaveformError> {
        let table = Arc::clone(&self.table);
        let temperature = self.shared.temperature.load(Ordering::Relaxed);
        let waveform = table.lookup(update.mode, temperature)?;

        self.next.copy_from_slice(&self.current);
        update.apply(&mut self.next, self.spec.epd_width);

        self.merge_updates(&mut update);

        let aligned = update.region.align(PIXELS_PER_WORD);

        self.frames.clear();
        self.frames.reserve(waveform.len());

        for k in 0..waveform.len() {
            let mut frame = self.null_frame.clone();
            pack_frame(
                self.spec,
                waveform.matrix(k),
                &update.region,
                &aligned,
                &self.current,
                &self.next,
                &mut frame,
            );
            self.frames.push(frame);
            self.shared.trace.frame_generated(&update.ids);
        }

        self.send_frames(BatchInfo::of(&update));
        self.current.copy_from_slice(&self.next);
        Ok(())
    }

    /// Step-tracking generation: one frame per vsync, each pixel advancing
    /// through the waveform independently.
    ///
    /// Used for incremental drawing, where every flip must reflect the
    /// pixels' current step. The working region shrinks to the still-active
    /// subregion after each frame, and compatible peers can merge in
    /// mid-animation.
    fn generate_immediate(&mut self, mut update: Update) -> Result<(), WaveformError> {
        let table = Arc::clone(&self.table);
        let temperature = self.shared.temperature.load(Ordering::Relaxed);
        let waveform = table.lookup(update.mode, temperature)?;
        let step_count = waveform.len() as u32;

        if step_count == 0 {
            return Ok(());
        }

        self.steps.fill(0);
        self.next.copy_from_slice(&self.current);
        update.apply(&mut self.next, self.spec.epd_width);

        let width = self.spec.epd_width as usize;
        let stride = self.spec.stride();
        let depth = self.spec.buf_depth;

        loop {
            self.merge_updates(&mut update);

            let aligned = update.region.align(PIXELS_PER_WORD);
            let mut frame = self.null_frame.clone();
            let mut active = UpdateRegion::default();
            let mut finished = true;

            let mut src = update.region.top as usize * width + update.region.left as usize;

            for y in aligned.top..aligned.top + aligned.height {
                let mut dst = (self.spec.margin_top + y) as usize * stride
                    + (self.spec.margin_left as usize
                        + aligned.left as usize / PIXELS_PER_WORD as usize)
                        * depth;

                for sx in
                    (aligned.left..aligned.left + aligned.width).step_by(PIXELS_PER_WORD as usize)
                {
                    let mut phases: u16 = 0;

                    for x in sx..sx + PIXELS_PER_WORD {
                        phases <<= 2;

                        if update.region.contains(x, y) {
                            if self.current[src] != self.next[src] {
                                finished = false;

                                let phase = waveform
                                    .matrix(self.steps[src] as usize)
                                    .at(self.current[src], self.next[src]);
                                active.extend_point(x, y);
                                self.steps[src] += 1;

                                if self.steps[src] == step_count {
                                    // Transition complete: commit and allow
                                    // further transitions on this pixel
                                    self.steps[src] = 0;
                                    self.current[src] = self.next[src];
                                }

                                phases |= phase.code() as u16;
                            }

                            src += 1;
                        }
                    }

                    frame[dst..dst + 2].copy_from_slice(&phases.to_le_bytes());
                    dst += depth;
                }

                src += width - update.region.width as usize;
            }

            if finished {
                // The frame is a no-op; drop it instead of flipping
                return Ok(());
            }

            self.frames.clear();
            self.frames.push(frame);
            self.shared.trace.frame_generated(&update.ids);
            self.send_frames(BatchInfo::of(&update));

            update.region = active;
        }
    }

    /// Hands the generated batch to the vsync side, blocking until the slot
    /// is free. Returns without sending when shutdown is requested.
    fn send_frames(&mut self, info: BatchInfo) {
        let shared = Arc::clone(&self.shared);
        let mut handoff = shared.handoff.lock().unwrap();

        while !handoff.can_write && !handoff.stopping_generator {
            handoff = shared.can_write_cv.wait(handoff).unwrap();
        }

        if handoff.stopping_generator {
            return;
        }

        mem::swap(&mut self.frames, &mut handoff.frames);
        let frame_count = handoff.frames.len();
        handoff.info = info;
        handoff.can_write = false;
        handoff.can_read = true;

        shared.trace.batch_submitted(&handoff.info, frame_count);
        shared.can_read_cv.notify_one();
    }
}

/// Encodes one waveform step over the aligned region into a frame.
///
/// `region` bounds the pixels actually updating; `aligned` extends it to
/// whole packed groups. Lanes outside `region` stay zero. The intensity
/// cursor walks `region` row by row while the destination walks `aligned`,
/// mirroring how the planes are addressed.
fn pack_frame(
    spec: &PanelSpec,
    matrix: &PhaseMatrix,
    region: &UpdateRegion,
    aligned: &UpdateRegion,
    prev: &[Intensity],
    next: &[Intensity],
    frame: &mut [u8],
) {
    let width = spec.epd_width as usize;
    let stride = spec.stride();
    let depth = spec.buf_depth;

    let mut src = region.top as usize * width + region.left as usize;

    for y in aligned.top..aligned.top + aligned.height {
        let mut dst = (spec.margin_top + y) as usize * stride
            + (spec.margin_left as usize + aligned.left as usize / PIXELS_PER_WORD as usize)
                * depth;

        for sx in (aligned.left..aligned.left + aligned.width).step_by(PIXELS_PER_WORD as usize) {
            let mut phases: u16 = 0;

            for x in sx..sx + PIXELS_PER_WORD {
                phases <<= 2;

                if region.contains(x, y) {
                    phases |= matrix.at(prev[src], next[src]).code() as u16;
                    src += 1;
                }
            }

            frame[dst..dst + 2].copy_from_slice(&phases.to_le_bytes());
            dst += depth;
        }

        src += width - region.width as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NullTrace;
    use inkwave_specs::{ModeKind, Phase, Waveform};
    use std::time::Duration;

    static PANEL_8X1: PanelSpec = PanelSpec {
        name: "test 8×1",
        epd_width: 8,
        epd_height: 1,
        buf_width: 1,
        buf_height: 1,
        buf_total_frames: 2,
        buf_depth: 4,
        margin_top: 0,
        margin_left: 0,
        control_row_first: &[],
        control_rows_sync: &[],
        control_rows_data: &[],
    };

    static PANEL_24X1: PanelSpec = PanelSpec {
        name: "test 24×1",
        epd_width: 24,
        epd_height: 1,
        buf_width: 3,
        buf_height: 1,
        buf_total_frames: 2,
        buf_depth: 4,
        margin_top: 0,
        margin_left: 0,
        control_row_first: &[],
        control_rows_sync: &[],
        control_rows_data: &[],
    };

    static PANEL_MARGINS: PanelSpec = PanelSpec {
        name: "test margins",
        epd_width: 8,
        epd_height: 1,
        buf_width: 2,
        buf_height: 2,
        buf_total_frames: 2,
        buf_depth: 4,
        margin_top: 1,
        margin_left: 1,
        control_row_first: &[],
        control_rows_sync: &[],
        control_rows_data: &[],
    };

    fn shared() -> Arc<Shared> {
        Arc::new(Shared::new(Duration::from_secs(1), Arc::new(NullTrace)))
    }

    fn generator(
        spec: &'static PanelSpec,
        table: WaveformTable,
        shared: &Arc<Shared>,
    ) -> FrameGenerator {
        FrameGenerator::new(spec, Arc::new(table), Arc::clone(shared), spec.null_frame())
    }

    /// Single-step matrix sending 0 → 31 with a toggle and 0 → 7 with black.
    fn toggle_table() -> WaveformTable {
        let mut matrix = PhaseMatrix::noop();
        matrix.set(0, 31, Phase::Toggle);
        matrix.set(0, 7, Phase::Black);
        WaveformTable::uniform([(ModeKind::Du, Waveform::new(vec![matrix]))])
    }

    fn word_at(frame: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([frame[offset], frame[offset + 1]])
    }

    /// Takes the pending batch out of the handoff slot and releases it.
    fn take_batch(shared: &Shared) -> (Vec<Vec<u8>>, BatchInfo) {
        let mut handoff = shared.handoff.lock().unwrap();
        assert!(handoff.can_read, "no batch pending");

        let frames = mem::take(&mut handoff.frames);
        let info = handoff.info.clone();
        handoff.can_read = false;
        handoff.can_write = true;

        (frames, info)
    }

    /// Waits for the generator thread to submit a batch, then releases it.
    fn wait_batch(shared: &Shared, timeout: Duration) -> Option<(Vec<Vec<u8>>, BatchInfo)> {
        let handoff = shared.handoff.lock().unwrap();
        let (mut handoff, _) = shared
            .can_read_cv
            .wait_timeout_while(handoff, timeout, |h| !h.can_read)
            .unwrap();

        if !handoff.can_read {
            return None;
        }

        let frames = mem::take(&mut handoff.frames);
        let info = handoff.info.clone();
        handoff.can_read = false;
        handoff.can_write = true;
        drop(handoff);

        shared.can_write_cv.notify_one();
        Some((frames, info))
    }

    fn push(shared: &Shared, update: Update) {
        shared.queue.lock().unwrap().updates.push_back(update);
    }

    #[test]
    fn batch_packs_full_row_toggle() {
        // S1: 8×1 panel, one update covering the row, 1-step waveform
        let shared = shared();
        let mut gen = generator(&PANEL_8X1, toggle_table(), &shared);

        let update = Update::single(0, false, UpdateRegion::new(0, 0, 8, 1), vec![31; 8]);
        gen.generate_batch(update).unwrap();

        let (frames, info) = take_batch(&shared);
        assert_eq!(frames.len(), 1);
        assert_eq!(word_at(&frames[0], 0), 0xFFFF);
        assert_eq!(&frames[0][2..4], &[0, 0]);

        assert_eq!(info.region, UpdateRegion::new(0, 0, 8, 1));
        assert_eq!(gen.current, vec![31; 8]);
        assert_eq!(gen.current, gen.next);
    }

    #[test]
    fn batch_respects_margins() {
        let shared = shared();
        let mut gen = generator(&PANEL_MARGINS, toggle_table(), &shared);

        let update = Update::single(0, false, UpdateRegion::new(0, 0, 8, 1), vec![31; 8]);
        gen.generate_batch(update).unwrap();

        let (frames, _) = take_batch(&shared);
        let stride = PANEL_MARGINS.stride();

        // Phase word lands one row down, one group in
        assert_eq!(word_at(&frames[0], stride + 4), 0xFFFF);
        assert_eq!(word_at(&frames[0], 0), 0);
    }

    #[test]
    fn batch_merges_disjoint_updates_of_same_mode() {
        // S2: two disjoint updates fold into one batch with unioned region
        let shared = shared();
        let mut gen = generator(&PANEL_24X1, toggle_table(), &shared);

        let first = Update::single(0, false, UpdateRegion::new(0, 0, 8, 1), vec![31; 8]);
        let second = Update::single(0, false, UpdateRegion::new(0, 16, 8, 1), vec![7; 8]);
        let (id1, id2) = (first.ids[0], second.ids[0]);
        push(&shared, second);

        gen.generate_batch(first).unwrap();

        let (frames, info) = take_batch(&shared);
        assert_eq!(info.ids, vec![id1, id2]);
        assert_eq!(info.region, UpdateRegion::new(0, 0, 24, 1));
        assert!(shared.queue.lock().unwrap().updates.is_empty());

        assert_eq!(word_at(&frames[0], 0), 0xFFFF);
        assert_eq!(word_at(&frames[0], 4), 0x0000); // untouched middle group
        assert_eq!(word_at(&frames[0], 8), 0x5555); // black lanes for 0 → 7

        // Post-condition: current equals next over the union
        assert_eq!(&gen.current[0..8], &[31; 8]);
        assert_eq!(&gen.current[8..16], &[0; 8]);
        assert_eq!(&gen.current[16..24], &[7; 8]);
    }

    #[test]
    fn batch_does_not_merge_across_modes() {
        // S3: queue head with a different mode stays queued
        let mut matrix = PhaseMatrix::noop();
        matrix.set(0, 31, Phase::Toggle);
        let table = WaveformTable::uniform([
            (ModeKind::Du, Waveform::new(vec![matrix.clone()])),
            (ModeKind::A2, Waveform::new(vec![matrix])),
        ]);

        let shared = shared();
        let mut gen = generator(&PANEL_8X1, table, &shared);

        let first = Update::single(0, false, UpdateRegion::new(0, 0, 8, 1), vec![31; 8]);
        let second = Update::single(1, false, UpdateRegion::new(0, 0, 8, 1), vec![0; 8]);
        let id1 = first.ids[0];
        push(&shared, second);

        gen.generate_batch(first).unwrap();

        let (_, info) = take_batch(&shared);
        assert_eq!(info.ids, vec![id1]);

        let queue = shared.queue.lock().unwrap();
        assert_eq!(queue.updates.len(), 1);
        assert_eq!(queue.updates[0].mode, 1);
    }

    #[test]
    fn immediate_steps_pixel_through_waveform() {
        // S4: 4-step waveform on one pixel emits 4 frames then terminates
        let steps = [Phase::Black, Phase::White, Phase::Toggle, Phase::Black];
        let waveform = Waveform::new(steps.iter().map(|&p| PhaseMatrix::filled(p)).collect());
        let table = WaveformTable::uniform([(ModeKind::Du, waveform)]);

        let shared = shared();
        let mut gen = generator(&PANEL_8X1, table, &shared);

        let update = Update::single(0, true, UpdateRegion::new(0, 0, 1, 1), vec![31]);
        let worker = std::thread::spawn(move || {
            gen.generate_immediate(update).unwrap();
            gen
        });

        let mut words = Vec::new();
        while let Some((frames, info)) = wait_batch(&shared, Duration::from_millis(500)) {
            assert_eq!(frames.len(), 1, "immediate batches carry a single frame");
            assert_eq!(info.region, UpdateRegion::new(0, 0, 1, 1));
            words.push(word_at(&frames[0], 0));
        }

        // Pixel 0 occupies the most significant bit pair
        assert_eq!(words, vec![0x4000, 0x8000, 0xC000, 0x4000]);

        let gen = worker.join().unwrap();
        assert_eq!(gen.current[0], 31);
        assert_eq!(gen.current, gen.next);
        assert!(gen.steps.iter().all(|&s| s == 0));
    }

    #[test]
    fn immediate_terminates_within_waveform_length_passes() {
        // Mixed targets all settle in at most len(waveform) passes
        let waveform = Waveform::new(vec![PhaseMatrix::filled(Phase::Toggle); 3]);
        let table = WaveformTable::uniform([(ModeKind::Du, waveform)]);

        let shared = shared();
        let mut gen = generator(&PANEL_8X1, table, &shared);

        let update = Update::single(
            0,
            true,
            UpdateRegion::new(0, 0, 8, 1),
            vec![1, 0, 2, 0, 3, 0, 4, 5],
        );
        let worker = std::thread::spawn(move || {
            gen.generate_immediate(update).unwrap();
            gen
        });

        let mut batches = 0;
        while wait_batch(&shared, Duration::from_millis(500)).is_some() {
            batches += 1;
        }
        assert_eq!(batches, 3);

        let gen = worker.join().unwrap();
        assert_eq!(gen.current, vec![1, 0, 2, 0, 3, 0, 4, 5]);
    }

    #[test]
    fn immediate_shrinks_region_to_active_pixels() {
        // A settled pixel drops out of the region after its last step
        let waveform = Waveform::new(vec![PhaseMatrix::filled(Phase::Toggle); 2]);
        let table = WaveformTable::uniform([(ModeKind::Du, waveform)]);

        let shared = shared();
        let mut gen = generator(&PANEL_24X1, table, &shared);
        gen.current[23] = 9;
        gen.next[23] = 9;

        // Only pixels 0 and 23 change; 23 already matches, so the active
        // region collapses to pixel 0 on the first pass
        let mut buffer = vec![0; 24];
        buffer[0] = 31;
        buffer[23] = 9;
        let update = Update::single(0, true, UpdateRegion::new(0, 0, 24, 1), buffer);

        let worker = std::thread::spawn(move || {
            gen.generate_immediate(update).unwrap();
            gen
        });

        let mut regions = Vec::new();
        while let Some((_, info)) = wait_batch(&shared, Duration::from_millis(500)) {
            regions.push(info.region);
        }

        assert_eq!(
            regions,
            vec![
                UpdateRegion::new(0, 0, 24, 1),
                UpdateRegion::new(0, 0, 1, 1),
            ]
        );
        worker.join().unwrap();
    }

    #[test]
    fn merge_rejects_retarget_of_transitioning_pixel() {
        // Property 5: a peer may not change the target of a pixel mid-flight
        let shared = shared();
        let mut gen = generator(&PANEL_8X1, toggle_table(), &shared);

        gen.current[0] = 0;
        gen.next[0] = 5;
        gen.steps[0] = 1;

        let peer = Update::single(0, true, UpdateRegion::new(0, 0, 1, 1), vec![9]);
        push(&shared, peer);

        let mut current = Update::single(0, true, UpdateRegion::new(0, 0, 8, 1), vec![0; 8]);
        let original_ids = current.ids.clone();
        gen.merge_updates(&mut current);

        assert_eq!(shared.queue.lock().unwrap().updates.len(), 1);
        assert_eq!(gen.next[0], 5, "target of in-transition pixel must not move");
        assert_eq!(current.ids, original_ids);
    }

    #[test]
    fn merge_accepts_peer_matching_transition_target() {
        let shared = shared();
        let mut gen = generator(&PANEL_8X1, toggle_table(), &shared);

        gen.current[0] = 0;
        gen.next[0] = 5;
        gen.steps[0] = 1;

        let peer = Update::single(0, true, UpdateRegion::new(0, 0, 1, 1), vec![5]);
        let peer_id = peer.ids[0];
        push(&shared, peer);

        let mut current = Update::single(0, true, UpdateRegion::new(0, 0, 8, 1), vec![0; 8]);
        gen.merge_updates(&mut current);

        assert!(shared.queue.lock().unwrap().updates.is_empty());
        assert_eq!(current.ids.len(), 2);
        assert_eq!(current.ids[1], peer_id);
    }

    #[test]
    fn merge_stops_at_first_incompatible_peer() {
        let shared = shared();
        let mut gen = generator(&PANEL_24X1, toggle_table(), &shared);

        let blocker = Update::single(0, true, UpdateRegion::new(0, 8, 8, 1), vec![31; 8]);
        let mergeable = Update::single(0, false, UpdateRegion::new(0, 16, 8, 1), vec![7; 8]);
        push(&shared, blocker);
        push(&shared, mergeable);

        let mut current = Update::single(0, false, UpdateRegion::new(0, 0, 8, 1), vec![31; 8]);
        gen.merge_updates(&mut current);

        // The immediate peer blocks the scan even though a batch peer follows
        assert_eq!(shared.queue.lock().unwrap().updates.len(), 2);
        assert_eq!(current.region, UpdateRegion::new(0, 0, 8, 1));
    }

    #[test]
    fn pack_frame_zeroes_lanes_outside_region() {
        // Unaligned region: pixels 2..5 of an 8-pixel group
        let shared = shared();
        let mut gen = generator(&PANEL_8X1, toggle_table(), &shared);

        let update = Update::single(0, false, UpdateRegion::new(0, 2, 3, 1), vec![31; 3]);
        gen.generate_batch(update).unwrap();

        let (frames, _) = take_batch(&shared);

        // Lanes 2, 3, 4 carry toggles; everything else is zero
        let expected = (0b11 << 10) | (0b11 << 8) | (0b11 << 6);
        assert_eq!(word_at(&frames[0], 0), expected);

        assert_eq!(&gen.current[0..8], &[0, 0, 31, 31, 31, 0, 0, 0]);
    }

    #[test]
    fn empty_waveform_generates_no_frames() {
        let table = WaveformTable::uniform([(ModeKind::Du, Waveform::default())]);
        let shared = shared();
        let mut gen = generator(&PANEL_8X1, table, &shared);

        let update = Update::single(0, false, UpdateRegion::new(0, 0, 8, 1), vec![31; 8]);
        gen.generate_batch(update).unwrap();

        let (frames, _) = take_batch(&shared);
        assert!(frames.is_empty());
        // The intensities still commit
        assert_eq!(gen.current, vec![31; 8]);
    }
}
