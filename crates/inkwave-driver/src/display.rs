//! Display orchestrator and vsync engine
//!
//! [`Display`] owns the panel device, the pending-update queue, and the two
//! pipeline threads: the generator turns queued updates into packed frame
//! batches, the vsync thread copies frames into physical pages and flips
//! them locked to the panel refresh.
//!
//! The two sides exchange batches through a single-slot rendezvous: the
//! generator waits until the slot is writable, swaps its batch in and marks
//! it readable; the vsync thread swaps the batch out, displays every frame,
//! then marks the slot writable again. There is no queue of batches, so the
//! generator backpressures on the panel's real refresh rate.

use crate::error::DisplayError;
use crate::framebuffer::PanelDevice;
use crate::generator::FrameGenerator;
use crate::region::{map_to_epd, transpose_intensities, UpdateRegion};
use crate::temperature::TemperatureSensor;
use crate::trace::{NullTrace, TraceSink};
use crate::update::{BatchInfo, Update};
use inkwave_specs::{Intensity, ModeId, ModeKind, PanelSpec, WaveformTable};
use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) struct PendingQueue {
    pub updates: VecDeque<Update>,
    pub stopping: bool,
}

/// Single-slot batch rendezvous between generator and vsync.
pub(crate) struct Handoff {
    pub can_write: bool,
    pub can_read: bool,
    pub stopping_generator: bool,
    pub stopping_vsync: bool,
    pub frames: Vec<Vec<u8>>,
    pub info: BatchInfo,
}

/// State shared by the caller, generator, and vsync threads.
pub(crate) struct Shared {
    pub queue: Mutex<PendingQueue>,
    pub updates_cv: Condvar,
    pub handoff: Mutex<Handoff>,
    pub can_write_cv: Condvar,
    pub can_read_cv: Condvar,
    /// Latest sensor reading, published by the vsync thread
    pub temperature: AtomicI32,
    pub power_off_timeout: Duration,
    pub trace: Arc<dyn TraceSink>,
}

impl Shared {
    pub fn new(power_off_timeout: Duration, trace: Arc<dyn TraceSink>) -> Self {
        Self {
            queue: Mutex::new(PendingQueue {
                updates: VecDeque::new(),
                stopping: false,
            }),
            updates_cv: Condvar::new(),
            handoff: Mutex::new(Handoff {
                can_write: true,
                can_read: false,
                stopping_generator: false,
                stopping_vsync: false,
                frames: Vec::new(),
                info: BatchInfo::default(),
            }),
            can_write_cv: Condvar::new(),
            can_read_cv: Condvar::new(),
            temperature: AtomicI32::new(0),
            power_off_timeout,
            trace,
        }
    }
}

/// Tunables for a [`Display`].
#[derive(Clone)]
pub struct DisplayConfig {
    /// Panel power is cut after this long without a batch to show
    pub power_off_timeout: Duration,
    /// Observer of pipeline stages; defaults to a no-op sink
    pub trace: Arc<dyn TraceSink>,
}

impl DisplayConfig {
    pub const DEFAULT_POWER_OFF_TIMEOUT: Duration = Duration::from_secs(3);
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            power_off_timeout: Self::DEFAULT_POWER_OFF_TIMEOUT,
            trace: Arc::new(NullTrace),
        }
    }
}

/// EPD update pipeline over a panel device
///
/// Updates are pushed in the client portrait frame; the pipeline transforms
/// them to panel coordinates, merges compatible neighbours, generates the
/// waveform frame sequence, and flips pages locked to vsync. Dropping a
/// running display stops both threads and powers the panel down.
pub struct Display<D: PanelDevice + 'static> {
    spec: &'static PanelSpec,
    table: Arc<WaveformTable>,
    shared: Arc<Shared>,
    device: Option<D>,
    sensor: Option<TemperatureSensor>,
    generator: Option<JoinHandle<()>>,
    vsync: Option<JoinHandle<(D, TemperatureSensor)>>,
    started: bool,
}

impl<D: PanelDevice + 'static> Display<D> {
    pub fn new(device: D, sensor: TemperatureSensor, table: WaveformTable) -> Self {
        Self::with_config(device, sensor, table, DisplayConfig::default())
    }

    pub fn with_config(
        device: D,
        sensor: TemperatureSensor,
        table: WaveformTable,
        config: DisplayConfig,
    ) -> Self {
        Self {
            spec: device.spec(),
            table: Arc::new(table),
            shared: Arc::new(Shared::new(config.power_off_timeout, config.trace)),
            device: Some(device),
            sensor: Some(sensor),
            generator: None,
            vsync: None,
            started: false,
        }
    }

    pub fn spec(&self) -> &'static PanelSpec {
        self.spec
    }

    pub fn table(&self) -> &WaveformTable {
        &self.table
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Powers the panel up, primes every physical page with the null frame,
    /// and spawns the generator and vsync threads. Idempotent once started.
    pub fn start(&mut self) -> Result<(), DisplayError> {
        if self.started {
            return Ok(());
        }

        let (Some(mut device), Some(mut sensor)) = (self.device.take(), self.sensor.take()) else {
            return Ok(());
        };

        let null_frame = match Self::power_up(&mut device, &mut sensor, &self.shared) {
            Ok(frame) => frame,
            Err(err) => {
                self.device = Some(device);
                self.sensor = Some(sensor);
                return Err(err);
            }
        };

        // Clear pipeline state left over from a previous run
        self.shared.queue.lock().unwrap().stopping = false;
        {
            let mut handoff = self.shared.handoff.lock().unwrap();
            handoff.can_write = true;
            handoff.can_read = false;
            handoff.stopping_generator = false;
            handoff.stopping_vsync = false;
            handoff.frames.clear();
        }

        let mut generator = FrameGenerator::new(
            self.spec,
            Arc::clone(&self.table),
            Arc::clone(&self.shared),
            null_frame,
        );

        let generator_handle = match thread::Builder::new()
            .name("epd-generator".into())
            .spawn(move || generator.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                self.device = Some(device);
                self.sensor = Some(sensor);
                return Err(DisplayError::io("spawn generator thread", err));
            }
        };

        let shared = Arc::clone(&self.shared);
        let vsync_handle = thread::Builder::new()
            .name("epd-vsync".into())
            .spawn(move || run_vsync(shared, device, sensor));

        let vsync_handle = match vsync_handle {
            Ok(handle) => handle,
            Err(err) => {
                // The closure owning the device was dropped; unwind the
                // generator and report the failure.
                self.shared.queue.lock().unwrap().stopping = true;
                self.shared.updates_cv.notify_one();
                let _ = generator_handle.join();
                return Err(DisplayError::io("spawn vsync thread", err));
            }
        };

        self.generator = Some(generator_handle);
        self.vsync = Some(vsync_handle);
        self.started = true;
        Ok(())
    }

    fn power_up(
        device: &mut D,
        sensor: &mut TemperatureSensor,
        shared: &Shared,
    ) -> Result<Vec<u8>, DisplayError> {
        device.set_power(true)?;
        sensor.refresh()?;
        shared.temperature.store(sensor.celsius(), Ordering::Relaxed);

        let spec = device.spec();
        let null_frame = spec.null_frame();

        for page in 0..spec.buf_total_frames as usize {
            device.write_frame(page, &null_frame)?;
        }

        Ok(null_frame)
    }

    /// Enqueues an update by mode kind.
    ///
    /// See [`push_update_by_id`](Self::push_update_by_id).
    pub fn push_update(
        &self,
        mode: ModeKind,
        immediate: bool,
        region: UpdateRegion,
        buffer: &[Intensity],
    ) -> bool {
        match self.table.mode_id_of(mode) {
            Some(mode) => self.push_update_by_id(mode, immediate, region, buffer),
            None => false,
        }
    }

    /// Enqueues an update.
    ///
    /// `region` and `buffer` are in the client portrait frame; intensities
    /// are masked to the 5-bit domain. Returns `false` without touching the
    /// queue when the buffer length does not match the region, the region
    /// falls outside the panel, or the mode id is unknown.
    pub fn push_update_by_id(
        &self,
        mode: ModeId,
        immediate: bool,
        region: UpdateRegion,
        buffer: &[Intensity],
    ) -> bool {
        if (mode as usize) >= self.table.mode_count() || buffer.len() != region.area() {
            return false;
        }

        let Some(epd_region) = map_to_epd(&region, self.spec.epd_width, self.spec.epd_height)
        else {
            return false;
        };

        let buffer = transpose_intensities(buffer, &region);

        // Id allocation happens under the queue lock so enqueue order and id
        // order always agree, even with concurrent pushers
        let mut queue = self.shared.queue.lock().unwrap();
        let update = Update::single(mode, immediate, epd_region, buffer);
        self.shared
            .trace
            .update_queued(update.ids[0], mode, &update.region);
        queue.updates.push_back(update);
        self.shared.updates_cv.notify_one();
        true
    }

    /// Stops both threads, discards pending updates, and powers the panel
    /// down. Safe to call repeatedly; also runs on drop.
    pub fn stop(&mut self) {
        if !self.started {
            if let Some(device) = self.device.as_mut() {
                if let Err(err) = device.set_power(false) {
                    log::warn!("powering panel off: {err}");
                }
            }
            return;
        }

        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.stopping = true;
            self.shared.updates_cv.notify_one();
        }
        {
            let mut handoff = self.shared.handoff.lock().unwrap();
            handoff.stopping_generator = true;
            self.shared.can_write_cv.notify_one();
        }

        if let Some(handle) = self.generator.take() {
            if handle.join().is_err() {
                log::error!("generator thread panicked");
            }
        }

        {
            let mut handoff = self.shared.handoff.lock().unwrap();
            handoff.stopping_vsync = true;
            self.shared.can_read_cv.notify_one();
        }

        if let Some(handle) = self.vsync.take() {
            match handle.join() {
                Ok((mut device, sensor)) => {
                    if let Err(err) = device.set_power(false) {
                        log::warn!("powering panel off: {err}");
                    }
                    self.device = Some(device);
                    self.sensor = Some(sensor);
                }
                Err(_) => log::error!("vsync thread panicked"),
            }
        }

        self.shared.queue.lock().unwrap().updates.clear();
        self.started = false;
    }
}

impl<D: PanelDevice + 'static> Drop for Display<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Vsync thread body. Returns the device and sensor on shutdown so the
/// orchestrator can power the panel down after joining.
fn run_vsync<D: PanelDevice>(
    shared: Arc<Shared>,
    mut device: D,
    mut sensor: TemperatureSensor,
) -> (D, TemperatureSensor) {
    let mut next_page = 0usize;
    let mut first_frame = true;
    let mut batch: Vec<Vec<u8>> = Vec::new();

    loop {
        let info = {
            let mut handoff = shared.handoff.lock().unwrap();

            if !handoff.can_read && !handoff.stopping_vsync {
                let (guard, timeout) = shared
                    .can_read_cv
                    .wait_timeout_while(handoff, shared.power_off_timeout, |h| {
                        !h.can_read && !h.stopping_vsync
                    })
                    .unwrap();
                handoff = guard;

                if timeout.timed_out() && !handoff.can_read && !handoff.stopping_vsync {
                    // Nothing to show: cut panel power until the next batch
                    if let Err(err) = device.set_power(false) {
                        log::warn!("powering panel off: {err}");
                    }

                    handoff = shared
                        .can_read_cv
                        .wait_while(handoff, |h| !h.can_read && !h.stopping_vsync)
                        .unwrap();
                }
            }

            if handoff.stopping_vsync {
                return (device, sensor);
            }

            mem::swap(&mut batch, &mut handoff.frames);
            handoff.info.clone()
        };

        shared.trace.batch_started(&info);

        if let Err(err) = device.set_power(true) {
            log::warn!("powering panel on: {err}");
        }

        if let Err(err) = sensor.refresh() {
            log::error!("reading panel temperature: {err}");
            return (device, sensor);
        }
        shared.temperature.store(sensor.celsius(), Ordering::Relaxed);

        for frame in &batch {
            next_page = (next_page + 1) % 2;

            let result = device
                .write_frame(next_page, frame)
                .and_then(|()| device.flip(next_page, first_frame));

            if let Err(err) = result {
                log::error!("vsync and flip: {err}");
                return (device, sensor);
            }

            first_frame = false;
            shared.trace.frame_flipped(&info);
        }

        shared.trace.batch_completed(&info);

        let mut handoff = shared.handoff.lock().unwrap();
        handoff.can_write = true;
        handoff.can_read = false;
        shared.can_write_cv.notify_one();
    }
}
