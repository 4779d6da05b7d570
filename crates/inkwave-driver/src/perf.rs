//! Performance report sink
//!
//! Collects per-update timestamps through the [`TraceSink`] hooks and
//! renders them as CSV, one row per displayed batch:
//!
//! ```csv
//! id,mode,width,height,queue_time,dequeue_time,generate_times,vsync_times
//! ```
//!
//! Timestamps are microseconds on the injected [`Clock`]; the id and
//! time-list columns hold colon-separated values.

use crate::region::UpdateRegion;
use crate::trace::{Clock, MonotonicClock, TraceSink};
use crate::update::{BatchInfo, UpdateId};
use inkwave_specs::ModeId;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct PendingTimes {
    generate: Vec<Duration>,
    vsync: Vec<Duration>,
}

struct Record {
    ids: Vec<UpdateId>,
    mode: ModeId,
    width: u32,
    height: u32,
    queue_time: Duration,
    dequeue_time: Duration,
    generate_times: Vec<Duration>,
    vsync_times: Vec<Duration>,
}

#[derive(Default)]
struct State {
    queued: HashMap<UpdateId, Duration>,
    dequeued: HashMap<UpdateId, Duration>,
    // Keyed by the first id of the in-flight batch
    pending: HashMap<UpdateId, PendingTimes>,
    records: Vec<Record>,
}

/// CSV performance recorder
///
/// Install with [`DisplayConfig::trace`](crate::DisplayConfig) and read the
/// report after the run with [`PerfReport::render`].
pub struct PerfReport {
    clock: Box<dyn Clock>,
    state: Mutex<State>,
}

impl PerfReport {
    pub fn new() -> Self {
        Self::with_clock(Box::new(MonotonicClock::new()))
    }

    /// Uses a caller-provided clock instead of the monotonic default.
    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// Number of completed batch rows so far.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the report as CSV with a header row.
    pub fn render(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut out =
            String::from("id,mode,width,height,queue_time,dequeue_time,generate_times,vsync_times\n");

        for record in &state.records {
            let _ = write!(out, "{}", join_ids(&record.ids));
            let _ = writeln!(
                out,
                ",{},{},{},{},{},{},{}",
                record.mode,
                record.width,
                record.height,
                record.queue_time.as_micros(),
                record.dequeue_time.as_micros(),
                join_times(&record.generate_times),
                join_times(&record.vsync_times),
            );
        }

        out
    }

    fn record_vsync_time(&self, info: &BatchInfo) {
        let Some(&first) = info.ids.first() else { return };
        let now = self.clock.now();
        self.state
            .lock()
            .unwrap()
            .pending
            .entry(first)
            .or_default()
            .vsync
            .push(now);
    }
}

impl Default for PerfReport {
    fn default() -> Self {
        Self::new()
    }
}

fn join_ids(ids: &[UpdateId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(":")
}

fn join_times(times: &[Duration]) -> String {
    times
        .iter()
        .map(|t| t.as_micros().to_string())
        .collect::<Vec<_>>()
        .join(":")
}

impl TraceSink for PerfReport {
    fn update_queued(&self, id: UpdateId, _mode: ModeId, _region: &UpdateRegion) {
        let now = self.clock.now();
        self.state.lock().unwrap().queued.insert(id, now);
    }

    fn update_dequeued(&self, id: UpdateId) {
        let now = self.clock.now();
        self.state.lock().unwrap().dequeued.insert(id, now);
    }

    fn frame_generated(&self, ids: &[UpdateId]) {
        let Some(&first) = ids.first() else { return };
        let now = self.clock.now();
        self.state
            .lock()
            .unwrap()
            .pending
            .entry(first)
            .or_default()
            .generate
            .push(now);
    }

    fn batch_started(&self, info: &BatchInfo) {
        self.record_vsync_time(info);
    }

    fn frame_flipped(&self, info: &BatchInfo) {
        self.record_vsync_time(info);
    }

    fn batch_completed(&self, info: &BatchInfo) {
        let Some(&first) = info.ids.first() else { return };
        let mut state = self.state.lock().unwrap();

        let times = state.pending.remove(&first).unwrap_or_default();
        let queue_time = state.queued.get(&first).copied().unwrap_or_default();
        let dequeue_time = state.dequeued.get(&first).copied().unwrap_or_default();

        state.records.push(Record {
            ids: info.ids.clone(),
            mode: info.mode,
            width: info.region.width,
            height: info.region.height,
            queue_time,
            dequeue_time,
            generate_times: times.generate,
            vsync_times: times.vsync,
        });
    }
}
