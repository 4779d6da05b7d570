//! Waveform tables
//!
//! An EPD pixel cannot jump between gray levels; it is driven through a
//! sequence of phases, one per frame tick. A [`Waveform`] is that sequence,
//! expressed as per-step matrices indexed by `(previous, next)` intensity.
//! Panels ship several waveform modes with different speed/fidelity
//! trade-offs, each valid over specific temperature ranges; a
//! [`WaveformTable`] holds them all and resolves `(mode, temperature)` to a
//! concrete waveform.
//!
//! Tables are built programmatically or loaded from a versioned JSON
//! document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "ranges": [{"lower": 0, "upper": 50}],
//!   "modes": [{"kind": "Du", "waveforms": [{"steps": [[["Noop", "..."]]]}]}]
//! }
//! ```

use crate::geometry::{Intensity, INTENSITY_VALUES};
use crate::phase::Phase;
use serde::{Deserialize, Serialize};

/// Index of a mode inside a [`WaveformTable`].
pub type ModeId = u8;

/// Hardware waveform modes
///
/// These correspond to the mode names used by E Ink controllers; which ones
/// a table provides depends on the panel firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeKind {
    /// Panel initialization, clears to white
    Init,
    /// Direct update, black and white only, fastest
    Du,
    /// 16-level grayscale with full clearing flashes
    Gc16,
    /// 16-level grayscale tuned for text on white
    Gl16,
    /// Animation mode, single flash, black and white only
    A2,
}

/// Per-step transition matrix: `(previous, next) → Phase`
///
/// Boxed because a matrix is a kilobyte and waveforms hold dozens of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseMatrix(Box<[[Phase; INTENSITY_VALUES]; INTENSITY_VALUES]>);

impl PhaseMatrix {
    /// Matrix driving every transition with the same phase.
    pub fn filled(phase: Phase) -> Self {
        Self(Box::new([[phase; INTENSITY_VALUES]; INTENSITY_VALUES]))
    }

    /// All-no-op matrix.
    pub fn noop() -> Self {
        Self::filled(Phase::Noop)
    }

    /// Phase to apply when moving a pixel from `prev` towards `next`.
    #[inline]
    pub fn at(&self, prev: Intensity, next: Intensity) -> Phase {
        self.0[prev as usize][next as usize]
    }

    /// Sets the phase for one `(prev, next)` transition.
    pub fn set(&mut self, prev: Intensity, next: Intensity, phase: Phase) {
        self.0[prev as usize][next as usize] = phase;
    }
}

/// Ordered sequence of phase matrices, one per frame tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waveform {
    steps: Vec<PhaseMatrix>,
}

impl Waveform {
    /// Builds a waveform from its per-step matrices.
    pub fn new(steps: Vec<PhaseMatrix>) -> Self {
        Self { steps }
    }

    /// Number of frames needed to drive a transition.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True for a zero-step waveform.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Matrix for step `k`.
    ///
    /// # Panics
    ///
    /// Panics when `k >= len()`.
    #[inline]
    pub fn matrix(&self, k: usize) -> &PhaseMatrix {
        &self.steps[k]
    }
}

/// Half-open temperature range in °C: `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub lower: i32,
    pub upper: i32,
}

impl TemperatureRange {
    pub const fn new(lower: i32, upper: i32) -> Self {
        Self { lower, upper }
    }

    /// Range covering any representable temperature.
    pub const fn full() -> Self {
        Self { lower: i32::MIN, upper: i32::MAX }
    }

    pub const fn contains(&self, temperature: i32) -> bool {
        self.lower <= temperature && temperature < self.upper
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ModeEntry {
    kind: ModeKind,
    /// One waveform per temperature range, in range order.
    waveforms: Vec<Waveform>,
}

/// Per-mode, temperature-binned waveform lookup
///
/// Modes are addressed either by [`ModeKind`] or by their stable [`ModeId`]
/// index. Every mode provides one waveform per temperature range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaveformTable {
    ranges: Vec<TemperatureRange>,
    modes: Vec<ModeEntry>,
}

impl WaveformTable {
    /// Creates an empty table with the given temperature ranges.
    pub fn new(ranges: Vec<TemperatureRange>) -> Self {
        Self { ranges, modes: Vec::new() }
    }

    /// Builds a single-range table valid at any temperature.
    ///
    /// Convenient for tests and mock panels where temperature compensation
    /// does not matter.
    pub fn uniform(modes: impl IntoIterator<Item = (ModeKind, Waveform)>) -> Self {
        let mut table = Self::new(vec![TemperatureRange::full()]);

        for (kind, waveform) in modes {
            // Single full range, one waveform per mode: cannot fail
            let _ = table.push_mode(kind, vec![waveform]);
        }

        table
    }

    /// Adds a mode and returns its id.
    ///
    /// `waveforms` must hold exactly one waveform per temperature range, and
    /// each kind may appear only once.
    pub fn push_mode(
        &mut self,
        kind: ModeKind,
        waveforms: Vec<Waveform>,
    ) -> Result<ModeId, WaveformError> {
        if waveforms.len() != self.ranges.len() {
            return Err(WaveformError::Malformed(format!(
                "mode {kind:?} has {} waveforms for {} temperature ranges",
                waveforms.len(),
                self.ranges.len()
            )));
        }

        if self.mode_id_of(kind).is_some() {
            return Err(WaveformError::Malformed(format!("duplicate mode {kind:?}")));
        }

        if self.modes.len() >= ModeId::MAX as usize {
            return Err(WaveformError::Malformed("too many modes".into()));
        }

        self.modes.push(ModeEntry { kind, waveforms });
        Ok((self.modes.len() - 1) as ModeId)
    }

    /// Number of registered modes.
    pub fn mode_count(&self) -> usize {
        self.modes.len()
    }

    /// Temperature ranges of this table, in bin order.
    pub fn ranges(&self) -> &[TemperatureRange] {
        &self.ranges
    }

    /// Resolves a mode kind to its id.
    pub fn mode_id_of(&self, kind: ModeKind) -> Option<ModeId> {
        self.modes
            .iter()
            .position(|entry| entry.kind == kind)
            .map(|index| index as ModeId)
    }

    /// Kind of the mode registered under `mode`.
    pub fn mode_kind(&self, mode: ModeId) -> Option<ModeKind> {
        self.modes.get(mode as usize).map(|entry| entry.kind)
    }

    /// Waveform for `mode` at the given panel temperature.
    pub fn lookup(&self, mode: ModeId, temperature: i32) -> Result<&Waveform, WaveformError> {
        let entry = self
            .modes
            .get(mode as usize)
            .ok_or(WaveformError::UnknownMode(mode))?;

        let bin = self
            .ranges
            .iter()
            .position(|range| range.contains(temperature))
            .ok_or(WaveformError::TemperatureOutOfRange(temperature))?;

        Ok(&entry.waveforms[bin])
    }
}

/// Waveform table errors
#[derive(Debug)]
pub enum WaveformError {
    /// Mode id not present in the table
    UnknownMode(ModeId),
    /// No temperature range covers the reading
    TemperatureOutOfRange(i32),
    /// JSON document version not understood
    UnsupportedVersion(u32),
    /// JSON syntax or type error
    Parse(String),
    /// Structurally invalid table data
    Malformed(String),
}

impl std::fmt::Display for WaveformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaveformError::UnknownMode(mode) => write!(f, "unknown waveform mode id {mode}"),
            WaveformError::TemperatureOutOfRange(t) => {
                write!(f, "no waveform covers panel temperature {t}°C")
            }
            WaveformError::UnsupportedVersion(v) => {
                write!(f, "unsupported waveform table version {v}")
            }
            WaveformError::Parse(msg) => write!(f, "waveform table parse error: {msg}"),
            WaveformError::Malformed(msg) => write!(f, "malformed waveform table: {msg}"),
        }
    }
}

impl std::error::Error for WaveformError {}

// JSON interchange format

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct JsonTable {
    version: u32,
    ranges: Vec<TemperatureRange>,
    modes: Vec<ModeEntry>,
}

impl WaveformTable {
    /// Loads a table from its JSON interchange form.
    pub fn from_json(json: &str) -> Result<Self, WaveformError> {
        let parsed: JsonTable =
            serde_json::from_str(json).map_err(|e| WaveformError::Parse(e.to_string()))?;

        if parsed.version != FORMAT_VERSION {
            return Err(WaveformError::UnsupportedVersion(parsed.version));
        }

        let mut table = WaveformTable::new(parsed.ranges);

        for entry in parsed.modes {
            table.push_mode(entry.kind, entry.waveforms)?;
        }

        Ok(table)
    }

    /// Serializes the table to its JSON interchange form.
    pub fn to_json(&self) -> Result<String, WaveformError> {
        let doc = JsonTable {
            version: FORMAT_VERSION,
            ranges: self.ranges.clone(),
            modes: self.modes.clone(),
        };

        serde_json::to_string(&doc).map_err(|e| WaveformError::Parse(e.to_string()))
    }
}
