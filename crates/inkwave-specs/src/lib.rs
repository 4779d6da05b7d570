//! Panel specifications and waveform data model for electrophoretic displays
//!
//! EPD panels driven through a Linux framebuffer expose an unusual memory
//! layout: phase data for eight pixels is packed into the low 16 bits of each
//! 32-bit group, surrounded by fixed control rows and columns. This crate
//! defines that geometry ([`PanelSpec`]) together with the waveform model
//! that turns intensity transitions into per-frame drive phases
//! ([`Waveform`], [`WaveformTable`]).
//!
//! Waveform tables can be built programmatically or exchanged as versioned
//! JSON documents. Parsing vendor waveform blobs is out of scope; JSON is the
//! interchange format used by tests and tooling.

pub mod geometry;
pub mod phase;
pub mod waveform;

pub use geometry::{PanelSpec, Intensity, INTENSITY_VALUES, PIXELS_PER_WORD};
pub use phase::Phase;
pub use waveform::{
    ModeId, ModeKind, PhaseMatrix, TemperatureRange, Waveform, WaveformError, WaveformTable,
};
