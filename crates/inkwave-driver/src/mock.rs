//! In-memory panel for tests and dry runs
//!
//! Records every frame write, flip, and power transition so tests can assert
//! on the exact byte stream a real panel would have received.

use crate::error::DisplayError;
use crate::framebuffer::PanelDevice;
use inkwave_specs::PanelSpec;
use std::sync::{Arc, Mutex};

/// Everything a [`MockPanel`] has been asked to do, in order.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    /// `(page, frame bytes)` per frame write
    pub frames: Vec<(usize, Vec<u8>)>,
    /// `(page, first)` per flip
    pub flips: Vec<(usize, bool)>,
    /// Power transitions; only changes are recorded
    pub power: Vec<bool>,
}

/// Shared view into a mock panel's log, usable while the pipeline runs.
#[derive(Clone)]
pub struct MockHandle(Arc<Mutex<MockLog>>);

impl MockHandle {
    /// Copy of the full log.
    pub fn snapshot(&self) -> MockLog {
        self.0.lock().unwrap().clone()
    }

    /// Number of frames written so far.
    pub fn frame_count(&self) -> usize {
        self.0.lock().unwrap().frames.len()
    }

    /// Power transitions observed so far.
    pub fn power_transitions(&self) -> Vec<bool> {
        self.0.lock().unwrap().power.clone()
    }

    /// Bytes of the most recently written frame.
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.0
            .lock()
            .unwrap()
            .frames
            .last()
            .map(|(_, frame)| frame.clone())
    }
}

/// Panel device that records instead of driving hardware.
pub struct MockPanel {
    spec: &'static PanelSpec,
    log: Arc<Mutex<MockLog>>,
    power_on: bool,
}

impl MockPanel {
    pub fn new(spec: &'static PanelSpec) -> Self {
        Self {
            spec,
            log: Arc::new(Mutex::new(MockLog::default())),
            power_on: false,
        }
    }

    /// Handle for inspecting the log, including from other threads.
    pub fn handle(&self) -> MockHandle {
        MockHandle(Arc::clone(&self.log))
    }
}

impl PanelDevice for MockPanel {
    fn spec(&self) -> &'static PanelSpec {
        self.spec
    }

    fn write_frame(&mut self, page: usize, frame: &[u8]) -> Result<(), DisplayError> {
        if page >= self.spec.buf_total_frames as usize || frame.len() != self.spec.frame_size() {
            return Err(DisplayError::InvalidFramebuffer(format!(
                "frame write out of bounds: page {page}, {} bytes",
                frame.len()
            )));
        }

        let mut log = self.log.lock().unwrap();
        log.frames.push((page, frame.to_vec()));
        Ok(())
    }

    fn flip(&mut self, page: usize, first: bool) -> Result<(), DisplayError> {
        let mut log = self.log.lock().unwrap();
        log.flips.push((page, first));
        Ok(())
    }

    fn set_power(&mut self, on: bool) -> Result<(), DisplayError> {
        if on != self.power_on {
            self.power_on = on;
            let mut log = self.log.lock().unwrap();
            log.power.push(on);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TINY: PanelSpec = PanelSpec {
        name: "tiny",
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

    #[test]
    fn records_frames_and_flips() {
        let mut panel = MockPanel::new(&TINY);
        let handle = panel.handle();

        panel.write_frame(0, &[1, 2, 3, 4]).unwrap();
        panel.flip(0, true).unwrap();
        panel.write_frame(1, &[5, 6, 7, 8]).unwrap();
        panel.flip(1, false).unwrap();

        let log = handle.snapshot();
        assert_eq!(log.frames.len(), 2);
        assert_eq!(log.flips, vec![(0, true), (1, false)]);
        assert_eq!(handle.last_frame().unwrap(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn power_records_only_transitions() {
        let mut panel = MockPanel::new(&TINY);
        let handle = panel.handle();

        panel.set_power(true).unwrap();
        panel.set_power(true).unwrap();
        panel.set_power(false).unwrap();
        panel.set_power(false).unwrap();
        panel.set_power(true).unwrap();

        assert_eq!(handle.power_transitions(), vec![true, false, true]);
    }

    #[test]
    fn rejects_out_of_bounds_writes() {
        let mut panel = MockPanel::new(&TINY);

        assert!(panel.write_frame(2, &[0; 4]).is_err());
        assert!(panel.write_frame(0, &[0; 3]).is_err());
    }
}
