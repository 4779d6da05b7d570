//! Panel geometry specifications
//!
//! Describes the contract an EPD framebuffer driver exposes: visible
//! resolution, packed framebuffer layout, physical page count, and the fixed
//! control template written around the pixel area.

/// Pixel gray value, 5-bit domain (0..32).
pub type Intensity = u8;

/// Number of distinct gray levels a pixel can take.
pub const INTENSITY_VALUES: usize = 32;

/// Packing quantum: EPD pixels per 16-bit phase word.
pub const PIXELS_PER_WORD: u32 = 8;

/// A run of identical control bytes, written at one byte per packed group.
pub type ControlRun = (usize, u8);

/// Complete description of an EPD panel behind a Linux framebuffer
///
/// Field values are dictated by the kernel driver; [`PanelSpec::REMARKABLE_2`]
/// matches the mxs-lcdif framebuffer of the reMarkable 2. Synthetic specs with
/// small dimensions and empty control tables are used by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSpec {
    /// Panel name, for diagnostics
    pub name: &'static str,

    /// Visible EPD width in pixels (landscape frame)
    pub epd_width: u32,

    /// Visible EPD height in pixels (landscape frame)
    pub epd_height: u32,

    /// Framebuffer width in packed 8-pixel groups
    pub buf_width: u32,

    /// Framebuffer height in rows, including control rows
    pub buf_height: u32,

    /// Physical pages provided by the driver (at least 2 for double-buffering)
    pub buf_total_frames: u32,

    /// Bytes per packed group; the phase word occupies the low two bytes
    pub buf_depth: usize,

    /// Rows between the framebuffer origin and the EPD origin
    pub margin_top: u32,

    /// Groups between the start of a row and the EPD origin
    pub margin_left: u32,

    /// Control byte runs for row 0
    pub control_row_first: &'static [ControlRun],

    /// Control byte runs for rows 1 and 2
    pub control_rows_sync: &'static [ControlRun],

    /// Control byte runs for every remaining row
    pub control_rows_data: &'static [ControlRun],
}

const RM2_ROW_FIRST: &[ControlRun] = &[
    (20, 0x43),
    (20, 0x47),
    (63, 0x45),
    (40, 0x47),
    (117, 0x43),
];

const RM2_ROWS_SYNC: &[ControlRun] = &[
    (8, 0x41),
    (11, 0x61),
    (36, 0x41),
    (200, 0x43),
    (5, 0x41),
];

const RM2_ROWS_DATA: &[ControlRun] = &[
    (8, 0x41),
    (11, 0x61),
    (7, 0x41),
    (29, 0x51),
    (200, 0x53),
    (5, 0x51),
];

impl PanelSpec {
    /// reMarkable 2 panel behind the mxs-lcdif framebuffer.
    pub const REMARKABLE_2: Self = Self {
        name: "reMarkable 2",
        epd_width: 1872,
        epd_height: 1404,
        buf_width: 260,
        buf_height: 1408,
        buf_total_frames: 17,
        buf_depth: 4,
        margin_top: 3,
        margin_left: 26,
        control_row_first: RM2_ROW_FIRST,
        control_rows_sync: RM2_ROWS_SYNC,
        control_rows_data: RM2_ROWS_DATA,
    };

    /// Bytes per framebuffer row.
    pub const fn stride(&self) -> usize {
        self.buf_width as usize * self.buf_depth
    }

    /// Bytes per physical page.
    pub const fn frame_size(&self) -> usize {
        self.stride() * self.buf_height as usize
    }

    /// Number of pixels in the visible EPD area.
    pub const fn epd_size(&self) -> usize {
        self.epd_width as usize * self.epd_height as usize
    }

    /// Checks that the visible area plus margins fits inside the framebuffer.
    pub const fn is_coherent(&self) -> bool {
        self.epd_width % PIXELS_PER_WORD == 0
            && self.margin_left + self.epd_width / PIXELS_PER_WORD <= self.buf_width
            && self.margin_top + self.epd_height <= self.buf_height
            && self.buf_depth >= 2
            && self.buf_total_frames >= 2
    }

    /// Builds the null frame: the control template every page starts from.
    ///
    /// Control bytes are written at byte offset 2 of each packed group, one
    /// group at a time, marching through the frame row by row. All other
    /// bytes stay zero, which encodes a no-op phase for every pixel.
    pub fn null_frame(&self) -> Vec<u8> {
        let mut frame = vec![0u8; self.frame_size()];
        let mut offset = 2usize;

        write_runs(&mut frame, &mut offset, self.buf_depth, self.control_row_first);

        for _ in 1..3u32.min(self.buf_height) {
            write_runs(&mut frame, &mut offset, self.buf_depth, self.control_rows_sync);
        }

        for _ in 3..self.buf_height {
            write_runs(&mut frame, &mut offset, self.buf_depth, self.control_rows_data);
        }

        frame
    }
}

fn write_runs(frame: &mut [u8], offset: &mut usize, depth: usize, runs: &[ControlRun]) {
    for &(count, value) in runs {
        for _ in 0..count {
            frame[*offset] = value;
            *offset += depth;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remarkable_2_is_coherent() {
        let spec = &PanelSpec::REMARKABLE_2;
        assert!(spec.is_coherent());
        assert_eq!(spec.stride(), 1040);
        assert_eq!(spec.frame_size(), 1040 * 1408);
        assert_eq!(spec.epd_size(), 1872 * 1404);
        // 234 data groups plus the left margin fill the row exactly
        assert_eq!(spec.margin_left + spec.epd_width / PIXELS_PER_WORD, spec.buf_width);
    }

    #[test]
    fn control_runs_cover_every_group() {
        let spec = &PanelSpec::REMARKABLE_2;
        let row_len = |runs: &[ControlRun]| runs.iter().map(|&(n, _)| n).sum::<usize>();

        assert_eq!(row_len(spec.control_row_first), spec.buf_width as usize);
        assert_eq!(row_len(spec.control_rows_sync), spec.buf_width as usize);
        assert_eq!(row_len(spec.control_rows_data), spec.buf_width as usize);
    }

    #[test]
    fn null_frame_layout() {
        let spec = &PanelSpec::REMARKABLE_2;
        let frame = spec.null_frame();
        let stride = spec.stride();

        assert_eq!(frame.len(), spec.frame_size());

        // Row 0: first run, first byte of the second run
        assert_eq!(frame[2], 0x43);
        assert_eq!(frame[2 + 19 * 4], 0x43);
        assert_eq!(frame[2 + 20 * 4], 0x47);

        // Rows 1 and 2 start with the sync pattern
        assert_eq!(frame[stride + 2], 0x41);
        assert_eq!(frame[2 * stride + 2 + 8 * 4], 0x61);

        // Data rows carry the scan pattern: 8+11+7 groups, then 29 of 0x51,
        // then 200 of 0x53
        assert_eq!(frame[3 * stride + 2 + 26 * 4], 0x51);
        assert_eq!(frame[3 * stride + 2 + 55 * 4], 0x53);
        assert_eq!(frame[(spec.buf_height as usize - 1) * stride + 2], 0x41);

        // Control bytes land only at offset 2 of each group
        for (i, &byte) in frame.iter().enumerate() {
            if i % 4 != 2 {
                assert_eq!(byte, 0, "stray byte at offset {i}");
            }
        }
    }

    #[test]
    fn empty_control_tables_yield_zero_frame() {
        static BARE: PanelSpec = PanelSpec {
            name: "bare",
            epd_width: 8,
            epd_height: 2,
            buf_width: 1,
            buf_height: 2,
            buf_total_frames: 2,
            buf_depth: 4,
            margin_top: 0,
            margin_left: 0,
            control_row_first: &[],
            control_rows_sync: &[],
            control_rows_data: &[],
        };

        assert!(BARE.is_coherent());
        assert!(BARE.null_frame().iter().all(|&b| b == 0));
    }
}
