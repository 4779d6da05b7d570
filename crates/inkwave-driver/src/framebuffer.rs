//! Linux framebuffer device access
//!
//! The panel driver exposes a multi-page framebuffer; pages are filled with
//! packed phase frames and scheduled with pan-display ioctls that block
//! until vsync. [`PanelDevice`] is the seam between the update pipeline and
//! the hardware so tests and dry runs can substitute an in-memory panel.

use crate::error::DisplayError;
use inkwave_specs::PanelSpec;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;
pub const FBIOPUT_VSCREENINFO: libc::c_ulong = 0x4601;
pub const FBIOGET_FSCREENINFO: libc::c_ulong = 0x4602;
pub const FBIOPAN_DISPLAY: libc::c_ulong = 0x4606;
pub const FBIOBLANK: libc::c_ulong = 0x4611;

pub const FB_BLANK_UNBLANK: libc::c_ulong = 0;
pub const FB_BLANK_POWERDOWN: libc::c_ulong = 4;

/// Color channel description inside `fb_var_screeninfo`.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct Bitfield {
    pub offset: u32,
    pub length: u32,
    pub msb_right: u32,
}

/// Mirror of the kernel's `fb_var_screeninfo`.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct VarScreenInfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: Bitfield,
    pub green: Bitfield,
    pub blue: Bitfield,
    pub transp: Bitfield,
    pub nonstd: u32,
    pub activate: u32,
    pub height: u32,
    pub width: u32,
    pub accel_flags: u32,
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

/// Mirror of the kernel's `fb_fix_screeninfo`.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct FixScreenInfo {
    pub id: [u8; 16],
    pub smem_start: libc::c_ulong,
    pub smem_len: u32,
    pub kind: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    pub line_length: u32,
    pub mmio_start: libc::c_ulong,
    pub mmio_len: u32,
    pub accel: u32,
    pub capabilities: u16,
    pub reserved: [u16; 2],
}

impl Default for FixScreenInfo {
    fn default() -> Self {
        // All-zero is the conventional initial value for ioctl out-params
        unsafe { std::mem::zeroed() }
    }
}

/// Panel seen by the update pipeline
///
/// One implementation drives real hardware ([`EpdFramebuffer`]); the mock
/// panel records everything for inspection instead.
pub trait PanelDevice: Send {
    /// Geometry of the panel behind this device.
    fn spec(&self) -> &'static PanelSpec;

    /// Copies one full frame into a physical page.
    fn write_frame(&mut self, page: usize, frame: &[u8]) -> Result<(), DisplayError>;

    /// Schedules a page for display.
    ///
    /// The very first flip after a start programs the screen configuration;
    /// every later flip pans, which blocks until the previous frame's vsync
    /// and is the pipeline's sole pacing mechanism.
    fn flip(&mut self, page: usize, first: bool) -> Result<(), DisplayError>;

    /// Powers the panel on or off. Idempotent.
    fn set_power(&mut self, on: bool) -> Result<(), DisplayError>;
}

/// Real panel behind a Linux framebuffer node
///
/// Opening queries and validates the screen geometry against the panel
/// specification, then maps the whole multi-page framebuffer.
pub struct EpdFramebuffer {
    file: File,
    spec: &'static PanelSpec,
    var_info: VarScreenInfo,
    map: *mut u8,
    map_len: usize,
    power_on: bool,
}

// The mapping is owned exclusively by this value and unmapped on drop.
unsafe impl Send for EpdFramebuffer {}

impl EpdFramebuffer {
    /// Opens and maps the framebuffer at `path`.
    pub fn open(path: impl AsRef<Path>, spec: &'static PanelSpec) -> Result<Self, DisplayError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DisplayError::io("open framebuffer device", e))?;
        let fd = file.as_raw_fd();

        let mut var_info = VarScreenInfo::default();
        if unsafe { libc::ioctl(fd, FBIOGET_VSCREENINFO, &mut var_info) } == -1 {
            return Err(DisplayError::last_os_error("fetch variable screen info"));
        }

        let mut fix_info = FixScreenInfo::default();
        if unsafe { libc::ioctl(fd, FBIOGET_FSCREENINFO, &mut fix_info) } == -1 {
            return Err(DisplayError::last_os_error("fetch fixed screen info"));
        }

        validate(spec, &var_info, &fix_info)?;

        let map_len = fix_info.smem_len as usize;
        let map = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if map == libc::MAP_FAILED {
            return Err(DisplayError::last_os_error("map framebuffer memory"));
        }

        Ok(Self {
            file,
            spec,
            var_info,
            map: map.cast(),
            map_len,
            power_on: false,
        })
    }
}

impl PanelDevice for EpdFramebuffer {
    fn spec(&self) -> &'static PanelSpec {
        self.spec
    }

    fn write_frame(&mut self, page: usize, frame: &[u8]) -> Result<(), DisplayError> {
        let frame_size = self.spec.frame_size();

        if page >= self.spec.buf_total_frames as usize || frame.len() != frame_size {
            return Err(DisplayError::InvalidFramebuffer(format!(
                "frame write out of bounds: page {page}, {} bytes",
                frame.len()
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(frame.as_ptr(), self.map.add(page * frame_size), frame_size);
        }

        Ok(())
    }

    fn flip(&mut self, page: usize, first: bool) -> Result<(), DisplayError> {
        self.var_info.yoffset = page as u32 * self.spec.buf_height;

        let (request, context) = if first {
            (FBIOPUT_VSCREENINFO, "program screen configuration")
        } else {
            (FBIOPAN_DISPLAY, "pan display")
        };

        if unsafe { libc::ioctl(self.file.as_raw_fd(), request, &mut self.var_info) } == -1 {
            return Err(DisplayError::last_os_error(context));
        }

        Ok(())
    }

    fn set_power(&mut self, on: bool) -> Result<(), DisplayError> {
        if on == self.power_on {
            return Ok(());
        }

        let blank = if on { FB_BLANK_UNBLANK } else { FB_BLANK_POWERDOWN };

        if unsafe { libc::ioctl(self.file.as_raw_fd(), FBIOBLANK, blank) } == -1 {
            return Err(DisplayError::last_os_error("blank framebuffer"));
        }

        self.power_on = on;
        Ok(())
    }
}

impl Drop for EpdFramebuffer {
    fn drop(&mut self) {
        if !self.map.is_null() {
            unsafe {
                libc::munmap(self.map.cast(), self.map_len);
            }
        }
    }
}

/// Checks the kernel-reported geometry against the panel specification.
pub(crate) fn validate(
    spec: &PanelSpec,
    var: &VarScreenInfo,
    fix: &FixScreenInfo,
) -> Result<(), DisplayError> {
    if var.xres != spec.buf_width || var.yres != spec.buf_height {
        return Err(DisplayError::InvalidFramebuffer(format!(
            "resolution {}×{}, expected {}×{}",
            var.xres, var.yres, spec.buf_width, spec.buf_height
        )));
    }

    if var.xres_virtual != spec.buf_width
        || var.yres_virtual != spec.buf_height * spec.buf_total_frames
    {
        return Err(DisplayError::InvalidFramebuffer(format!(
            "virtual resolution {}×{}, expected {}×{}",
            var.xres_virtual,
            var.yres_virtual,
            spec.buf_width,
            spec.buf_height * spec.buf_total_frames
        )));
    }

    let needed = spec.frame_size() * spec.buf_total_frames as usize;
    if (fix.smem_len as usize) < needed {
        return Err(DisplayError::InvalidFramebuffer(format!(
            "{} bytes of screen memory, need {needed}",
            fix.smem_len
        )));
    }

    Ok(())
}
