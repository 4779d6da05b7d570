//! Intensity canvas for composing update buffers
//!
//! A small `embedded-graphics` draw target over a 5-bit intensity plane, so
//! demos and tests can use the usual primitives and text renderers to build
//! the buffers handed to [`Display::push_update`](crate::Display::push_update).

use crate::region::UpdateRegion;
use embedded_graphics::pixelcolor::Gray8;
use embedded_graphics::prelude::*;
use inkwave_specs::Intensity;

/// Client-frame intensity buffer implementing [`DrawTarget`]
///
/// Gray values are truncated from 8 to 5 bits on draw. A fresh canvas is
/// white.
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<Intensity>,
}

impl Canvas {
    /// White canvas of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![31; width as usize * height as usize],
        }
    }

    /// Fills the whole canvas with one intensity.
    pub fn fill(&mut self, intensity: Intensity) {
        self.pixels.fill(intensity & 31);
    }

    /// Row-major intensity data, ready for `push_update`.
    pub fn data(&self) -> &[Intensity] {
        &self.pixels
    }

    /// Region covering the whole canvas at the given client position.
    pub fn region_at(&self, top: u32, left: u32) -> UpdateRegion {
        UpdateRegion::new(top, left, self.width, self.height)
    }

    /// Intensity at `(x, y)`, if inside the canvas.
    pub fn get(&self, x: u32, y: u32) -> Option<Intensity> {
        (x < self.width && y < self.height)
            .then(|| self.pixels[(y * self.width + x) as usize])
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Canvas {
    type Color = Gray8;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0
                && point.y >= 0
                && (point.x as u32) < self.width
                && (point.y as u32) < self.height
            {
                let index = point.y as usize * self.width as usize + point.x as usize;
                self.pixels[index] = color.luma() >> 3;
            }
        }

        Ok(())
    }
}
