use std::ops::{Deref, DerefMut};

use anyhow::Result;

use crate::color::Color;
use crate::output::RenderSink;

/// Strip/led dimensions of a pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub num_strips: usize,
    pub leds_per_strip: usize,
}

impl Geometry {
    pub fn new(num_strips: usize, leds_per_strip: usize) -> Self {
        Geometry {
            num_strips,
            leds_per_strip,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.num_strips * self.leds_per_strip
    }

    /// Offset of (strip, led) in the packed storage: `led * num_strips + strip`.
    #[inline]
    pub fn offset(&self, strip: usize, led: usize) -> usize {
        debug_assert!(strip < self.num_strips, "strip {strip} out of range");
        debug_assert!(led < self.leds_per_strip, "led {led} out of range");
        led * self.num_strips + strip
    }
}

/// Dense grid of packed pixel values addressed by (strip, led).
///
/// Bounds are the caller's responsibility; they are only asserted in debug
/// builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    geometry: Geometry,
    pixels: Vec<u32>,
}

impl PixelGrid {
    /// Create an all-black grid.
    pub fn new(geometry: Geometry) -> Self {
        PixelGrid {
            geometry,
            pixels: vec![0; geometry.pixel_count()],
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn num_strips(&self) -> usize {
        self.geometry.num_strips
    }

    pub fn leds_per_strip(&self) -> usize {
        self.geometry.leds_per_strip
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    /// Set every pixel to one color.
    pub fn set_color(&mut self, color: Color) {
        self.pixels.fill(color.pack());
    }

    /// Set one led index across all strips.
    pub fn set_row(&mut self, color: Color, led: usize) {
        let value = color.pack();
        let start = self.geometry.offset(0, led);
        self.pixels[start..start + self.geometry.num_strips].fill(value);
    }

    /// Set every led of one strip.
    pub fn set_column(&mut self, color: Color, strip: usize) {
        let value = color.pack();
        for led in 0..self.geometry.leds_per_strip {
            let offset = self.geometry.offset(strip, led);
            self.pixels[offset] = value;
        }
    }

    #[inline]
    pub fn set_pixel(&mut self, color: Color, strip: usize, led: usize) {
        let offset = self.geometry.offset(strip, led);
        self.pixels[offset] = color.pack();
    }

    #[inline]
    pub fn get_pixel(&self, strip: usize, led: usize) -> Color {
        Color::from_packed(self.pixels[self.geometry.offset(strip, led)])
    }

    /// Snapshot of the current contents.
    pub fn copy_pixels(&self) -> Vec<u32> {
        self.pixels.clone()
    }

    /// Overwrite from a snapshot; extra source pixels are ignored and a short
    /// source leaves the tail untouched.
    pub fn copy_from(&mut self, source: &[u32]) {
        let n = source.len().min(self.pixels.len());
        self.pixels[..n].copy_from_slice(&source[..n]);
    }

    /// Copy the current contents into an existing snapshot.
    pub fn copy_to(&self, target: &mut [u32]) {
        let n = target.len().min(self.pixels.len());
        target[..n].copy_from_slice(&self.pixels[..n]);
    }
}

/// The live pixel buffer: a grid plus the sink that physically transmits it.
pub struct PixelBuffer {
    grid: PixelGrid,
    sink: Box<dyn RenderSink>,
    draws: u64,
}

impl PixelBuffer {
    pub fn new(geometry: Geometry, sink: Box<dyn RenderSink>) -> Self {
        PixelBuffer {
            grid: PixelGrid::new(geometry),
            sink,
            draws: 0,
        }
    }

    /// Hand the buffer to the render sink.
    pub fn write(&mut self) -> Result<()> {
        self.sink.render(self.grid.pixels(), self.grid.geometry())?;
        self.draws += 1;
        Ok(())
    }

    /// Number of successful writes since startup.
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl Deref for PixelBuffer {
    type Target = PixelGrid;

    fn deref(&self) -> &PixelGrid {
        &self.grid
    }
}

impl DerefMut for PixelBuffer {
    fn deref_mut(&mut self) -> &mut PixelGrid {
        &mut self.grid
    }
}
