use std::time::Instant;

use super::fade::{blend, FadeClock};
use crate::color::Color;
use crate::pixel_buffer::PixelGrid;

/// Fades the buffer to each color in turn, or to one full image.
#[derive(Debug)]
pub struct CrossFade {
    colors: Vec<Color>,
    step: usize,
    origin: Vec<u32>,
    target: Vec<u32>,
    clock: FadeClock,
}

impl CrossFade {
    /// One transition of `seconds` per color. `colors` must not be empty.
    pub fn to_colors(grid: &PixelGrid, colors: Vec<Color>, seconds: f32, now: Instant) -> Self {
        let first = colors.first().copied().unwrap_or_default();
        CrossFade {
            target: vec![first.pack(); grid.pixels().len()],
            colors,
            step: 0,
            origin: grid.copy_pixels(),
            clock: FadeClock::new(now, seconds),
        }
    }

    /// Fade to a full image in buffer order.
    pub fn to_image(grid: &PixelGrid, pixels: &[u32], seconds: f32, now: Instant) -> Self {
        let mut target = grid.copy_pixels();
        let n = pixels.len().min(target.len());
        target[..n].copy_from_slice(&pixels[..n]);
        CrossFade {
            colors: Vec::new(),
            step: 0,
            origin: grid.copy_pixels(),
            target,
            clock: FadeClock::new(now, seconds),
        }
    }

    pub fn run(&mut self, grid: &mut PixelGrid, now: Instant) -> bool {
        let percent = self.clock.percent(now);
        blend(grid, &self.origin, &self.target, percent);
        if percent < 1.0 {
            return false;
        }

        self.step += 1;
        match self.colors.get(self.step) {
            Some(next) => {
                self.target.fill(next.pack());
                grid.copy_to(&mut self.origin);
                self.clock.restart(now);
                false
            }
            None => true,
        }
    }

    pub fn stop(&mut self, grid: &mut PixelGrid) {
        grid.copy_from(&self.target);
    }
}
