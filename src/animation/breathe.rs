use std::f32::consts::PI;
use std::time::Instant;

use crate::color::Color;
use crate::pixel_buffer::PixelGrid;

/// Length of one breath, in milliseconds.
const BREATH_MS: f32 = 2000.0;

/// Pulses the brightness of a snapshot of the buffer.
#[derive(Debug)]
pub struct Breathe {
    snapshot: Vec<u32>,
    start: Instant,
    seconds: f32,
    f1: f32,
    f2: f32,
    // decays to 1 so the first breath does not overshoot
    ramp: f32,
}

impl Breathe {
    /// `seconds == 0` breathes forever.
    pub fn new(grid: &PixelGrid, seconds: f32, f1: f32, f2: f32, now: Instant) -> Self {
        let f1 = if f1 == 0.0 { 1.0 } else { f1 };
        Breathe {
            snapshot: grid.copy_pixels(),
            start: now,
            seconds,
            f1,
            f2,
            ramp: 1.0 / 1f32.exp() / f1 + f2,
        }
    }

    /// Brightness multiplier `elapsed_ms` into the animation, at most 1.
    fn amplitude(&self, elapsed_ms: f32) -> f32 {
        let wave = (elapsed_ms / BREATH_MS * PI).cos().exp();
        (self.ramp * wave / self.f1 + self.f2).min(1.0)
    }

    pub fn run(&mut self, grid: &mut PixelGrid, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.start);
        if self.seconds != 0.0 && elapsed.as_secs_f32() >= self.seconds {
            return true;
        }

        let amplitude = self.amplitude(elapsed.as_secs_f32() * 1000.0);
        for (pixel, &original) in grid.pixels_mut().iter_mut().zip(&self.snapshot) {
            *pixel = Color::from_packed(original).scaled(amplitude).pack();
        }

        if self.ramp > 1.0 {
            self.ramp -= 0.001;
        } else {
            self.ramp = 1.0;
        }
        false
    }

    pub fn stop(&mut self, grid: &mut PixelGrid) {
        grid.copy_from(&self.snapshot);
    }
}
