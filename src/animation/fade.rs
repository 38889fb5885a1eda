use std::time::Instant;

use crate::color::Color;
use crate::pixel_buffer::PixelGrid;

/// Tracks how far a timed fade has progressed.
#[derive(Debug, Clone, Copy)]
pub struct FadeClock {
    start: Instant,
    seconds: f32,
}

impl FadeClock {
    pub fn new(now: Instant, seconds: f32) -> Self {
        FadeClock {
            start: now,
            seconds,
        }
    }

    pub fn restart(&mut self, now: Instant) {
        self.start = now;
    }

    pub fn set_seconds(&mut self, seconds: f32) {
        self.seconds = seconds;
    }

    /// Completed fraction, clamped to 1. A non-positive duration is complete
    /// immediately.
    pub fn percent(&self, now: Instant) -> f32 {
        if self.seconds <= 0.0 {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.start).as_secs_f32();
        (elapsed / self.seconds).min(1.0)
    }
}

/// Paint `grid` at `percent` of the way from `origin` to `target`.
///
/// At 1.0 the target is copied verbatim so truncation never leaves the fade
/// one step short.
pub fn blend(grid: &mut PixelGrid, origin: &[u32], target: &[u32], percent: f32) {
    if percent >= 1.0 {
        grid.copy_from(target);
        return;
    }
    for ((pixel, &from), &to) in grid.pixels_mut().iter_mut().zip(origin).zip(target) {
        *pixel = Color::from_packed(from)
            .lerp(Color::from_packed(to), percent)
            .pack();
    }
}
