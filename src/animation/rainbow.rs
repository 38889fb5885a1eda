use std::time::Instant;

use crate::color::Color;
use crate::pixel_buffer::PixelGrid;

/// Scrolls a red, green, blue wheel of `length` leds down every strip.
#[derive(Debug)]
pub struct Rainbow {
    length: u32,
    offset: u32,
    start: Instant,
    seconds: f32,
}

impl Rainbow {
    /// `length` must be positive; `seconds == 0` runs forever.
    pub fn new(length: u32, seconds: f32, now: Instant) -> Self {
        Rainbow {
            length: length.max(1),
            offset: 0,
            start: now,
            seconds,
        }
    }

    /// Color of wheel position `position` (< length).
    fn wheel(&self, position: u32) -> Color {
        let thirds = self.length as f32 / 3.0;
        let p = position as f32;
        let zone = (p / thirds) as u32;
        let t = (p - zone as f32 * thirds) / thirds;
        let rising = (255.0 * t) as u8;
        let falling = (255.0 * (1.0 - t)) as u8;
        match zone {
            0 => Color::new(falling, rising, 0),
            1 => Color::new(0, falling, rising),
            _ => Color::new(rising, 0, falling),
        }
    }

    pub fn run(&mut self, grid: &mut PixelGrid, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.start).as_secs_f32();
        if self.seconds != 0.0 && elapsed >= self.seconds {
            return true;
        }

        let offset = self.offset;
        self.offset = self.offset.wrapping_add(1);
        for led in 0..grid.leds_per_strip() {
            let position = offset.wrapping_add(led as u32) % self.length;
            grid.set_row(self.wheel(position), led);
        }
        false
    }
}
