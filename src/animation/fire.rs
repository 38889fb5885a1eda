use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::color::Color;
use crate::pixel_buffer::PixelGrid;

/// Sparks are lit within this many cells of the heat source.
const SPARK_ZONE: usize = 7;

/// One-dimensional heat simulation per strip, drawn with the heat source at
/// the far end of the strip.
#[derive(Debug)]
pub struct Fire {
    // strip-major: heat[strip * leds + cell]
    heat: Vec<f32>,
    leds: usize,
    cooling: i32,
    sparkle: f32,
    start: Instant,
    seconds: f32,
    rng: StdRng,
}

impl Fire {
    /// `cooling` is clamped to 0..=100 and `sparkle` to 0..=255; `seconds == 0` burns
    /// forever.
    pub fn new(grid: &PixelGrid, cooling: f32, sparkle: f32, seconds: f32, now: Instant) -> Self {
        Fire {
            heat: vec![0.0; grid.pixels().len()],
            leds: grid.leds_per_strip(),
            cooling: cooling.clamp(0.0, 100.0) as i32,
            sparkle: sparkle.clamp(0.0, 255.0),
            start: now,
            seconds,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn run(&mut self, grid: &mut PixelGrid, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.start).as_secs_f32();
        if self.seconds != 0.0 && elapsed > self.seconds {
            return true;
        }
        let leds = self.leds;
        if leds == 0 {
            return false;
        }
        let max_cooling = (self.cooling * 10 / leds as i32 + 2).max(1) as f32;

        for (strip, cells) in self.heat.chunks_exact_mut(leds).enumerate() {
            // cool down every cell a little
            for cell in cells.iter_mut() {
                *cell = (*cell - self.rng.gen_range(0.0..max_cooling)).max(0.0);
            }

            // heat drifts away from the source and diffuses
            for i in (2..leds).rev() {
                cells[i] = ((cells[i - 1] + cells[i - 2] + cells[i - 2]) / 3.0).min(255.0);
            }

            if self.rng.gen_range(0.0..255.0) < self.sparkle {
                let i = self.rng.gen_range(0..SPARK_ZONE.min(leds));
                cells[i] = (cells[i] + self.rng.gen_range(160.0..255.0)).min(255.0);
            }

            for (i, &temperature) in cells.iter().enumerate() {
                grid.set_pixel(heat_color(temperature), strip, leds - i - 1);
            }
        }
        false
    }
}

/// Black, red, yellow, white palette over 0..=255.
pub fn heat_color(temperature: f32) -> Color {
    // scale down to 0..=191 so the palette splits into three 64-step ramps
    let t192 = (temperature * 191.0 / 255.0) as u8;
    let ramp = (t192 & 0x3f) << 2;
    if t192 & 0x80 != 0 {
        Color::new(255, 255, ramp)
    } else if t192 & 0x40 != 0 {
        Color::new(255, ramp, 0)
    } else {
        Color::new(ramp, 0, 0)
    }
}
