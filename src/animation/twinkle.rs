use std::f32::consts::PI;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::color::Color;
use crate::pixel_buffer::PixelGrid;

#[derive(Debug, Clone, Copy)]
struct Star {
    led: usize,
    start: i32,
    count: i32,
}

/// Random stars that brighten from `base` towards `twinkle` and fade back.
///
/// `speed` is the length of one twinkle in ticks; each star waits a random
/// fraction of that before it starts.
#[derive(Debug)]
pub struct Twinkle {
    base: Color,
    twinkle: Color,
    speed: f32,
    density: usize,
    stars: Vec<Star>,
    rng: StdRng,
}

impl Twinkle {
    pub fn new(grid: &PixelGrid, base: Color, twinkle: Color, speed: f32, density: u32) -> Self {
        let leds = grid.leds_per_strip();
        // more stars than leds only repaints the same pixels
        let density = (density as usize).clamp(1, leds.max(1));
        let mut rng = StdRng::from_entropy();
        let stars = (0..grid.num_strips() * density)
            .map(|_| random_star(&mut rng, leds, speed))
            .collect();
        Twinkle {
            base,
            twinkle,
            speed,
            density,
            stars,
            rng,
        }
    }

    pub fn run(&mut self, grid: &mut PixelGrid, _now: Instant) -> bool {
        grid.set_color(self.base);
        let leds = grid.leds_per_strip();
        if leds == 0 {
            return false;
        }

        for (i, star) in self.stars.iter_mut().enumerate() {
            let strip = i / self.density;
            let color = if self.speed == 0.0 || star.count < star.start {
                self.base
            } else {
                let position = (star.count - star.start) as f32;
                let brightness = (position * PI / self.speed).sin();
                self.base.lerp(self.twinkle, brightness)
            };
            grid.set_pixel(color, strip, star.led);

            star.count += 1;
            if (star.count - star.start) as f32 >= self.speed {
                *star = random_star(&mut self.rng, leds, self.speed);
            }
        }
        false
    }

    pub fn stop(&mut self, grid: &mut PixelGrid) {
        grid.set_color(self.base);
    }
}

fn random_star(rng: &mut StdRng, leds: usize, speed: f32) -> Star {
    let led = if leds > 0 { rng.gen_range(0..leds) } else { 0 };
    let start = if speed.is_finite() && speed >= 1.0 {
        rng.gen_range(0.0..speed) as i32
    } else {
        0
    };
    Star {
        led,
        start,
        count: 0,
    }
}
