use std::f32::consts::PI;
use std::time::Instant;

use crate::color::Color;
use crate::pixel_buffer::PixelGrid;

/// `sin²` bell of `size` samples peaking in the middle.
fn bell(size: u32) -> Vec<f32> {
    let step = PI / size.max(1) as f32;
    (0..size).map(|i| (i as f32 * step).sin().powi(2)).collect()
}

/// Brightens a bell-shaped band scanning down every strip, on top of a
/// snapshot of the buffer. One pass over the strip is one drop.
#[derive(Debug)]
pub struct WaterDrop {
    snapshot: Vec<u32>,
    profile: Vec<f32>,
    amount: f32,
    drops: u32,
    forever: bool,
    index: usize,
}

impl WaterDrop {
    /// `iterations == 0` drips forever.
    pub fn new(grid: &PixelGrid, iterations: u32, size: u32, amount: f32) -> Self {
        WaterDrop {
            snapshot: grid.copy_pixels(),
            profile: bell(size),
            amount,
            drops: iterations,
            forever: iterations == 0,
            index: 0,
        }
    }

    pub fn run(&mut self, grid: &mut PixelGrid, _now: Instant) -> bool {
        let leds = grid.leds_per_strip();
        if leds == 0 || !(self.forever || self.drops > 0) {
            return true;
        }

        grid.copy_from(&self.snapshot);
        for strip in 0..grid.num_strips() {
            for (k, &amplitude) in self.profile.iter().enumerate() {
                let led = self.index + k;
                if led >= leds {
                    break;
                }
                let color = grid.get_pixel(strip, led).brightened(amplitude * self.amount);
                grid.set_pixel(color, strip, led);
            }
        }

        self.index += 1;
        if self.index == leds {
            self.index = 0;
            self.drops = self.drops.saturating_sub(1);
        }
        false
    }

    pub fn stop(&mut self, grid: &mut PixelGrid) {
        grid.copy_from(&self.snapshot);
    }
}

/// The water-drop band applied to the live buffer. Only useful as an
/// overlay; it never finishes.
#[derive(Debug)]
pub struct RainOverlay {
    profile: Vec<f32>,
    amount: f32,
    index: usize,
}

impl RainOverlay {
    pub fn new(size: u32, amount: f32) -> Self {
        RainOverlay {
            profile: bell(size),
            amount,
            index: 0,
        }
    }

    pub fn run(&mut self, grid: &mut PixelGrid, _now: Instant) -> bool {
        let leds = grid.leds_per_strip();
        if leds == 0 {
            return false;
        }
        for strip in 0..grid.num_strips() {
            for (k, &amplitude) in self.profile.iter().enumerate() {
                let led = self.index + k;
                if led >= leds {
                    break;
                }
                let color = grid.get_pixel(strip, led).brightened(amplitude * self.amount);
                grid.set_pixel(color, strip, led);
            }
        }
        self.index = (self.index + 1) % leds;
        false
    }
}

const NEURAL_BASE: Color = Color::new(0x1b, 0x23, 0x4b);
const NEURAL_BUBBLE: usize = 16;
const NEURAL_BREATH_MS: f32 = 3000.0;

/// A purple bubble falling over a slowly breathing blue background.
#[derive(Debug)]
pub struct NeuralDrop {
    bubble: Vec<Color>,
    start: Instant,
    drops: u32,
    forever: bool,
    index: usize,
}

impl NeuralDrop {
    /// `iterations == 0` runs forever.
    pub fn new(iterations: u32, now: Instant) -> Self {
        let bubble = (0..NEURAL_BUBBLE)
            .map(|i| {
                let level = (128.0 * (i as f32 * PI / 15.0).sin().powi(2) + 8.0) as u8;
                Color::new(level, 0, level)
            })
            .collect();
        NeuralDrop {
            bubble,
            start: now,
            drops: iterations,
            forever: iterations == 0,
            index: 0,
        }
    }

    pub fn run(&mut self, grid: &mut PixelGrid, now: Instant) -> bool {
        let leds = grid.leds_per_strip();
        if leds == 0 || !(self.forever || self.drops > 0) {
            return true;
        }

        let ms = now.saturating_duration_since(self.start).as_secs_f32() * 1000.0;
        let amplitude = (ms / NEURAL_BREATH_MS * PI).sin().exp() / 6.0 + 0.25;
        grid.set_color(NEURAL_BASE.scaled(amplitude));

        for (k, &color) in self.bubble.iter().enumerate() {
            let led = self.index + k;
            if led >= leds {
                break;
            }
            grid.set_row(color, led);
        }

        self.index += 1;
        if self.index == leds {
            self.index = 0;
            self.drops = self.drops.saturating_sub(1);
        }
        false
    }

    pub fn stop(&mut self, grid: &mut PixelGrid) {
        grid.set_color(NEURAL_BASE);
    }
}
