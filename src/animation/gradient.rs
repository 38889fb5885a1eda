use std::time::Instant;

use super::fade::{blend, FadeClock};
use crate::color::Color;
use crate::pixel_buffer::{Geometry, PixelGrid};

/// Paint `colors` as a piecewise-linear ramp along one strip of `target`.
///
/// `n` colors make `n - 1` equal segments; a single color fills the strip and
/// an empty list leaves it untouched.
fn paint_ramp(target: &mut PixelGrid, strip: usize, colors: &[Color]) {
    let leds = target.leds_per_strip();
    let num_segments = colors.len() as i32 - 1;
    let segment_length = if num_segments > 1 {
        leds as f32 / num_segments as f32
    } else {
        leds as f32
    };

    for led in 0..leds {
        let segment = if num_segments > 1 {
            ((led as f32 / segment_length) as i32).min(num_segments)
        } else {
            0
        };
        let Some(&start) = colors.get(segment as usize) else {
            continue;
        };
        let color = match colors.get(segment as usize + 1) {
            Some(&end) => {
                let offset = led as i32 - (segment_length * segment as f32) as i32;
                let percent = (offset as f32 / segment_length).min(1.0);
                start.lerp(end, percent)
            }
            None => start,
        };
        target.set_pixel(color, strip, led);
    }
}

/// Fades the buffer into per-strip color ramps and holds them.
///
/// Strips can be added one at a time: each call rebuilds the whole target
/// from every ramp given so far and restarts the fade from what is on screen.
#[derive(Debug)]
pub struct Gradient {
    default_colors: Vec<Color>,
    strip_colors: Vec<Vec<Color>>,
    target: PixelGrid,
    origin: Vec<u32>,
    clock: FadeClock,
}

impl Gradient {
    pub fn new(geometry: Geometry, now: Instant) -> Self {
        Gradient {
            default_colors: Vec::new(),
            strip_colors: vec![Vec::new(); geometry.num_strips],
            target: PixelGrid::new(geometry),
            origin: Vec::new(),
            clock: FadeClock::new(now, 0.0),
        }
    }

    /// Set the ramp for one strip, or the default for every strip without
    /// its own when `strip` is -1.
    pub fn add_strip(
        &mut self,
        grid: &PixelGrid,
        strip: i32,
        colors: Vec<Color>,
        seconds: f32,
        now: Instant,
    ) {
        if colors.is_empty() {
            return;
        }
        if strip < 0 {
            self.default_colors = colors;
        } else if let Some(slot) = self.strip_colors.get_mut(strip as usize) {
            *slot = colors;
        }

        self.target.set_color(Color::BLACK);
        for (i, own) in self.strip_colors.iter().enumerate() {
            let colors = if own.is_empty() {
                &self.default_colors
            } else {
                own
            };
            paint_ramp(&mut self.target, i, colors);
        }

        self.origin = grid.copy_pixels();
        self.clock.set_seconds(seconds);
        self.clock.restart(now);
    }

    pub fn target(&self) -> &PixelGrid {
        &self.target
    }

    /// Never finishes; the ramps stay up until something replaces them.
    pub fn run(&mut self, grid: &mut PixelGrid, now: Instant) -> bool {
        blend(grid, &self.origin, self.target.pixels(), self.clock.percent(now));
        false
    }

    pub fn stop(&mut self, grid: &mut PixelGrid) {
        grid.copy_from(self.target.pixels());
    }
}

/// Scrolls a `size`-led color ramp across every strip, leaving a trail.
///
/// Each tick starts from the previous tick's output, so whatever the ramp
/// passes over keeps its last color. The ramp enters from led 0 when
/// `direction` is positive and from the far end when negative. The first
/// color leads and the last color trails.
#[derive(Debug)]
pub struct MovingGradient {
    snapshot: Vec<u32>,
    colors: Vec<Color>,
    speed: f32,
    direction: i32,
    size: i32,
    ticks: i64,
}

impl MovingGradient {
    /// `colors` must not be empty. `size` is clamped to the strip length, a
    /// zero direction moves forward and a speed that is not positive holds the
    /// ramp in place.
    pub fn new(grid: &PixelGrid, colors: Vec<Color>, speed: f32, direction: f32, size: u32) -> Self {
        let leds = grid.leds_per_strip() as i32;
        let direction = if (direction as i32) < 0 { -1 } else { 1 };
        MovingGradient {
            snapshot: grid.copy_pixels(),
            colors,
            speed: if speed > 0.0 { speed } else { 0.0 },
            direction,
            size: (size.min(i32::MAX as u32) as i32).min(leds),
            ticks: 0,
        }
    }

    pub fn run(&mut self, grid: &mut PixelGrid, _now: Instant) -> bool {
        self.ticks += 1;
        let leds = grid.leds_per_strip() as i32;
        let size = self.size;
        let step = self.direction;
        // past this the ramp is off the strip either way
        let limit = leds + 2 * size + 1;
        let travelled = (self.ticks as f32 * self.speed).min(limit as f32) as i32;

        grid.copy_from(&self.snapshot);

        let (offset, finished) = if step < 0 {
            let offset = leds + size - travelled;
            (offset, offset < -size)
        } else {
            let offset = travelled - size;
            (offset, offset > leds + size)
        };

        if let Some(last) = self.colors.len().checked_sub(1) {
            let num_segments = last as i32;
            let segment_length = if num_segments > 0 {
                size as f32 / num_segments as f32
            } else {
                size.max(1) as f32
            };
            for strip in 0..grid.num_strips() {
                for k in 0..size {
                    let led = offset + k * step;
                    if led < 0 || led >= leds {
                        continue;
                    }
                    let segment = ((k as f32 / segment_length) as i32).min(num_segments);
                    let p = k - (segment_length * segment as f32) as i32;
                    let start = self.colors[(num_segments - segment) as usize];
                    let q = num_segments - (segment + 1);
                    let end = if q >= 0 { self.colors[q as usize] } else { start };
                    let percent = (p as f32 / segment_length).min(1.0);
                    grid.set_pixel(start.lerp(end, percent), strip, led as usize);
                }
            }
        }

        grid.copy_to(&mut self.snapshot);
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const RED: Color = Color::new(255, 0, 0);
    const GREEN: Color = Color::new(0, 255, 0);
    const BLUE: Color = Color::new(0, 0, 255);

    #[test]
    fn test_ramp_segments() {
        let mut target = PixelGrid::new(Geometry::new(1, 10));
        paint_ramp(&mut target, 0, &[RED, BLUE]);
        assert_eq!(target.get_pixel(0, 0), RED);
        assert_eq!(target.get_pixel(0, 5), Color::new(127, 0, 127));

        paint_ramp(&mut target, 0, &[RED, GREEN, BLUE]);
        assert_eq!(target.get_pixel(0, 0), RED);
        assert_eq!(target.get_pixel(0, 5), GREEN);
        let tail = target.get_pixel(0, 9);
        assert!(tail.g < 60 && tail.b > 200);

        paint_ramp(&mut target, 0, &[GREEN]);
        assert!(target.pixels().iter().all(|&p| p == GREEN.pack()));
    }

    #[test]
    fn test_add_strip_keeps_other_strips() {
        let t0 = Instant::now();
        let grid = PixelGrid::new(Geometry::new(3, 8));
        let mut gradient = Gradient::new(grid.geometry(), t0);

        gradient.add_strip(&grid, 0, vec![RED, BLUE], 1.0, t0);
        let strip0: Vec<Color> = (0..8).map(|led| gradient.target().get_pixel(0, led)).collect();
        gradient.add_strip(&grid, 1, vec![GREEN], 1.0, t0);

        let after: Vec<Color> = (0..8).map(|led| gradient.target().get_pixel(0, led)).collect();
        assert_eq!(strip0, after);
        assert_eq!(gradient.target().get_pixel(1, 3), GREEN);
        assert_eq!(gradient.target().get_pixel(2, 3), Color::BLACK);
    }

    #[test]
    fn test_default_colors_fill_remaining_strips() {
        let t0 = Instant::now();
        let grid = PixelGrid::new(Geometry::new(3, 4));
        let mut gradient = Gradient::new(grid.geometry(), t0);
        gradient.add_strip(&grid, 1, vec![GREEN], 0.0, t0);
        gradient.add_strip(&grid, -1, vec![BLUE], 0.0, t0);
        assert_eq!(gradient.target().get_pixel(0, 0), BLUE);
        assert_eq!(gradient.target().get_pixel(1, 0), GREEN);
        assert_eq!(gradient.target().get_pixel(2, 3), BLUE);
    }

    #[test]
    fn test_gradient_holds() {
        let t0 = Instant::now();
        let mut grid = PixelGrid::new(Geometry::new(2, 4));
        let mut gradient = Gradient::new(grid.geometry(), t0);
        gradient.add_strip(&grid, -1, vec![RED], 1.0, t0);

        assert!(!gradient.run(&mut grid, t0 + Duration::from_millis(500)));
        assert_eq!(grid.get_pixel(0, 0), Color::new(127, 0, 0));
        for tick in 1..100 {
            assert!(!gradient.run(&mut grid, t0 + Duration::from_secs(tick)));
        }
        assert_eq!(grid.get_pixel(1, 3), RED);
    }

    #[test]
    fn test_moving_gradient_scrolls_off() {
        let t0 = Instant::now();
        let mut grid = PixelGrid::new(Geometry::new(2, 20));
        let mut moving = MovingGradient::new(&grid, vec![RED, BLUE], 1.0, 1.0, 10);

        let mut ticks = 0;
        while !moving.run(&mut grid, t0) {
            ticks += 1;
            assert!(ticks < 1000);
        }
        // offset = ticks - size must pass leds + size
        assert_eq!(ticks, 40);
        // the tail of the ramp is left behind
        assert!(grid.pixels().iter().all(|&p| p != 0));
    }

    #[test]
    fn test_moving_gradient_reverse_enters_from_far_end() {
        let t0 = Instant::now();
        let mut grid = PixelGrid::new(Geometry::new(1, 20));
        let mut moving = MovingGradient::new(&grid, vec![RED, BLUE], 5.0, -1.0, 10);

        moving.run(&mut grid, t0);
        moving.run(&mut grid, t0);
        moving.run(&mut grid, t0);
        // offset = 20 + 10 - 15 = 15, drawn downwards from there
        assert_eq!(grid.get_pixel(0, 15), BLUE);
        assert_eq!(grid.get_pixel(0, 0), Color::BLACK);
    }

    #[test]
    fn test_moving_gradient_extreme_speeds() {
        let t0 = Instant::now();
        let mut grid = PixelGrid::new(Geometry::new(2, 20));

        // backwards speed holds the ramp off screen
        let mut held = MovingGradient::new(&grid, vec![RED, BLUE], -1e10, 1.0, 10);
        for _ in 0..10 {
            assert!(!held.run(&mut grid, t0));
        }
        assert!(grid.pixels().iter().all(|&p| p == 0));

        let mut forward = MovingGradient::new(&grid, vec![RED, BLUE], 1e30, 1.0, 10);
        assert!(forward.run(&mut grid, t0));
        let mut reverse = MovingGradient::new(&grid, vec![RED, BLUE], f32::INFINITY, -1.0, 10);
        assert!(reverse.run(&mut grid, t0));
    }

    #[test]
    fn test_moving_gradient_clamps_size() {
        let grid = PixelGrid::new(Geometry::new(1, 6));
        let moving = MovingGradient::new(&grid, vec![RED], 1.0, 0.0, 100);
        assert_eq!(moving.size, 6);
        assert_eq!(moving.direction, 1);
    }
}
