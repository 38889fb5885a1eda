//! Per-tick animations.
//!
//! An animation paints into the grid once per tick and reports whether it
//! has finished; it never transmits. The controller decides when the buffer
//! is written, so a base animation plus its overlay produce exactly one
//! frame per tick.

use std::time::Instant;

use crate::pixel_buffer::PixelGrid;

mod breathe;
mod copy_source;
mod crossfade;
mod drop;
mod fade;
mod fire;
mod gradient;
mod rainbow;
mod twinkle;

pub use breathe::Breathe;
pub use copy_source::CopySource;
pub use crossfade::CrossFade;
pub use drop::{NeuralDrop, RainOverlay, WaterDrop};
pub use fire::Fire;
pub use gradient::{Gradient, MovingGradient};
pub use rainbow::Rainbow;
pub use twinkle::Twinkle;

#[derive(Debug)]
pub enum Animation {
    CrossFade(CrossFade),
    Breathe(Breathe),
    Rainbow(Rainbow),
    Fire(Fire),
    Gradient(Gradient),
    MovingGradient(MovingGradient),
    WaterDrop(WaterDrop),
    NeuralDrop(NeuralDrop),
    Rain(RainOverlay),
    Twinkle(Twinkle),
    CopySource(CopySource),
}

impl Animation {
    /// Paint one tick. Returns true once the animation has finished.
    pub fn run(&mut self, grid: &mut PixelGrid, now: Instant) -> bool {
        match self {
            Animation::CrossFade(a) => a.run(grid, now),
            Animation::Breathe(a) => a.run(grid, now),
            Animation::Rainbow(a) => a.run(grid, now),
            Animation::Fire(a) => a.run(grid, now),
            Animation::Gradient(a) => a.run(grid, now),
            Animation::MovingGradient(a) => a.run(grid, now),
            Animation::WaterDrop(a) => a.run(grid, now),
            Animation::NeuralDrop(a) => a.run(grid, now),
            Animation::Rain(a) => a.run(grid, now),
            Animation::Twinkle(a) => a.run(grid, now),
            Animation::CopySource(a) => a.run(grid),
        }
    }

    /// Leave the grid in the animation's final state. Called exactly once,
    /// whether the animation finished or was replaced.
    pub fn stop(&mut self, grid: &mut PixelGrid) {
        match self {
            Animation::CrossFade(a) => a.stop(grid),
            Animation::Breathe(a) => a.stop(grid),
            Animation::Gradient(a) => a.stop(grid),
            Animation::WaterDrop(a) => a.stop(grid),
            Animation::NeuralDrop(a) => a.stop(grid),
            Animation::Twinkle(a) => a.stop(grid),
            Animation::Rainbow(_)
            | Animation::Fire(_)
            | Animation::MovingGradient(_)
            | Animation::Rain(_)
            | Animation::CopySource(_) => {}
        }
    }

    /// Paints over whatever the base animation drew this tick.
    pub fn is_overlay(&self) -> bool {
        matches!(self, Animation::Rain(_))
    }

    /// Only meaningful while an overlay is attached.
    pub fn needs_overlay(&self) -> bool {
        matches!(self, Animation::CopySource(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Animation::CrossFade(_) => "CrossFade",
            Animation::Breathe(_) => "Breathe",
            Animation::Rainbow(_) => "Rainbow",
            Animation::Fire(_) => "Fire",
            Animation::Gradient(_) => "Gradient",
            Animation::MovingGradient(_) => "MovingGradient",
            Animation::WaterDrop(_) => "WaterDrop",
            Animation::NeuralDrop(_) => "NeuralDrop",
            Animation::Rain(_) => "RainOverlay",
            Animation::Twinkle(_) => "Twinkle",
            Animation::CopySource(_) => "CopySource",
        }
    }
}
