//! Physical render sinks.
//!
//! The animation core only ever calls [`RenderSink::render`] once per tick;
//! what happens to the pixels afterwards (and how long it takes) is up to
//! the sink.

use anyhow::Result;

use crate::pixel_buffer::Geometry;

mod adalight;
mod pixel_format;
mod serial;

pub use pixel_format::PixelFormat;
pub use serial::SerialStripSink;

/// Accepts a packed pixel buffer for eventual physical transmission.
pub trait RenderSink: Send {
    fn render(&mut self, pixels: &[u32], geometry: Geometry) -> Result<()>;
}

/// Discards every frame. Used when the driver has no physical output
/// configured.
#[derive(Debug, Default)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn render(&mut self, _pixels: &[u32], _geometry: Geometry) -> Result<()> {
        Ok(())
    }
}
