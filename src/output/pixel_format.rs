use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::pixel_buffer::Geometry;

/// Byte order expected by the LED chips on a render output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    #[default]
    Rgb,
    Grb,
    Bgr,
    Rgbw,
    Grbw,
}

impl PixelFormat {
    /// Bytes per pixel on the wire.
    pub fn stride(self) -> usize {
        match self {
            PixelFormat::Rgbw | PixelFormat::Grbw => 4,
            _ => 3,
        }
    }

    fn push(self, c: Color, out: &mut Vec<u8>) {
        match self {
            PixelFormat::Rgb => out.extend_from_slice(&[c.r, c.g, c.b]),
            PixelFormat::Grb => out.extend_from_slice(&[c.g, c.r, c.b]),
            PixelFormat::Bgr => out.extend_from_slice(&[c.b, c.g, c.r]),
            PixelFormat::Rgbw | PixelFormat::Grbw => {
                // white channel is the common minimum of RGB
                let w = c.r.min(c.g).min(c.b);
                let (r, g, b) = (c.r - w, c.g - w, c.b - w);
                if self == PixelFormat::Rgbw {
                    out.extend_from_slice(&[r, g, b, w]);
                } else {
                    out.extend_from_slice(&[g, r, b, w]);
                }
            }
        }
    }
}

/// Serialise a packed pixel buffer strip by strip (all leds of strip 0, then
/// strip 1, ...) in the given byte order.
pub fn transform_pixels(pixels: &[u32], geometry: Geometry, format: PixelFormat) -> Vec<u8> {
    let mut result = Vec::with_capacity(geometry.pixel_count() * format.stride());
    for strip in 0..geometry.num_strips {
        for led in 0..geometry.leds_per_strip {
            let value = pixels
                .get(geometry.offset(strip, led))
                .copied()
                .unwrap_or_default();
            format.push(Color::from_packed(value), &mut result);
        }
    }
    result
}
