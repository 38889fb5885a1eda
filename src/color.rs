use serde::{Deserialize, Serialize};

/// Simple 8-bit RGB color.
///
/// On the device every pixel is a packed 24-bit value in GRB order, which is
/// also the representation used for colors on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    /// Pack into the device value: `(g << 16) | (r << 8) | b`.
    pub const fn pack(self) -> u32 {
        ((self.g as u32) << 16) | ((self.r as u32) << 8) | self.b as u32
    }

    /// Unpack a device value. The top byte is ignored.
    pub const fn from_packed(value: u32) -> Self {
        Color {
            r: ((value >> 8) & 0xff) as u8,
            g: ((value >> 16) & 0xff) as u8,
            b: (value & 0xff) as u8,
        }
    }

    /// Linear per-channel interpolation towards `other`.
    ///
    /// Truncates rather than rounds, so `percent == 1.0` must be special-cased
    /// by callers that need the exact target.
    pub fn lerp(self, other: Color, percent: f32) -> Color {
        let channel = |from: u8, to: u8| {
            let delta = to as f32 - from as f32;
            (from as f32 + percent * delta) as u8
        };
        Color {
            r: channel(self.r, other.r),
            g: channel(self.g, other.g),
            b: channel(self.b, other.b),
        }
    }

    /// Multiply every channel by `amount`, clamped to 0..=255.
    pub fn scaled(self, amount: f32) -> Color {
        let channel = |c: u8| (c as f32 * amount).clamp(0.0, 255.0) as u8;
        Color {
            r: channel(self.r),
            g: channel(self.g),
            b: channel(self.b),
        }
    }

    /// Add `amount` to every channel, saturating at 255.
    pub fn brightened(self, amount: f32) -> Color {
        let channel = |c: u8| (c as f32 + amount).min(255.0) as u8;
        Color {
            r: channel(self.r),
            g: channel(self.g),
            b: channel(self.b),
        }
    }
}

impl From<[u8; 3]> for Color {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Color { r, g, b }
    }
}

impl From<Color> for [u8; 3] {
    fn from(c: Color) -> Self {
        [c.r, c.g, c.b]
    }
}
