//! The instructions a host can send to the driver.

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::pixel_buffer::{Geometry, PixelGrid};
use crate::protocol::{FrameWriter, PayloadReader, ProtocolError};

/// Images larger than this are rejected rather than allocated.
pub const MAX_IMAGE_PIXELS: usize = 1 << 20;

/// Largest drop profile, in leds, for WaterDrop and StartRain.
pub const MAX_DROP_SIZE: u32 = 1000;

/// Most stars per strip a Twinkle may ask for.
pub const MAX_TWINKLE_DENSITY: u32 = 1000;

/// A complete frame of pixels in buffer order (`led * num_strips + strip`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferImage {
    pub num_strips: u32,
    pub leds_per_strip: u32,
    #[serde(default)]
    pub seconds: f32,
    pub pixels: Vec<u32>,
}

impl BufferImage {
    pub fn from_grid(grid: &PixelGrid, seconds: f32) -> Self {
        BufferImage {
            num_strips: grid.num_strips() as u32,
            leds_per_strip: grid.leds_per_strip() as u32,
            seconds,
            pixels: grid.copy_pixels(),
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.num_strips as usize, self.leds_per_strip as usize)
    }

    fn pixel(&self, strip: usize, led: usize) -> u32 {
        let offset = self.geometry().offset(strip, led);
        self.pixels.get(offset).copied().unwrap_or(0)
    }

    /// Run-length form, walking each strip from led 0 before moving to the
    /// next strip.
    pub fn runs(&self) -> Vec<(u32, u32)> {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for strip in 0..self.num_strips as usize {
            for led in 0..self.leds_per_strip as usize {
                let color = self.pixel(strip, led);
                match runs.last_mut() {
                    Some((count, last)) if *last == color => *count += 1,
                    _ => runs.push((1, color)),
                }
            }
        }
        runs
    }

    /// Wrap as whichever buffer command has the smaller payload.
    pub fn into_command(self) -> Command {
        let encoded = self.runs().len() * 8;
        let full = self.geometry().pixel_count() * 4;
        if encoded <= full {
            Command::EncodedBuffer(self)
        } else {
            Command::FullBuffer(self)
        }
    }

    fn parse_header(
        reader: &mut PayloadReader,
        command: &'static str,
    ) -> Result<BufferImage, ProtocolError> {
        let num_strips = field(reader.u32(), command)?;
        let leds_per_strip = field(reader.u32(), command)?;
        let seconds = field(reader.f32(), command)?;
        let count = (num_strips as usize)
            .checked_mul(leds_per_strip as usize)
            .filter(|&count| count <= MAX_IMAGE_PIXELS)
            .ok_or_else(|| ProtocolError::InvalidParameter {
                command,
                reason: format!("image of {num_strips}x{leds_per_strip} is too large"),
            })?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(count)
            .map_err(|_| ProtocolError::OutOfMemory(count * 4))?;
        pixels.resize(count, 0);
        Ok(BufferImage {
            num_strips,
            leds_per_strip,
            seconds,
            pixels,
        })
    }

    fn put_header(&self, writer: &mut FrameWriter) {
        writer
            .put_u32(self.num_strips)
            .put_u32(self.leds_per_strip)
            .put_f32(self.seconds);
    }
}

/// One decoded instruction.
///
/// The JSON form (used by the host's command sources) is tagged by
/// `"command"`, e.g. `{"command": "Rainbow", "length": 157, "seconds": 10}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    /// Strip -1 means every strip; index -1 means the whole strip.
    SetColor {
        #[serde(default = "all")]
        strip: i32,
        #[serde(default = "all")]
        index: i32,
        colors: Vec<Color>,
    },
    CrossFade {
        seconds: f32,
        colors: Vec<Color>,
    },
    Breathe {
        seconds: f32,
        f1: f32,
        f2: f32,
    },
    Gradient {
        #[serde(default = "all")]
        strip: i32,
        #[serde(default)]
        colors_per_strip: i32,
        seconds: f32,
        colors: Vec<Color>,
    },
    MovingGradient {
        speed: f32,
        direction: f32,
        size: u32,
        colors: Vec<Color>,
    },
    Rainbow {
        length: u32,
        #[serde(default)]
        seconds: f32,
    },
    Fire {
        #[serde(default = "default_cooling")]
        cooling: f32,
        #[serde(default = "default_sparkle")]
        sparkle: f32,
        #[serde(default)]
        seconds: f32,
    },
    Twinkle {
        density: u32,
        seconds: f32,
        base: Color,
        twinkle: Color,
    },
    NeuralDrop {
        #[serde(default)]
        iterations: u32,
    },
    WaterDrop {
        #[serde(default)]
        iterations: u32,
        size: u32,
        amount: f32,
    },
    StartRain {
        size: u32,
        amount: f32,
    },
    StopRain,
    FullBuffer(BufferImage),
    EncodedBuffer(BufferImage),
    Status,
    SpeedTest,
}

fn all() -> i32 {
    -1
}

fn default_cooling() -> f32 {
    55.0
}

fn default_sparkle() -> f32 {
    120.0
}

fn field<T>(value: Option<T>, command: &'static str) -> Result<T, ProtocolError> {
    value.ok_or(ProtocolError::MissingParameters { command })
}

fn some_colors(colors: Vec<Color>, command: &'static str) -> Result<Vec<Color>, ProtocolError> {
    if colors.is_empty() {
        Err(ProtocolError::MissingColors { command })
    } else {
        Ok(colors)
    }
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetColor { .. } => "SetColor",
            Command::CrossFade { .. } => "CrossFade",
            Command::Breathe { .. } => "Breathe",
            Command::Gradient { .. } => "Gradient",
            Command::MovingGradient { .. } => "MovingGradient",
            Command::Rainbow { .. } => "Rainbow",
            Command::Fire { .. } => "Fire",
            Command::Twinkle { .. } => "Twinkle",
            Command::NeuralDrop { .. } => "NeuralDrop",
            Command::WaterDrop { .. } => "WaterDrop",
            Command::StartRain { .. } => "StartRain",
            Command::StopRain => "StopRain",
            Command::FullBuffer(_) => "FullBuffer",
            Command::EncodedBuffer(_) => "EncodedBuffer",
            Command::Status => "Status",
            Command::SpeedTest => "SpeedTest",
        }
    }

    /// Decode a frame's payload. Trailing bytes beyond the last whole field
    /// are ignored.
    pub fn parse(name: &str, payload: &[u8]) -> Result<Command, ProtocolError> {
        let mut r = PayloadReader::new(payload);
        let command = match name {
            "SetColor" => {
                let strip = field(r.i32(), "SetColor")?;
                let index = field(r.i32(), "SetColor")?;
                Command::SetColor {
                    strip,
                    index,
                    colors: some_colors(r.colors(), "SetColor")?,
                }
            }
            "CrossFade" => {
                let seconds = field(r.f32(), "CrossFade")?;
                Command::CrossFade {
                    seconds,
                    colors: some_colors(r.colors(), "CrossFade")?,
                }
            }
            "Breathe" => Command::Breathe {
                seconds: field(r.f32(), "Breathe")?,
                f1: field(r.f32(), "Breathe")?,
                f2: field(r.f32(), "Breathe")?,
            },
            "Gradient" => {
                let strip = field(r.i32(), "Gradient")?;
                let colors_per_strip = field(r.i32(), "Gradient")?;
                let seconds = field(r.f32(), "Gradient")?;
                Command::Gradient {
                    strip,
                    colors_per_strip,
                    seconds,
                    colors: some_colors(r.colors(), "Gradient")?,
                }
            }
            "MovingGradient" => {
                let speed = field(r.f32(), "MovingGradient")?;
                let direction = field(r.f32(), "MovingGradient")?;
                let size = field(r.u32(), "MovingGradient")?;
                Command::MovingGradient {
                    speed,
                    direction,
                    size,
                    colors: some_colors(r.colors(), "MovingGradient")?,
                }
            }
            "Rainbow" => {
                let length = field(r.u32(), "Rainbow")?;
                let seconds = field(r.f32(), "Rainbow")?;
                if length == 0 {
                    return Err(ProtocolError::InvalidParameter {
                        command: "Rainbow",
                        reason: "length must be positive".to_string(),
                    });
                }
                Command::Rainbow { length, seconds }
            }
            // every field is optional
            "Fire" => Command::Fire {
                cooling: r.f32().unwrap_or_else(default_cooling),
                sparkle: r.f32().unwrap_or_else(default_sparkle),
                seconds: r.f32().unwrap_or(0.0),
            },
            "Twinkle" => {
                let density = field(r.u32(), "Twinkle")?;
                let seconds = field(r.f32(), "Twinkle")?;
                if density > MAX_TWINKLE_DENSITY {
                    return Err(ProtocolError::InvalidParameter {
                        command: "Twinkle",
                        reason: format!("density {density} over {MAX_TWINKLE_DENSITY}"),
                    });
                }
                let colors = r.colors();
                let &[base, twinkle, ..] = colors.as_slice() else {
                    return Err(ProtocolError::MissingColors { command: "Twinkle" });
                };
                Command::Twinkle {
                    density,
                    seconds,
                    base,
                    twinkle,
                }
            }
            "NeuralDrop" => Command::NeuralDrop {
                iterations: field(r.u32(), "NeuralDrop")?,
            },
            "WaterDrop" => {
                let iterations = field(r.u32(), "WaterDrop")?;
                let size = field(r.u32(), "WaterDrop")?;
                let amount = field(r.f32(), "WaterDrop")?;
                if size > MAX_DROP_SIZE {
                    return Err(ProtocolError::InvalidParameter {
                        command: "WaterDrop",
                        reason: format!("size {size} over {MAX_DROP_SIZE}"),
                    });
                }
                Command::WaterDrop {
                    iterations,
                    size,
                    amount,
                }
            }
            "StartRain" => {
                let size = field(r.u32(), "StartRain")?;
                let amount = field(r.f32(), "StartRain")?;
                if size > MAX_DROP_SIZE || amount > 255.0 {
                    return Err(ProtocolError::InvalidParameter {
                        command: "StartRain",
                        reason: format!("size {size} / amount {amount} out of range"),
                    });
                }
                Command::StartRain { size, amount }
            }
            "StopRain" => Command::StopRain,
            "Status" => Command::Status,
            "SpeedTest" => Command::SpeedTest,
            "FullBuffer" => {
                let mut image = BufferImage::parse_header(&mut r, "FullBuffer")?;
                for pixel in image.pixels.iter_mut() {
                    match r.u32() {
                        Some(value) => *pixel = value & 0x00ff_ffff,
                        None => break,
                    }
                }
                Command::FullBuffer(image)
            }
            "EncodedBuffer" => {
                let mut image = BufferImage::parse_header(&mut r, "EncodedBuffer")?;
                let geometry = image.geometry();
                let mut cursor = (0..geometry.num_strips)
                    .flat_map(|strip| (0..geometry.leds_per_strip).map(move |led| (strip, led)));
                'runs: while let (Some(count), Some(color)) = (r.u32(), r.u32()) {
                    for _ in 0..count {
                        let Some((strip, led)) = cursor.next() else {
                            break 'runs;
                        };
                        image.pixels[geometry.offset(strip, led)] = color & 0x00ff_ffff;
                    }
                }
                Command::EncodedBuffer(image)
            }
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    /// Encode as a complete wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new(self.name());
        match self {
            Command::SetColor {
                strip,
                index,
                colors,
            } => {
                w.put_i32(*strip).put_i32(*index).put_colors(colors);
            }
            Command::CrossFade { seconds, colors } => {
                w.put_f32(*seconds).put_colors(colors);
            }
            Command::Breathe { seconds, f1, f2 } => {
                w.put_f32(*seconds).put_f32(*f1).put_f32(*f2);
            }
            Command::Gradient {
                strip,
                colors_per_strip,
                seconds,
                colors,
            } => {
                w.put_i32(*strip)
                    .put_i32(*colors_per_strip)
                    .put_f32(*seconds)
                    .put_colors(colors);
            }
            Command::MovingGradient {
                speed,
                direction,
                size,
                colors,
            } => {
                w.put_f32(*speed)
                    .put_f32(*direction)
                    .put_u32(*size)
                    .put_colors(colors);
            }
            Command::Rainbow { length, seconds } => {
                w.put_u32(*length).put_f32(*seconds);
            }
            Command::Fire {
                cooling,
                sparkle,
                seconds,
            } => {
                w.put_f32(*cooling).put_f32(*sparkle).put_f32(*seconds);
            }
            Command::Twinkle {
                density,
                seconds,
                base,
                twinkle,
            } => {
                w.put_u32(*density)
                    .put_f32(*seconds)
                    .put_colors(&[*base, *twinkle]);
            }
            Command::NeuralDrop { iterations } => {
                w.put_u32(*iterations);
            }
            Command::WaterDrop {
                iterations,
                size,
                amount,
            } => {
                w.put_u32(*iterations).put_u32(*size).put_f32(*amount);
            }
            Command::StartRain { size, amount } => {
                w.put_u32(*size).put_f32(*amount);
            }
            Command::StopRain | Command::Status | Command::SpeedTest => {}
            Command::FullBuffer(image) => {
                image.put_header(&mut w);
                for &pixel in &image.pixels {
                    w.put_u32(pixel);
                }
            }
            Command::EncodedBuffer(image) => {
                image.put_header(&mut w);
                for (count, color) in image.runs() {
                    w.put_u32(count).put_u32(color);
                }
            }
        }
        w.finish()
    }
}
