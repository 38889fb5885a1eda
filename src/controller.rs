use std::fmt::Display;
use std::time::Instant;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

use crate::animation::{
    Animation, Breathe, CopySource, CrossFade, Fire, Gradient, MovingGradient, NeuralDrop,
    RainOverlay, Rainbow, Twinkle, WaterDrop,
};
use crate::color::Color;
use crate::command::{BufferImage, Command};
use crate::pixel_buffer::PixelBuffer;

/// A command that decoded fine but cannot be applied to this buffer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    #[error("{command}: strip {strip} out of range, buffer has {num_strips} strips")]
    StripOutOfRange {
        command: &'static str,
        strip: i32,
        num_strips: usize,
    },

    #[error("{command}: led {index} out of range, strips have {leds_per_strip} leds")]
    LedOutOfRange {
        command: &'static str,
        index: i32,
        leds_per_strip: usize,
    },

    #[error("{command}: image is {strips}x{leds}, buffer is {num_strips}x{leds_per_strip}")]
    GeometryMismatch {
        command: &'static str,
        strips: u32,
        leds: u32,
        num_strips: usize,
        leds_per_strip: usize,
    },

    #[error("{0}: missing colors")]
    MissingColors(&'static str),
}

/// What the caller has to do after a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Done,
    /// Report [`Controller::status_lines`].
    Status,
    /// Switch the link into speed-test receive mode.
    SpeedTest,
}

/// Owns the live buffer and the two animation slots.
///
/// `active` is the base animation and `overlay` paints on top of it. Each
/// [`tick`](Controller::tick) runs the base, then the overlay, then writes
/// the buffer exactly once. An overlay outlives any base: when the base goes
/// away a [`CopySource`] takes its place underneath.
pub struct Controller {
    buffer: PixelBuffer,
    active: Option<Animation>,
    overlay: Option<Animation>,
    last_error: Option<String>,
}

impl Controller {
    pub fn new(buffer: PixelBuffer) -> Self {
        Controller {
            buffer,
            active: None,
            overlay: None,
            last_error: None,
        }
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn active(&self) -> Option<&Animation> {
        self.active.as_ref()
    }

    pub fn overlay(&self) -> Option<&Animation> {
        self.overlay.as_ref()
    }

    /// Remember an error for the next status report.
    pub fn record_error(&mut self, error: impl Display) {
        self.last_error = Some(error.to_string());
    }

    /// Apply one command.
    ///
    /// Rain commands only touch the overlay slot and Gradient extends a
    /// running Gradient; every other animation command stops the current base
    /// animation first. Rejected commands leave everything as it was.
    pub fn dispatch(&mut self, command: Command, now: Instant) -> Result<Dispatched> {
        if let Err(e) = self.validate(&command) {
            self.record_error(&e);
            return Err(e.into());
        }
        debug!(command = command.name(), "Dispatching");

        let outcome = match command {
            Command::Status => return Ok(Dispatched::Status),
            Command::StartRain { size, amount } => {
                self.install(Animation::Rain(RainOverlay::new(size, amount)));
                Dispatched::Done
            }
            Command::StopRain => {
                self.overlay = None;
                Dispatched::Done
            }
            Command::Gradient {
                strip,
                colors_per_strip,
                seconds,
                colors,
            } => {
                self.add_gradient(strip, colors_per_strip, seconds, colors, now);
                Dispatched::Done
            }
            command => {
                self.stop_active();
                self.start(command, now)?
            }
        };

        self.ensure_overlay_host();
        self.last_error = None;
        Ok(outcome)
    }

    fn validate(&self, command: &Command) -> Result<(), ControllerError> {
        let num_strips = self.buffer.num_strips();
        let leds_per_strip = self.buffer.leds_per_strip();
        let check_image = |name: &'static str, image: &BufferImage| {
            if image.geometry() == self.buffer.geometry() {
                Ok(())
            } else {
                Err(ControllerError::GeometryMismatch {
                    command: name,
                    strips: image.num_strips,
                    leds: image.leds_per_strip,
                    num_strips,
                    leds_per_strip,
                })
            }
        };
        match command {
            Command::SetColor {
                strip,
                index,
                colors,
            } => {
                if colors.is_empty() {
                    return Err(ControllerError::MissingColors("SetColor"));
                }
                if *strip >= 0 && *strip as usize >= num_strips {
                    return Err(ControllerError::StripOutOfRange {
                        command: "SetColor",
                        strip: *strip,
                        num_strips,
                    });
                }
                if *strip >= 0 && *index >= 0 && *index as usize >= leds_per_strip {
                    return Err(ControllerError::LedOutOfRange {
                        command: "SetColor",
                        index: *index,
                        leds_per_strip,
                    });
                }
                Ok(())
            }
            Command::Gradient {
                strip,
                colors_per_strip,
                colors,
                ..
            } => {
                if colors.is_empty() {
                    return Err(ControllerError::MissingColors("Gradient"));
                }
                if *colors_per_strip <= 0 && *strip >= 0 && *strip as usize >= num_strips {
                    return Err(ControllerError::StripOutOfRange {
                        command: "Gradient",
                        strip: *strip,
                        num_strips,
                    });
                }
                Ok(())
            }
            Command::CrossFade { colors, .. } if colors.is_empty() => {
                Err(ControllerError::MissingColors("CrossFade"))
            }
            Command::MovingGradient { colors, .. } if colors.is_empty() => {
                Err(ControllerError::MissingColors("MovingGradient"))
            }
            Command::FullBuffer(image) => check_image("FullBuffer", image),
            Command::EncodedBuffer(image) => check_image("EncodedBuffer", image),
            _ => Ok(()),
        }
    }

    fn start(&mut self, command: Command, now: Instant) -> Result<Dispatched> {
        if let Command::SetColor {
            strip,
            index,
            colors,
        } = &command
        {
            let color = colors[0];
            if *strip < 0 {
                self.buffer.set_color(color);
            } else if *index < 0 {
                self.buffer.set_column(color, *strip as usize);
            } else {
                self.buffer.set_pixel(color, *strip as usize, *index as usize);
            }
            self.buffer.write()?;
            return Ok(Dispatched::Done);
        }

        let grid = &*self.buffer;
        let animation = match command {
            Command::CrossFade { seconds, colors } => Some(Animation::CrossFade(
                CrossFade::to_colors(grid, colors, seconds, now),
            )),
            Command::FullBuffer(image) | Command::EncodedBuffer(image) => Some(
                Animation::CrossFade(CrossFade::to_image(grid, &image.pixels, image.seconds, now)),
            ),
            Command::Breathe { seconds, f1, f2 } => {
                Some(Animation::Breathe(Breathe::new(grid, seconds, f1, f2, now)))
            }
            Command::MovingGradient {
                speed,
                direction,
                size,
                colors,
            } => Some(Animation::MovingGradient(MovingGradient::new(
                grid, colors, speed, direction, size,
            ))),
            Command::Rainbow { length, seconds } => {
                Some(Animation::Rainbow(Rainbow::new(length, seconds, now)))
            }
            Command::Fire {
                cooling,
                sparkle,
                seconds,
            } => Some(Animation::Fire(Fire::new(grid, cooling, sparkle, seconds, now))),
            Command::Twinkle {
                density,
                seconds,
                base,
                twinkle,
            } => Some(Animation::Twinkle(Twinkle::new(
                grid, base, twinkle, seconds, density,
            ))),
            Command::NeuralDrop { iterations } => {
                Some(Animation::NeuralDrop(NeuralDrop::new(iterations, now)))
            }
            Command::WaterDrop {
                iterations,
                size,
                amount,
            } => Some(Animation::WaterDrop(WaterDrop::new(
                grid, iterations, size, amount,
            ))),
            Command::SpeedTest => return Ok(Dispatched::SpeedTest),
            // handled above or by dispatch
            Command::SetColor { .. }
            | Command::Status
            | Command::StartRain { .. }
            | Command::StopRain
            | Command::Gradient { .. } => None,
        };
        if let Some(animation) = animation {
            self.install(animation);
        }
        Ok(Dispatched::Done)
    }

    /// Put an animation in its slot, replacing whatever was there.
    fn install(&mut self, animation: Animation) {
        info!(animation = animation.name(), "Starting animation");
        if animation.is_overlay() {
            self.overlay = Some(animation);
        } else {
            self.active = Some(animation);
        }
    }

    fn add_gradient(
        &mut self,
        strip: i32,
        colors_per_strip: i32,
        seconds: f32,
        colors: Vec<Color>,
        now: Instant,
    ) {
        if !matches!(self.active, Some(Animation::Gradient(_))) {
            self.stop_active();
        }
        let mut gradient = match self.active.take() {
            Some(Animation::Gradient(gradient)) => gradient,
            _ => Gradient::new(self.buffer.geometry(), now),
        };

        if colors_per_strip > 0 {
            let chunks = colors.chunks(colors_per_strip as usize);
            for (i, chunk) in chunks.take(self.buffer.num_strips()).enumerate() {
                gradient.add_strip(&self.buffer, i as i32, chunk.to_vec(), seconds, now);
            }
        } else {
            gradient.add_strip(&self.buffer, strip, colors, seconds, now);
        }
        self.active = Some(Animation::Gradient(gradient));
    }

    fn stop_active(&mut self) {
        if let Some(mut animation) = self.active.take() {
            debug!(animation = animation.name(), "Stopping animation");
            animation.stop(&mut self.buffer);
        }
    }

    /// Make sure something repaints the background under an overlay.
    fn ensure_overlay_host(&mut self) {
        if self.overlay.is_some() && self.active.is_none() {
            self.active = Some(Animation::CopySource(CopySource::new(&self.buffer)));
        }
    }

    /// Run one tick. Returns false when there was nothing to animate and
    /// the buffer was not written.
    pub fn tick(&mut self, now: Instant) -> Result<bool> {
        let Some(active) = self.active.as_mut() else {
            return Ok(false);
        };

        let finished = active.run(&mut self.buffer, now)
            || (active.needs_overlay() && self.overlay.is_none());
        if finished {
            debug!(animation = active.name(), "Animation finished");
            active.stop(&mut self.buffer);
            self.active = None;
            self.ensure_overlay_host();
        }

        if let Some(overlay) = self.overlay.as_mut() {
            overlay.run(&mut self.buffer, now);
        }
        self.buffer.write()?;
        Ok(true)
    }

    /// Drop every animation and write an all-black frame.
    pub fn blank(&mut self) -> Result<()> {
        self.overlay = None;
        self.stop_active();
        self.buffer.set_color(Color::BLACK);
        self.buffer.write()
    }

    pub fn status_lines(&self, headers: u64, commands: u64) -> Vec<String> {
        let mut lines = vec![format!(
            "Status draws={}, headers={}, commands={}",
            self.buffer.draws(),
            headers,
            commands
        )];
        lines.push(
            self.last_error
                .clone()
                .unwrap_or_else(|| "no current command".to_string()),
        );
        if let Some(active) = &self.active {
            lines.push(format!("Animation: {}", active.name()));
        }
        if let Some(overlay) = &self.overlay {
            lines.push(format!("Overlay animation: {}", overlay.name()));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_buffer::Geometry;
    use crate::protocol::FrameDecoder;
    use crate::testing::RecordingSink;
    use std::time::Duration;

    const TICK: Duration = Duration::from_millis(16);

    fn controller() -> (Controller, RecordingSink) {
        let sink = RecordingSink::default();
        let buffer = PixelBuffer::new(Geometry::new(16, 40), Box::new(sink.clone()));
        (Controller::new(buffer), sink)
    }

    fn active_name(controller: &Controller) -> Option<&'static str> {
        controller.active().map(Animation::name)
    }

    #[test]
    fn test_decoded_set_color_changes_one_pixel() {
        let (mut controller, sink) = controller();
        let before = controller.buffer().copy_pixels();

        let frame = Command::SetColor {
            strip: 3,
            index: 10,
            colors: vec![Color::from_packed(0xFF0000)],
        }
        .encode();
        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame);
        let command = decoder.poll().unwrap().unwrap();

        let t0 = Instant::now();
        assert_eq!(controller.dispatch(command, t0).unwrap(), Dispatched::Done);

        let after = controller.buffer().copy_pixels();
        let geometry = controller.buffer().geometry();
        for (i, (b, a)) in before.iter().zip(&after).enumerate() {
            if i == geometry.offset(3, 10) {
                assert_eq!(*a, 0xFF0000);
            } else {
                assert_eq!(a, b, "pixel {i} changed");
            }
        }
        // written immediately, no animation
        assert_eq!(sink.frame_count(), 1);
        assert!(controller.active().is_none());
    }

    #[test]
    fn test_set_color_column_and_fill() {
        let (mut controller, _) = controller();
        let t0 = Instant::now();
        let red = Color::new(255, 0, 0);
        let blue = Color::new(0, 0, 255);
        let set = |strip, index, color| Command::SetColor {
            strip,
            index,
            colors: vec![color],
        };

        controller.dispatch(set(-1, 5, red), t0).unwrap();
        assert!(controller.buffer().pixels().iter().all(|&p| p == red.pack()));

        controller.dispatch(set(2, -1, blue), t0).unwrap();
        assert_eq!(controller.buffer().get_pixel(2, 39), blue);
        assert_eq!(controller.buffer().get_pixel(1, 39), red);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let (mut controller, sink) = controller();
        let t0 = Instant::now();
        let err = controller
            .dispatch(
                Command::SetColor {
                    strip: 16,
                    index: 0,
                    colors: vec![Color::new(1, 1, 1)],
                },
                t0,
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::StripOutOfRange { strip: 16, .. })
        ));
        assert_eq!(sink.frame_count(), 0);
        let lines = controller.status_lines(0, 0);
        assert!(lines[1].contains("out of range"), "{lines:?}");
    }

    #[test]
    fn test_mismatched_image_is_rejected() {
        let (mut controller, _) = controller();
        controller
            .dispatch(Command::Rainbow { length: 20, seconds: 0.0 }, Instant::now())
            .unwrap();
        let image = BufferImage {
            num_strips: 2,
            leds_per_strip: 2,
            seconds: 0.0,
            pixels: vec![0; 4],
        };
        assert!(controller
            .dispatch(Command::FullBuffer(image), Instant::now())
            .is_err());
        // the running animation is untouched
        assert_eq!(active_name(&controller), Some("Rainbow"));
    }

    #[test]
    fn test_rain_survives_finished_base() {
        let (mut controller, sink) = controller();
        let t0 = Instant::now();
        controller
            .dispatch(
                Command::CrossFade {
                    seconds: 0.1,
                    colors: vec![Color::new(0, 0, 80)],
                },
                t0,
            )
            .unwrap();
        controller
            .dispatch(Command::StartRain { size: 8, amount: 100.0 }, t0)
            .unwrap();
        assert_eq!(active_name(&controller), Some("CrossFade"));

        let mut now = t0;
        for _ in 0..20 {
            now += TICK;
            controller.tick(now).unwrap();
        }
        assert_eq!(active_name(&controller), Some("CopySource"));
        assert_eq!(controller.overlay().map(Animation::name), Some("RainOverlay"));

        // the overlay is still painting on top of the faded background
        let frames = sink.frames();
        let last = frames.last().unwrap();
        let background = Color::new(0, 0, 80).pack();
        assert!(last.iter().any(|&p| p != background));
        assert!(last.iter().any(|&p| p == background));
    }

    #[test]
    fn test_one_write_per_tick() {
        let (mut controller, sink) = controller();
        let t0 = Instant::now();
        controller.dispatch(Command::NeuralDrop { iterations: 0 }, t0).unwrap();
        controller
            .dispatch(Command::StartRain { size: 8, amount: 100.0 }, t0)
            .unwrap();
        for i in 1..=10 {
            controller.tick(t0 + TICK * i).unwrap();
        }
        assert_eq!(sink.frame_count(), 10);
        assert_eq!(controller.buffer().draws(), 10);
    }

    #[test]
    fn test_start_rain_without_animation_hosts_it() {
        let (mut controller, _) = controller();
        let t0 = Instant::now();
        controller
            .dispatch(Command::StartRain { size: 4, amount: 50.0 }, t0)
            .unwrap();
        assert_eq!(active_name(&controller), Some("CopySource"));

        controller.dispatch(Command::StopRain, t0).unwrap();
        assert!(controller.overlay().is_none());
        // the host retires itself on the next tick
        controller.tick(t0 + TICK).unwrap();
        assert!(controller.active().is_none());
        assert!(!controller.tick(t0 + TICK * 2).unwrap());
    }

    #[test]
    fn test_overlay_moves_to_new_command() {
        let (mut controller, _) = controller();
        let t0 = Instant::now();
        let fire = Command::Fire {
            cooling: 55.0,
            sparkle: 120.0,
            seconds: 0.0,
        };
        controller.dispatch(fire, t0).unwrap();
        controller
            .dispatch(Command::StartRain { size: 4, amount: 50.0 }, t0)
            .unwrap();
        controller
            .dispatch(Command::Rainbow { length: 30, seconds: 0.0 }, t0)
            .unwrap();
        assert_eq!(active_name(&controller), Some("Rainbow"));
        assert!(controller.overlay().is_some());

        // SetColor starts no animation, so a host is synthesized
        controller
            .dispatch(
                Command::SetColor {
                    strip: -1,
                    index: -1,
                    colors: vec![Color::new(9, 9, 9)],
                },
                t0,
            )
            .unwrap();
        assert_eq!(active_name(&controller), Some("CopySource"));
        assert!(controller.overlay().is_some());
    }

    #[test]
    fn test_gradient_is_additive() {
        let (mut controller, _) = controller();
        let t0 = Instant::now();
        let red = Color::new(255, 0, 0);
        let green = Color::new(0, 255, 0);
        let gradient = |strip, color| Command::Gradient {
            strip,
            colors_per_strip: 0,
            seconds: 0.0,
            colors: vec![color],
        };

        controller.dispatch(gradient(0, red), t0).unwrap();
        controller.dispatch(gradient(5, green), t0).unwrap();
        controller.tick(t0 + TICK).unwrap();

        assert_eq!(active_name(&controller), Some("Gradient"));
        assert_eq!(controller.buffer().get_pixel(0, 20), red);
        assert_eq!(controller.buffer().get_pixel(5, 20), green);
        assert_eq!(controller.buffer().get_pixel(6, 20), Color::BLACK);
    }

    #[test]
    fn test_gradient_colors_per_strip() {
        let (mut controller, _) = controller();
        let t0 = Instant::now();
        let colors: Vec<Color> = (0..4).map(|i| Color::new(i * 10, 0, 0)).collect();
        controller
            .dispatch(
                Command::Gradient {
                    strip: -1,
                    colors_per_strip: 1,
                    seconds: 0.0,
                    colors,
                },
                t0,
            )
            .unwrap();
        controller.tick(t0 + TICK).unwrap();
        assert_eq!(controller.buffer().get_pixel(3, 0), Color::new(30, 0, 0));
        // strips beyond the supplied colors stay dark
        assert_eq!(controller.buffer().get_pixel(4, 0), Color::BLACK);
    }

    #[test]
    fn test_replacing_stops_previous() {
        let (mut controller, _) = controller();
        let t0 = Instant::now();
        controller.dispatch(Command::NeuralDrop { iterations: 0 }, t0).unwrap();
        controller.tick(t0 + TICK).unwrap();
        controller
            .dispatch(
                Command::Twinkle {
                    density: 2,
                    seconds: 10.0,
                    base: Color::BLACK,
                    twinkle: Color::new(255, 255, 255),
                },
                t0,
            )
            .unwrap();
        assert_eq!(active_name(&controller), Some("Twinkle"));
        // NeuralDrop leaves its base color behind when stopped
        assert_eq!(controller.buffer().get_pixel(0, 0), Color::new(0x1b, 0x23, 0x4b));
    }

    #[test]
    fn test_status_report() {
        let (mut controller, _) = controller();
        let t0 = Instant::now();
        assert_eq!(
            controller.status_lines(2, 1),
            vec!["Status draws=0, headers=2, commands=1", "no current command"]
        );
        controller.dispatch(Command::NeuralDrop { iterations: 0 }, t0).unwrap();
        controller
            .dispatch(Command::StartRain { size: 4, amount: 50.0 }, t0)
            .unwrap();
        controller.tick(t0 + TICK).unwrap();
        assert_eq!(controller.dispatch(Command::Status, t0).unwrap(), Dispatched::Status);
        assert_eq!(
            controller.status_lines(3, 3),
            vec![
                "Status draws=1, headers=3, commands=3",
                "no current command",
                "Animation: NeuralDrop",
                "Overlay animation: RainOverlay",
            ]
        );
    }

    #[test]
    fn test_blank() {
        let (mut controller, sink) = controller();
        let t0 = Instant::now();
        controller.dispatch(Command::Rainbow { length: 10, seconds: 0.0 }, t0).unwrap();
        controller.tick(t0 + TICK).unwrap();
        controller.blank().unwrap();
        assert!(controller.active().is_none());
        assert!(sink.frames().last().unwrap().iter().all(|&p| p == 0));
    }
}
