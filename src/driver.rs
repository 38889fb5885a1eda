//! The device side: read frames off the link, dispatch them and keep the
//! animations ticking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::animation::Animation;
use crate::command::Command;
use crate::config::Config;
use crate::controller::{Controller, Dispatched};
use crate::link::{self, Link};
use crate::output::{NullSink, RenderSink, SerialStripSink};
use crate::pixel_buffer::PixelBuffer;
use crate::protocol::{FrameDecoder, COMPLETE_TOKEN, ERROR_TOKEN, STAGING_SIZE};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Raw receive mode entered by a `SpeedTest` command.
///
/// The host streams blocks of [`SpeedTest::BLOCK`] identical bytes whose
/// value counts up from 0, skipping 255, which terminates the test.
#[derive(Debug)]
pub struct SpeedTest {
    started: Instant,
    expected: u8,
    pos: usize,
    errors: u64,
    total: u64,
    done: bool,
}

impl SpeedTest {
    pub const BLOCK: usize = 1000;
    pub const TIMEOUT: Duration = Duration::from_secs(10);
    pub const TERMINATOR: u8 = 255;

    pub fn new(now: Instant) -> Self {
        SpeedTest {
            started: now,
            expected: 0,
            pos: 0,
            errors: 0,
            total: 0,
            done: false,
        }
    }

    /// Next block value after `x`.
    pub fn next_value(x: u8) -> u8 {
        match x.wrapping_add(1) {
            Self::TERMINATOR => 0,
            next => next,
        }
    }

    /// Check received bytes against the pattern. Bytes after the terminator
    /// are ignored.
    pub fn receive(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.done {
                return;
            }
            self.total += 1;
            if byte == Self::TERMINATOR {
                self.done = true;
                return;
            }
            if byte != self.expected {
                // resync on whatever the sender is on now
                self.errors += 1;
                self.expected = byte;
                self.pos = 0;
            }
            self.pos += 1;
            if self.pos % Self::BLOCK == 0 {
                self.expected = Self::next_value(self.expected);
            }
        }
    }

    pub fn finished(&self, now: Instant) -> bool {
        self.done || now.saturating_duration_since(self.started) >= Self::TIMEOUT
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn report(&self) -> String {
        format!(
            "received {} bytes, and found {} errors",
            self.total, self.errors
        )
    }
}

pub struct Driver {
    link: Box<dyn Link>,
    decoder: FrameDecoder,
    controller: Controller,
    speed_test: Option<SpeedTest>,
    read_buf: Vec<u8>,
    commands: u64,
    frame_interval: Duration,
}

impl Driver {
    pub fn new(link: Box<dyn Link>, controller: Controller, fps: u32) -> Self {
        Driver {
            link,
            decoder: FrameDecoder::new(),
            controller,
            speed_test: None,
            read_buf: vec![0; STAGING_SIZE],
            commands: 0,
            frame_interval: Duration::from_secs(1) / fps.max(1),
        }
    }

    /// Open the configured link and LED output.
    pub fn open(config: &Config) -> Result<Self> {
        let geometry = config.layout.geometry();
        let sink: Box<dyn RenderSink> = match &config.driver.output {
            Some(output) => Box::new(
                SerialStripSink::open(output, geometry)
                    .with_context(|| format!("Failed to open LED output {}", output.port))?,
            ),
            None => {
                info!("No LED output configured, rendering to nothing");
                Box::new(NullSink)
            }
        };
        let link = link::listen(&config.link).context("Failed to open driver link")?;
        let controller = Controller::new(PixelBuffer::new(geometry, sink));
        Ok(Self::new(link, controller, config.driver.fps))
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn commands(&self) -> u64 {
        self.commands
    }

    pub fn in_speed_test(&self) -> bool {
        self.speed_test.is_some()
    }

    /// Default animation until the host says otherwise: endless neural drops.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        info!(
            num_strips = self.controller.buffer().num_strips(),
            leds_per_strip = self.controller.buffer().leds_per_strip(),
            "Starting neural drop"
        );
        self.controller
            .dispatch(Command::NeuralDrop { iterations: 0 }, now)?;
        Ok(())
    }

    /// Service the link once and advance the animations by one tick.
    pub fn step(&mut self, now: Instant) -> Result<()> {
        if self.speed_test.is_some() {
            self.receive_speed_test(now)?;
        } else {
            self.receive_frames(now)?;
        }
        self.controller.tick(now)?;
        Ok(())
    }

    /// Loop until `running` is cleared, then blank the strips.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        self.start(Instant::now())?;
        let mut last_stats = Instant::now();

        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            self.step(now)?;

            if now.duration_since(last_stats) >= STATS_INTERVAL {
                debug!(
                    draws = self.controller.buffer().draws(),
                    headers = self.decoder.headers(),
                    commands = self.commands,
                    payload_capacity = self.decoder.payload_capacity(),
                    speed_test = self.in_speed_test(),
                    animation = self.controller.active().map(Animation::name),
                    overlay = self.controller.overlay().map(Animation::name),
                    "Driver stats"
                );
                last_stats = now;
            }

            let elapsed = now.elapsed();
            if elapsed < self.frame_interval {
                thread::sleep(self.frame_interval - elapsed);
            }
        }

        self.shutdown()
    }

    pub fn shutdown(&mut self) -> Result<()> {
        info!("Turning off LEDs...");
        self.controller.blank()
    }

    fn receive_frames(&mut self, now: Instant) -> Result<()> {
        let free = self.decoder.free_capacity();
        if free > 0 {
            let n = self
                .link
                .read_available(&mut self.read_buf[..free])
                .context("Failed to read from link")?;
            self.decoder.feed(&self.read_buf[..n]);
        }

        while let Some(result) = self.decoder.poll() {
            self.commands += 1;
            match result {
                Ok(command) => self.handle(command, now)?,
                Err(e) => self.reject(&e)?,
            }
            if let Some(test) = self.speed_test.as_mut() {
                // anything staged past the SpeedTest frame is test data
                test.receive(&self.decoder.take_staged());
                break;
            }
        }
        Ok(())
    }

    fn handle(&mut self, command: Command, now: Instant) -> Result<()> {
        let name = command.name();
        match self.controller.dispatch(command, now) {
            Ok(Dispatched::Done) => self.acknowledge(name),
            Ok(Dispatched::Status) => {
                let lines = self
                    .controller
                    .status_lines(self.decoder.headers(), self.commands);
                for line in lines {
                    self.send_line(&line)?;
                }
                self.acknowledge(name)
            }
            Ok(Dispatched::SpeedTest) => {
                self.acknowledge(name)?;
                info!("Running speed test");
                self.speed_test = Some(SpeedTest::new(now));
                Ok(())
            }
            Err(e) => self.reject(&format!("{e:#}")),
        }
    }

    fn receive_speed_test(&mut self, now: Instant) -> Result<()> {
        let Some(test) = self.speed_test.as_mut() else {
            return Ok(());
        };
        while !test.finished(now) {
            let n = self
                .link
                .read_available(&mut self.read_buf[..SpeedTest::BLOCK])
                .context("Failed to read from link")?;
            if n == 0 {
                return Ok(());
            }
            test.receive(&self.read_buf[..n]);
        }

        let report = test.report();
        if test.errors() > 0 {
            warn!(report = %report, "Speed test finished with errors");
        } else {
            info!(report = %report, "Speed test finished");
        }
        self.speed_test = None;
        self.send_line(&report)
    }

    fn acknowledge(&mut self, name: &str) -> Result<()> {
        self.send_line(&format!("{COMPLETE_TOKEN}: {name}"))
    }

    /// Report a failed command and drop whatever else is queued so the next
    /// frame starts clean.
    fn reject(&mut self, error: &dyn std::fmt::Display) -> Result<()> {
        warn!(error = %error, "Command rejected");
        self.controller.record_error(error);
        self.send_line(&format!("{ERROR_TOKEN} {error}"))?;
        self.decoder.reset_input();
        self.link
            .clear_input()
            .context("Failed to flush link input")?;
        Ok(())
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.link
            .write_all(format!("{line}\r\n").as_bytes())
            .context("Failed to write to link")
    }
}
