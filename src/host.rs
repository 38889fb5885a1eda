//! The controlling side: turns JSON requests into frames and sends them one
//! at a time, waiting for the driver's verdict on each.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::color::Color;
use crate::command::{BufferImage, Command};
use crate::config::{Config, LinkConfig};
use crate::driver::SpeedTest;
use crate::link::{self, Link};
use crate::pixel_buffer::{Geometry, PixelGrid};
use crate::protocol::{wait_for_ack, AckOutcome, AckPolicy, MARKER};

/// Markers written on connect to knock the driver's parser out of any
/// half-received frame.
const RESYNC_MARKERS: usize = 5;

const SERIAL_TEST_BLOCKS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("bad led range: {0:?}")]
    BadRange(String),

    #[error("strip {strip} out of range, layout has {num_strips} strips")]
    StripOutOfRange { strip: usize, num_strips: usize },

    #[error("led {led} out of range, strips have {leds_per_strip} leds")]
    LedOutOfRange { led: usize, leds_per_strip: usize },
}

/// Requests accepted from command sources: anything the driver understands,
/// plus edits applied to the host's mirror of the display.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HostRequest {
    Host(HostCommand),
    Device(Command),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
pub enum HostCommand {
    /// Paint whole strips and fade the display to the result.
    ColumnFade {
        #[serde(default)]
        seconds: f32,
        columns: Vec<ColumnColor>,
    },
    /// Paint led ranges on individual strips.
    SetPixels { pixels: Vec<PixelRun> },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnColor {
    pub index: usize,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PixelRun {
    #[serde(default)]
    pub s: usize,
    /// Led ranges such as `"1, 2-10, 30"`.
    pub l: String,
    pub color: Color,
}

/// Parse a led range list like `"1, 2-10, 30, 40 - 100"`.
pub fn parse_ranges(spec: &str) -> Result<Vec<RangeInclusive<usize>>, HostError> {
    let bad = || HostError::BadRange(spec.to_string());
    spec.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.trim().parse().map_err(|_| bad())?;
                let end: usize = end.trim().parse().map_err(|_| bad())?;
                if end < start {
                    return Err(bad());
                }
                Ok(start..=end)
            }
            None => {
                let led: usize = part.parse().map_err(|_| bad())?;
                Ok(led..=led)
            }
        })
        .collect()
}

/// Start time of the send currently waiting on the driver, shared with the
/// watchdog.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<Mutex<Option<Instant>>>);

impl InFlight {
    fn slot(&self) -> MutexGuard<'_, Option<Instant>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self, now: Instant) {
        *self.slot() = Some(now);
    }

    pub fn end(&self) {
        *self.slot() = None;
    }

    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.slot().map(|start| now.saturating_duration_since(start))
    }
}

/// Single-flight sender: one frame on the wire at a time, each followed by
/// the ack handshake before the link is released.
pub struct HostSender {
    link: Mutex<Box<dyn Link>>,
    in_flight: InFlight,
    policy: AckPolicy,
}

impl HostSender {
    pub fn new(link: Box<dyn Link>, policy: AckPolicy) -> Self {
        HostSender {
            link: Mutex::new(link),
            in_flight: InFlight::default(),
            policy,
        }
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    /// Exclusive access to the raw link, blocking other senders.
    pub fn lock_link(&self) -> MutexGuard<'_, Box<dyn Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn send(&self, command: &Command) -> Result<AckOutcome> {
        let frame = command.encode();
        let mut link = self.lock_link();
        debug!(command = command.name(), bytes = frame.len(), "Sending");
        trace!(frame = ?frame, "Frame bytes");

        self.in_flight.begin(Instant::now());
        let result = link
            .write_all(&frame)
            .and_then(|()| wait_for_ack(&mut **link, &self.policy));
        self.in_flight.end();

        result.with_context(|| format!("Failed to send {}", command.name()))
    }
}

/// Kills the process when a send has waited on the driver for too long.
pub struct Watchdog {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub const POLL: Duration = Duration::from_millis(50);

    pub fn spawn<F>(in_flight: InFlight, limit: Duration, on_wedged: F) -> Result<Self>
    where
        F: Fn(Duration) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                while flag.load(Ordering::Relaxed) {
                    if let Some(elapsed) = in_flight.elapsed(Instant::now()) {
                        if elapsed > limit {
                            error!(
                                elapsed_secs = elapsed.as_secs_f32(),
                                "Driver stopped acknowledging, link is wedged"
                            );
                            on_wedged(elapsed);
                            return;
                        }
                    }
                    thread::sleep(Self::POLL);
                }
            })
            .context("Failed to spawn watchdog thread")?;
        Ok(Watchdog {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Watchdog action in production; a supervisor is expected to restart us.
pub fn exit_process(_elapsed: Duration) {
    std::process::exit(1);
}

/// Host state shared by every command source.
pub struct Host {
    sender: HostSender,
    mirror: Mutex<PixelGrid>,
}

impl Host {
    pub fn new(sender: HostSender, geometry: Geometry) -> Self {
        Host {
            sender,
            mirror: Mutex::new(PixelGrid::new(geometry)),
        }
    }

    /// Connect to the driver over the configured link.
    pub fn connect(config: &Config) -> Result<Self> {
        let mut link = link::connect(&config.link).context("Failed to open host link")?;
        if let LinkConfig::Serial { .. } = config.link {
            link.write_all(&MARKER.repeat(RESYNC_MARKERS))
                .context("Failed to resync driver")?;
        }
        let sender = HostSender::new(link, config.host.ack);
        Ok(Self::new(sender, config.layout.geometry()))
    }

    pub fn sender(&self) -> &HostSender {
        &self.sender
    }

    /// Parse and execute one JSON request.
    pub fn handle_line(&self, line: &str) -> Result<AckOutcome> {
        let request: HostRequest =
            serde_json::from_str(line).with_context(|| format!("Invalid request: {line}"))?;
        self.handle(request)
    }

    pub fn handle(&self, request: HostRequest) -> Result<AckOutcome> {
        match request {
            HostRequest::Device(command) => self.sender.send(&command),
            HostRequest::Host(command) => {
                let image = self.apply(command)?;
                self.sender.send(&image.into_command())
            }
        }
    }

    /// Edit the mirror and snapshot it for transmission.
    fn apply(&self, command: HostCommand) -> Result<BufferImage, HostError> {
        let mut mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
        let geometry = mirror.geometry();
        let check_strip = |strip: usize| {
            if strip < geometry.num_strips {
                Ok(())
            } else {
                Err(HostError::StripOutOfRange {
                    strip,
                    num_strips: geometry.num_strips,
                })
            }
        };

        match command {
            HostCommand::ColumnFade { seconds, columns } => {
                for column in &columns {
                    check_strip(column.index)?;
                }
                for column in columns {
                    mirror.set_column(column.color, column.index);
                }
                Ok(BufferImage::from_grid(&mirror, seconds))
            }
            HostCommand::SetPixels { pixels } => {
                let mut edits = Vec::new();
                for run in &pixels {
                    check_strip(run.s)?;
                    for range in parse_ranges(&run.l)? {
                        if *range.end() >= geometry.leds_per_strip {
                            return Err(HostError::LedOutOfRange {
                                led: *range.end(),
                                leds_per_strip: geometry.leds_per_strip,
                            });
                        }
                        edits.push((run.s, range, run.color));
                    }
                }
                for (strip, range, color) in edits {
                    for led in range {
                        mirror.set_pixel(color, strip, led);
                    }
                }
                Ok(BufferImage::from_grid(&mirror, 0.0))
            }
        }
    }
}

/// One-line summary of a send for command sources to print or return.
pub fn describe(result: &Result<AckOutcome>) -> String {
    match result {
        Ok(AckOutcome::Complete(line)) | Ok(AckOutcome::Failed(line)) => line.clone(),
        Ok(AckOutcome::TimedOut) => "timeout waiting for driver".to_string(),
        Err(e) => format!("error: {e:#}"),
    }
}

/// Measure raw link throughput: put the driver in speed-test mode, stream the
/// block pattern, and return the driver's report line if one arrives.
pub fn serial_test(sender: &HostSender, delay: Duration) -> Result<Option<String>> {
    match sender.send(&Command::SpeedTest)? {
        AckOutcome::Failed(line) => anyhow::bail!("Driver refused speed test: {line}"),
        AckOutcome::TimedOut => warn!("Speed test was not acknowledged, streaming anyway"),
        AckOutcome::Complete(_) => {}
    }

    let mut link = sender.lock_link();
    info!(blocks = SERIAL_TEST_BLOCKS, "Running serial test...");
    let started = Instant::now();
    let mut block = [0u8; SpeedTest::BLOCK];
    let mut x = 0u8;
    for _ in 0..SERIAL_TEST_BLOCKS {
        block.fill(x);
        link.write_all(&block).context("Serial test write failed")?;
        x = SpeedTest::next_value(x);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    let elapsed = started.elapsed();
    thread::sleep(Duration::from_millis(100));
    block.fill(SpeedTest::TERMINATOR);
    link.write_all(&block).context("Serial test write failed")?;
    info!(seconds = elapsed.as_secs_f32(), "Serial test sent");

    let deadline = Instant::now() + SpeedTest::TIMEOUT;
    while Instant::now() < deadline {
        match link.read_line(Duration::from_millis(100))? {
            Some(line) if line.starts_with("received ") => return Ok(Some(line)),
            Some(line) => debug!(line = %line, "driver"),
            None => {}
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameDecoder;
    use crate::testing::MockLink;
    use std::sync::mpsc;

    const QUICK: AckPolicy = AckPolicy {
        retries: 3,
        poll_ms: 1,
    };

    fn host(link: &MockLink) -> Host {
        Host::new(
            HostSender::new(Box::new(link.clone()), QUICK),
            Geometry::new(4, 10),
        )
    }

    fn sent_commands(link: &MockLink) -> Vec<Command> {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&link.take_outbound());
        std::iter::from_fn(|| decoder.poll())
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_parse_ranges() {
        assert_eq!(
            parse_ranges("1, 2-10, 30, 40 - 100").unwrap(),
            vec![1..=1, 2..=10, 30..=30, 40..=100]
        );
        assert!(parse_ranges("").unwrap().is_empty());
        assert!(parse_ranges("5-").is_err());
        assert!(parse_ranges("9-3").is_err());
        assert!(parse_ranges("x").is_err());
    }

    #[test]
    fn test_request_forms() {
        let host: HostRequest =
            serde_json::from_str(r#"{"command":"SetPixels","pixels":[{"s":1,"l":"0-2","color":[1,2,3]}]}"#)
                .unwrap();
        assert!(matches!(host, HostRequest::Host(HostCommand::SetPixels { .. })));

        let device: HostRequest =
            serde_json::from_str(r#"{"command":"Rainbow","length":20}"#).unwrap();
        assert_eq!(
            device,
            HostRequest::Device(Command::Rainbow {
                length: 20,
                seconds: 0.0
            })
        );
    }

    #[test]
    fn test_device_command_is_sent_and_acked() {
        let link = MockLink::default();
        link.push_inbound(b"##COMPLETE##: StopRain\r\n");
        let host = host(&link);

        let outcome = host.handle_line(r#"{"command":"StopRain"}"#).unwrap();
        assert_eq!(outcome, AckOutcome::Complete("##COMPLETE##: StopRain".to_string()));
        assert_eq!(sent_commands(&link), vec![Command::StopRain]);
        assert_eq!(host.sender().in_flight().elapsed(Instant::now()), None);
    }

    #[test]
    fn test_column_fade_sends_mirror() {
        let link = MockLink::default();
        let host = host(&link);
        let request = r#"{"command":"ColumnFade","seconds":2,"columns":[{"index":1,"color":[9,8,7]}]}"#;
        assert_eq!(host.handle_line(request).unwrap(), AckOutcome::TimedOut);

        let sent = sent_commands(&link);
        let [Command::EncodedBuffer(image)] = sent.as_slice() else {
            panic!("unexpected frames {sent:?}");
        };
        assert_eq!(image.seconds, 2.0);
        let geometry = image.geometry();
        let painted = Color::new(9, 8, 7).pack();
        assert_eq!(image.pixels[geometry.offset(1, 0)], painted);
        assert_eq!(image.pixels[geometry.offset(1, 9)], painted);
        assert_eq!(image.pixels[geometry.offset(0, 0)], 0);
    }

    #[test]
    fn test_set_pixels_accumulates_in_mirror() {
        let link = MockLink::default();
        let host = host(&link);
        host.handle_line(r#"{"command":"SetPixels","pixels":[{"s":0,"l":"0-1","color":[1,1,1]}]}"#)
            .unwrap();
        link.take_outbound();
        host.handle_line(r#"{"command":"SetPixels","pixels":[{"s":3,"l":"9","color":[2,2,2]}]}"#)
            .unwrap();

        let sent = sent_commands(&link);
        let [Command::EncodedBuffer(image)] = sent.as_slice() else {
            panic!("unexpected frames {sent:?}");
        };
        let geometry = image.geometry();
        assert_eq!(image.pixels[geometry.offset(0, 1)], Color::new(1, 1, 1).pack());
        assert_eq!(image.pixels[geometry.offset(3, 9)], Color::new(2, 2, 2).pack());
    }

    #[test]
    fn test_out_of_range_edit_sends_nothing() {
        let link = MockLink::default();
        let host = host(&link);
        let err = host
            .handle_line(r#"{"command":"SetPixels","pixels":[{"s":0,"l":"5-10","color":[1,1,1]}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("led 10 out of range"));
        let err = host
            .handle_line(r#"{"command":"ColumnFade","columns":[{"index":4,"color":[1,1,1]}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("strip 4"));
        assert!(link.take_outbound().is_empty());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let link = MockLink::default();
        let host = host(&link);
        assert!(host.handle_line("{not json").is_err());
        assert!(host.handle_line(r#"{"command":"Disco"}"#).is_err());
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_sends_wait_for_the_previous_ack() {
        let link = MockLink::default();
        let patient = AckPolicy {
            retries: 5000,
            poll_ms: 1,
        };
        let sender = Arc::new(HostSender::new(Box::new(link.clone()), patient));
        let spawn = |command: Command| {
            let sender = Arc::clone(&sender);
            thread::spawn(move || sender.send(&command).unwrap())
        };
        let first_len = Command::StopRain.encode().len();

        let first = spawn(Command::StopRain);
        wait_until(|| link.outbound_len() >= first_len);
        let second = spawn(Command::Status);

        // the second sender stays parked while the first waits on its ack
        thread::sleep(Duration::from_millis(50));
        assert_eq!(link.outbound_len(), first_len);
        assert!(sender.in_flight().elapsed(Instant::now()).is_some());

        link.push_inbound(b"##COMPLETE##: StopRain\r\n");
        assert_eq!(
            first.join().unwrap(),
            AckOutcome::Complete("##COMPLETE##: StopRain".to_string())
        );
        wait_until(|| link.outbound_len() > first_len);
        link.push_inbound(b"##COMPLETE##: Status\r\n");
        assert_eq!(
            second.join().unwrap(),
            AckOutcome::Complete("##COMPLETE##: Status".to_string())
        );

        // whole frames, in order
        assert_eq!(sent_commands(&link), vec![Command::StopRain, Command::Status]);
    }

    #[test]
    fn test_watchdog_trips_on_stuck_send() {
        let in_flight = InFlight::default();
        let (tx, rx) = mpsc::channel();
        let _watchdog = Watchdog::spawn(in_flight.clone(), Duration::from_millis(100), move |e| {
            let _ = tx.send(e);
        })
        .unwrap();

        in_flight.begin(Instant::now());
        let elapsed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(elapsed > Duration::from_millis(100));
    }

    #[test]
    fn test_watchdog_ignores_idle_link() {
        let (tx, rx) = mpsc::channel();
        let mut watchdog = Watchdog::spawn(InFlight::default(), Duration::ZERO, move |e| {
            let _ = tx.send(e);
        })
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        watchdog.stop();
    }

    #[test]
    fn test_serial_test_streams_pattern() {
        let link = MockLink::default();
        link.push_inbound(b"##COMPLETE##: SpeedTest\r\nreceived 1000001 bytes, and found 0 errors\r\n");
        let sender = HostSender::new(Box::new(link.clone()), QUICK);

        let report = serial_test(&sender, Duration::ZERO).unwrap();
        assert_eq!(
            report.as_deref(),
            Some("received 1000001 bytes, and found 0 errors")
        );

        let out = link.take_outbound();
        let frame_len = Command::SpeedTest.encode().len();
        let stream = &out[frame_len..];
        assert_eq!(stream.len(), (SERIAL_TEST_BLOCKS + 1) * SpeedTest::BLOCK);
        assert_eq!(stream[0], 0);
        assert_eq!(stream[SpeedTest::BLOCK], 1);
        assert_eq!(stream[255 * SpeedTest::BLOCK], 0);
        assert!(stream[SERIAL_TEST_BLOCKS * SpeedTest::BLOCK..]
            .iter()
            .all(|&b| b == SpeedTest::TERMINATOR));
    }
}
