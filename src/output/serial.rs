use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::SerialPort;
use tracing::{debug, error, info, trace, warn};

use super::adalight::build_adalight_frame;
use super::pixel_format::{transform_pixels, PixelFormat};
use super::RenderSink;
use crate::config::OutputConfig;
use crate::pixel_buffer::Geometry;

/// Render sink that streams Adalight frames to a serial LED controller from a
/// dedicated worker thread.
///
/// The channel between the render loop and the worker holds a single frame:
/// when the port is slower than the animation, stale frames are dropped and
/// the newest one wins.
pub struct SerialStripSink {
    port_name: String,
    format: PixelFormat,
    sender: SyncSender<Vec<u8>>,
    frames_sent: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    worker_handle: Option<thread::JoinHandle<()>>,
}

impl SerialStripSink {
    pub fn open(config: &OutputConfig, geometry: Geometry) -> Result<Self> {
        let port = open_port(&config.port, config.baud_rate)?;
        let format = config.pixel_format;

        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(1);
        let frames_sent = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            port,
            port_name: config.port.clone(),
            stride: format.stride(),
            blank: vec![0u8; geometry.pixel_count() * format.stride()],
            frames_sent: Arc::clone(&frames_sent),
            running: Arc::clone(&running),
        };
        let worker_handle = thread::Builder::new()
            .name(format!("render-{}", config.port))
            .spawn(move || worker.run(receiver))
            .context("Failed to spawn render worker")?;

        info!(
            port = %config.port,
            baud = config.baud_rate,
            format = ?format,
            leds = geometry.pixel_count(),
            "Opened render output"
        );

        Ok(SerialStripSink {
            port_name: config.port.clone(),
            format,
            sender,
            frames_sent,
            running,
            worker_handle: Some(worker_handle),
        })
    }

    /// Number of frames the worker has written to the port.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Stop the worker; it blanks the strips on its way out.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
            info!(port = %self.port_name, frames = self.frames_sent(), "Render output stopped");
        }
    }
}

impl RenderSink for SerialStripSink {
    fn render(&mut self, pixels: &[u32], geometry: Geometry) -> Result<()> {
        let data = transform_pixels(pixels, geometry, self.format);
        match self.sender.try_send(data) {
            Ok(()) => Ok(()),
            // skip-ahead: the worker is still busy with the previous frame
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => {
                anyhow::bail!("render output {} is disconnected", self.port_name)
            }
        }
    }
}

impl Drop for SerialStripSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_port(name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()
        .with_context(|| format!("Failed to open serial port {}", name))?;

    port.set_timeout(Duration::from_millis(1000))
        .context("Failed to set serial port timeout")?;

    if let Err(e) = port.write_data_terminal_ready(true) {
        warn!(port = name, error = %e, "Failed to set DTR");
    }

    // Allow device to initialize
    thread::sleep(Duration::from_millis(100));
    Ok(port)
}

struct Worker {
    port: Box<dyn SerialPort>,
    port_name: String,
    stride: usize,
    blank: Vec<u8>,
    frames_sent: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self, receiver: Receiver<Vec<u8>>) {
        while self.running.load(Ordering::Relaxed) {
            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(data) => {
                    let frame = build_adalight_frame(&data, self.stride);
                    trace!(port = %self.port_name, bytes = frame.len(), "Sending render frame");
                    if let Err(e) = self.port.write_all(&frame).and_then(|_| self.port.flush()) {
                        error!(port = %self.port_name, error = %e, "Render output is now disconnected");
                        return;
                    }
                    self.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        // best effort: turn the strips off
        debug!(port = %self.port_name, "Blanking render output");
        let frame = build_adalight_frame(&self.blank, self.stride);
        let _ = self.port.write_all(&frame);
        let _ = self.port.flush();
    }
}
