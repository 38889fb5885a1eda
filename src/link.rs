//! Byte-stream links between host and driver.
//!
//! A [`Link`] carries frames in one direction and text lines in the other.
//! Reads never block for longer than the caller asks.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info, warn};

use crate::config::LinkConfig;

const READ_CHUNK: usize = 4096;

pub trait Link: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read whatever is available right now; `Ok(0)` means nothing yet.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Wait up to `timeout` for one line, without its terminator.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Discard everything received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Splits received bytes into `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        let text = String::from_utf8_lossy(&line);
        Some(text.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Move raw buffered bytes out, for a caller that wants bytes not lines.
    pub fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Poll `read` into `lines` until a full line shows up or `timeout` passes.
fn poll_line(
    lines: &mut LineBuffer,
    timeout: Duration,
    mut read: impl FnMut(&mut [u8]) -> io::Result<usize>,
) -> io::Result<Option<String>> {
    let deadline = Instant::now() + timeout;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(line) = lines.take_line() {
            return Ok(Some(line));
        }
        let n = read(&mut chunk)?;
        if n > 0 {
            lines.extend(&chunk[..n]);
            continue;
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep((deadline - now).min(Duration::from_millis(2)));
    }
}

/// Serial port link (USB CDC or UART).
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
    lines: LineBuffer,
}

impl SerialLink {
    pub fn open(name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(name, baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
            .with_context(|| format!("Failed to open serial port {}", name))?;
        info!(port = name, baud = baud_rate, "Opened serial link");
        Ok(SerialLink {
            port,
            name: name.to_string(),
            lines: LineBuffer::default(),
        })
    }

    fn read_port(port: &mut Box<dyn SerialPort>, buf: &mut [u8]) -> io::Result<usize> {
        let available = port.bytes_to_read().map_err(io::Error::from)? as usize;
        if available == 0 {
            return Ok(0);
        }
        let n = available.min(buf.len());
        match port.read(&mut buf[..n]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl Link for SerialLink {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.lines.is_empty() {
            return Ok(self.lines.drain_into(buf));
        }
        Self::read_port(&mut self.port, buf)
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let port = &mut self.port;
        poll_line(&mut self.lines, timeout, |buf| Self::read_port(port, buf))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        debug!(port = %self.name, buffered = self.lines.len(), "Clearing serial input");
        self.lines.clear();
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// One non-blocking TCP connection.
pub struct TcpLink {
    stream: TcpStream,
    lines: LineBuffer,
}

impl TcpLink {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream =
            TcpStream::connect(&addr).with_context(|| format!("Failed to connect to {}", addr))?;
        info!(addr = %addr, "Connected tcp link");
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream
            .set_nonblocking(true)
            .context("Failed to set socket to non-blocking mode")?;
        let _ = stream.set_nodelay(true);
        Ok(TcpLink {
            stream,
            lines: LineBuffer::default(),
        })
    }

    fn read_stream(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match stream.read(buf) {
                Ok(0) => return Err(io::Error::new(ErrorKind::UnexpectedEof, "connection closed")),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Link for TcpLink {
    fn write_all(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            match self.stream.write(bytes) {
                Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "connection closed")),
                Ok(n) => bytes = &bytes[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.lines.is_empty() {
            return Ok(self.lines.drain_into(buf));
        }
        Self::read_stream(&mut self.stream, buf)
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let stream = &mut self.stream;
        poll_line(&mut self.lines, timeout, |buf| Self::read_stream(stream, buf))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.lines.clear();
        let mut scratch = [0u8; READ_CHUNK];
        while Self::read_stream(&mut self.stream, &mut scratch)? > 0 {}
        Ok(())
    }
}

/// Driver side of a TCP link: accepts one host at a time and behaves as an
/// idle link while nobody is connected.
pub struct TcpServerLink {
    listener: TcpListener,
    client: Option<TcpLink>,
}

impl TcpServerLink {
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let listener =
            TcpListener::bind(&addr).with_context(|| format!("Failed to bind to {}", addr))?;
        // nonblocking so the driver loop keeps ticking while nobody is connected
        listener.set_nonblocking(true)?;
        info!(addr = %addr, "Driver listening for host");
        Ok(TcpServerLink {
            listener,
            client: None,
        })
    }

    fn client(&mut self) -> Option<&mut TcpLink> {
        if self.client.is_none() {
            match self.listener.accept() {
                Ok((stream, peer)) => match TcpLink::from_stream(stream) {
                    Ok(link) => {
                        info!(peer = %peer, "Host connected");
                        self.client = Some(link);
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "Rejected host connection"),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                Err(e) => warn!(error = %e, "Error accepting connection"),
            }
        }
        self.client.as_mut()
    }

    fn drop_client_on_error<T: Default>(&mut self, result: io::Result<T>) -> io::Result<T> {
        match result {
            Err(e) if is_disconnect(&e) => {
                info!("Host disconnected");
                self.client = None;
                Ok(T::default())
            }
            other => other,
        }
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::WriteZero
    )
}

impl Link for TcpServerLink {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let result = match self.client() {
            Some(client) => client.write_all(bytes),
            None => Ok(()),
        };
        self.drop_client_on_error(result)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = match self.client() {
            Some(client) => client.read_available(buf),
            None => Ok(0),
        };
        self.drop_client_on_error(result)
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let result = match self.client() {
            Some(client) => client.read_line(timeout),
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        };
        self.drop_client_on_error(result)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let result = match self.client.as_mut() {
            Some(client) => client.clear_input(),
            None => Ok(()),
        };
        self.drop_client_on_error(result)
    }
}

/// Open the host's end of the configured link.
pub fn connect(config: &LinkConfig) -> Result<Box<dyn Link>> {
    match config {
        LinkConfig::Serial { port, baud_rate } => Ok(Box::new(SerialLink::open(port, *baud_rate)?)),
        LinkConfig::Tcp { host, port } => Ok(Box::new(TcpLink::connect(host, *port)?)),
    }
}

/// Open the driver's end of the configured link.
pub fn listen(config: &LinkConfig) -> Result<Box<dyn Link>> {
    match config {
        LinkConfig::Serial { port, baud_rate } => Ok(Box::new(SerialLink::open(port, *baud_rate)?)),
        LinkConfig::Tcp { host, port } => Ok(Box::new(TcpServerLink::bind(host, *port)?)),
    }
}
