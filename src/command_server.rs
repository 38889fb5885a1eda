//! Command sources for the host: newline-delimited JSON over TCP, and
//! optionally lines typed on stdin. Every source funnels into one [`Host`].

use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::ListenConfig;
use crate::host::{describe, Host};
use crate::link::LineBuffer;

const RECV_BUFFER_SIZE: usize = 4096;

pub struct CommandServer {
    listener: TcpListener,
    host: Arc<Host>,
    running: Arc<AtomicBool>,
}

impl CommandServer {
    pub fn bind(config: &ListenConfig, host: Arc<Host>, running: Arc<AtomicBool>) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener =
            TcpListener::bind(&addr).with_context(|| format!("Failed to bind to {}", addr))?;
        // nonblocking so accept() can check the running flag periodically
        listener.set_nonblocking(true)?;
        info!(addr = %addr, "Command server listening");
        Ok(CommandServer {
            listener,
            host,
            running,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until the running flag clears. Each client gets its own
    /// thread; the host serialises their sends.
    pub fn run(&self) -> Result<()> {
        while self.running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "Client connected");
                    let host = Arc::clone(&self.host);
                    let running = Arc::clone(&self.running);
                    thread::Builder::new()
                        .name(format!("client-{peer}"))
                        .spawn(move || {
                            if let Err(e) = handle_client(stream, &host, &running) {
                                warn!(peer = %peer, error = %e, "Error handling client");
                            }
                            info!(peer = %peer, "Client disconnected");
                        })
                        .context("Failed to spawn client thread")?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    warn!(error = %e, "Error accepting connection");
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
        Ok(())
    }
}

/// Serve one client: every complete line is a request, answered with one
/// line describing the driver's verdict.
fn handle_client(mut stream: TcpStream, host: &Host, running: &AtomicBool) -> Result<()> {
    stream
        .set_nonblocking(true)
        .context("Failed to set socket to non-blocking mode")?;

    let mut lines = LineBuffer::default();
    let mut read_buf = [0u8; RECV_BUFFER_SIZE];

    while running.load(Ordering::Relaxed) {
        loop {
            match stream.read(&mut read_buf) {
                Ok(0) => return Ok(()),
                Ok(n) => lines.extend(&read_buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        while let Some(line) = lines.take_line() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let reply = describe(&host.handle_line(line));
            debug!(request = %line, reply = %reply, "Handled request");
            write_reply(&mut stream, &reply)?;
        }

        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

fn write_reply(stream: &mut TcpStream, reply: &str) -> io::Result<()> {
    let bytes = format!("{reply}\n");
    let mut rest = bytes.as_bytes();
    while !rest.is_empty() {
        match stream.write(rest) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => rest = &rest[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(1)),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Read requests from stdin on a background thread, printing each verdict.
pub fn spawn_stdin(host: Arc<Host>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                println!("{}", describe(&host.handle_line(line)));
            }
            debug!("stdin closed");
        })
        .context("Failed to spawn stdin thread")
}
