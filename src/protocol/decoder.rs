use tracing::trace;

use super::{ProtocolError, MARKER, MAX_NAME, MAX_PAYLOAD, STAGING_SIZE};
use crate::command::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SeekMarker,
    Name,
    Length,
    Payload,
    Crc,
}

/// Resumable frame decoder.
///
/// Bytes are staged with [`feed`](FrameDecoder::feed) and consumed by
/// [`poll`](FrameDecoder::poll), which never waits for more input: a frame
/// split across any number of feeds decodes the same as one delivered whole.
///
/// Every byte is matched against the marker whatever the current phase, so a
/// marker appearing inside a payload abandons the frame in progress and starts
/// a new one.
#[derive(Debug)]
pub struct FrameDecoder {
    staging: Vec<u8>,
    read: usize,
    write: usize,
    phase: Phase,
    marker_matched: usize,
    name: Vec<u8>,
    length: u32,
    length_bytes: usize,
    // grows to the largest payload seen and is then reused
    payload: Vec<u8>,
    crc: u32,
    crc_bytes: usize,
    headers: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            staging: vec![0; STAGING_SIZE],
            read: 0,
            write: 0,
            phase: Phase::SeekMarker,
            marker_matched: 0,
            name: Vec::with_capacity(MAX_NAME),
            length: 0,
            length_bytes: 0,
            payload: Vec::new(),
            crc: 0,
            crc_bytes: 0,
            headers: 0,
        }
    }

    /// Number of markers seen since construction.
    pub fn headers(&self) -> u64 {
        self.headers
    }

    /// Room left in the staging buffer once consumed bytes are discarded.
    pub fn free_capacity(&self) -> usize {
        STAGING_SIZE - (self.write - self.read)
    }

    /// Capacity currently held by the payload buffer.
    pub fn payload_capacity(&self) -> usize {
        self.payload.capacity()
    }

    /// Stage incoming bytes. Returns how many were accepted; the caller keeps
    /// the rest for a later call.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        if self.read > 0 {
            self.staging.copy_within(self.read..self.write, 0);
            self.write -= self.read;
            self.read = 0;
        }
        let n = bytes.len().min(STAGING_SIZE - self.write);
        self.staging[self.write..self.write + n].copy_from_slice(&bytes[..n]);
        self.write += n;
        n
    }

    /// Drop every staged byte and any frame in progress.
    pub fn reset_input(&mut self) {
        self.read = 0;
        self.write = 0;
        self.marker_matched = 0;
        self.phase = Phase::SeekMarker;
    }

    /// Hand back the staged bytes not yet consumed and reset, for a caller
    /// switching the link to raw mode mid-stream.
    pub fn take_staged(&mut self) -> Vec<u8> {
        let rest = self.staging[self.read..self.write].to_vec();
        self.reset_input();
        rest
    }

    /// Consume staged bytes until a frame completes or fails.
    ///
    /// Returns `None` when the staged input runs out first. After an error the
    /// decoder is back to seeking a marker.
    pub fn poll(&mut self) -> Option<Result<Command, ProtocolError>> {
        while self.read < self.write {
            let byte = self.staging[self.read];
            self.read += 1;

            if self.match_marker(byte) {
                self.headers += 1;
                self.name.clear();
                self.phase = Phase::Name;
                continue;
            }

            match self.phase {
                Phase::SeekMarker => {}
                Phase::Name => {
                    if byte == 0 {
                        self.length = 0;
                        self.length_bytes = 0;
                        self.phase = Phase::Length;
                    } else if self.name.len() == MAX_NAME {
                        self.phase = Phase::SeekMarker;
                        return Some(Err(ProtocolError::NameTooLong));
                    } else {
                        self.name.push(byte);
                    }
                }
                Phase::Length => {
                    self.length |= (byte as u32) << (8 * self.length_bytes);
                    self.length_bytes += 1;
                    if self.length_bytes == 4 {
                        if let Err(e) = self.begin_payload() {
                            self.phase = Phase::SeekMarker;
                            return Some(Err(e));
                        }
                    }
                }
                Phase::Payload => {
                    self.payload.push(byte);
                    if self.payload.len() == self.length as usize {
                        self.phase = Phase::Crc;
                    }
                }
                Phase::Crc => {
                    self.crc |= (byte as u32) << (8 * self.crc_bytes);
                    self.crc_bytes += 1;
                    if self.crc_bytes == 4 {
                        self.phase = Phase::SeekMarker;
                        return Some(self.finish_frame());
                    }
                }
            }
        }
        None
    }

    fn begin_payload(&mut self) -> Result<(), ProtocolError> {
        if self.length >= MAX_PAYLOAD {
            return Err(ProtocolError::Oversize(self.length));
        }
        let length = self.length as usize;
        self.payload.clear();
        self.payload
            .try_reserve(length)
            .map_err(|_| ProtocolError::OutOfMemory(length))?;
        self.crc = 0;
        self.crc_bytes = 0;
        self.phase = if length == 0 {
            Phase::Crc
        } else {
            Phase::Payload
        };
        Ok(())
    }

    fn finish_frame(&mut self) -> Result<Command, ProtocolError> {
        let name = String::from_utf8_lossy(&self.name).into_owned();
        let computed = crc32fast::hash(&self.payload);
        trace!(name = %name, length = self.payload.len(), crc = computed, "Frame received");
        if computed != self.crc {
            return Err(ProtocolError::BadCrc {
                name,
                received: self.crc,
                computed,
            });
        }
        Command::parse(&name, &self.payload)
    }

    /// Advance the marker match by one byte; true when the marker completes.
    fn match_marker(&mut self, byte: u8) -> bool {
        let mut k = self.marker_matched;
        loop {
            if MARKER[k] == byte {
                k += 1;
                break;
            }
            if k == 0 {
                break;
            }
            k = marker_fallback(k);
        }
        if k == MARKER.len() {
            self.marker_matched = 0;
            true
        } else {
            self.marker_matched = k;
            false
        }
    }
}

/// Longest proper prefix of `MARKER[..k]` that is also its suffix.
fn marker_fallback(k: usize) -> usize {
    (1..k)
        .rev()
        .find(|&j| MARKER[..j] == MARKER[k - j..k])
        .unwrap_or(0)
}
