//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::link::Link;
use crate::output::RenderSink;
use crate::pixel_buffer::Geometry;

/// Render sink that keeps a copy of every frame it is handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<Vec<u32>>>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<Vec<u32>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl RenderSink for RecordingSink {
    fn render(&mut self, pixels: &[u32], _geometry: Geometry) -> Result<()> {
        self.frames.lock().unwrap().push(pixels.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    line_polls: usize,
}

/// Link backed by in-memory queues. Clones share the same queues, so a test
/// can keep a handle while the code under test owns the link.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state.lock().unwrap().inbound.extend(bytes);
    }

    pub fn inbound_len(&self) -> usize {
        self.state.lock().unwrap().inbound.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.state.lock().unwrap().outbound.len()
    }

    /// Everything written so far, draining it.
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().unwrap().outbound)
    }

    /// Written text, split into lines.
    pub fn outbound_lines(&self) -> Vec<String> {
        let bytes = self.take_outbound();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(|l| l.trim_end().to_string())
            .collect()
    }

    pub fn line_polls(&self) -> usize {
        self.state.lock().unwrap().line_polls
    }
}

impl Link for MockLink {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.state.lock().unwrap().outbound.extend_from_slice(bytes);
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.line_polls += 1;
        let Some(end) = state.inbound.iter().position(|&b| b == b'\n') else {
            // a real link waits out the timeout before reporting silence
            drop(state);
            thread::sleep(timeout);
            return Ok(None);
        };
        let line: Vec<u8> = state.inbound.drain(..=end).collect();
        Ok(Some(
            String::from_utf8_lossy(&line)
                .trim_end_matches(['\r', '\n'])
                .to_string(),
        ))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().inbound.clear();
        Ok(())
    }
}
