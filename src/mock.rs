//! In-memory [`Transport`] for exercising channels without hardware.
//!
//! A `MockTransport` records every request it receives and answers reads
//! from a scripted queue. Clones share state, so a test can keep one handle
//! for inspection while a channel owns the other.

use crate::error::{Error, Result};
use crate::transport::{BitMode, ChipType, Interface, LineConfig, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Everything a [`MockTransport`] has seen, plus its scripted answers.
#[derive(Debug, Default)]
pub struct MockState {
    /// Payload of each `write_data` call, in order.
    pub writes: Vec<Vec<u8>>,
    /// Chunks handed out by `read_data`; an empty queue reads as a timeout.
    pub reads: VecDeque<Vec<u8>>,
    /// Read scripts installed one per `purge_buffers` call, after the purge
    /// drops whatever was still queued.
    pub reads_after_purge: VecDeque<VecDeque<Vec<u8>>>,
    /// Value returned by `read_pins`.
    pub pins: u8,
    pub latency: u8,
    /// Latency reported by `latency_timer`, when it should differ from the
    /// programmed one.
    pub latency_override: Option<u8>,
    pub bitmodes: Vec<(u8, BitMode)>,
    pub baudrate: Option<u32>,
    pub line: Option<LineConfig>,
    pub baudrate_calls: usize,
    pub line_calls: usize,
    pub purges: usize,
    pub tx_purges: usize,
    /// Caps the bytes accepted per `write_data` call.
    pub accept_limit: Option<usize>,
    /// Makes every subsequent `write_data` call fail.
    pub fail_writes: bool,
    /// Makes every subsequent `read_data` call fail.
    pub fail_reads: bool,
    pub closed: bool,
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    chip: ChipType,
    interface: Interface,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(chip: ChipType, interface: Interface) -> Self {
        MockTransport {
            chip,
            interface,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Direct access to the recorded state.
    pub fn state(&self) -> parking_lot::MutexGuard<'_, MockState> {
        self.state.lock()
    }

    /// Queues one chunk for a future `read_data` call.
    pub fn push_read(&self, data: &[u8]) {
        self.state.lock().reads.push_back(data.to_vec());
    }

    /// Queues chunks that only become readable after the next unclaimed
    /// `purge_buffers` call.
    pub fn push_reads_after_purge(&self, chunks: &[&[u8]]) {
        let batch = chunks.iter().map(|c| c.to_vec()).collect();
        self.state.lock().reads_after_purge.push_back(batch);
    }

    /// All bytes written so far, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().writes.concat()
    }

    /// Forgets recorded writes and requests, keeping scripted reads.
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.writes.clear();
        state.bitmodes.clear();
        state.purges = 0;
        state.tx_purges = 0;
        state.baudrate_calls = 0;
        state.line_calls = 0;
    }

    fn check_open(state: &MockState) -> Result<()> {
        if state.closed {
            Err(Error::NotOpen)
        } else {
            Ok(())
        }
    }
}

fn simulated_failure(what: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("simulated {} failure", what),
    ))
}

impl Transport for MockTransport {
    fn chip(&self) -> ChipType {
        self.chip
    }

    fn interface(&self) -> Interface {
        self.interface
    }

    fn write_data(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        if state.fail_writes {
            return Err(simulated_failure("write"));
        }
        let accepted = state.accept_limit.map_or(data.len(), |l| l.min(data.len()));
        state.writes.push(data[..accepted].to_vec());
        Ok(accepted)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        if state.fail_reads {
            return Err(simulated_failure("read"));
        }
        let Some(mut chunk) = state.reads.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            state.reads.push_front(chunk);
        }
        Ok(n)
    }

    fn set_bitmode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state.bitmodes.push((mask, mode));
        Ok(())
    }

    fn read_pins(&mut self) -> Result<u8> {
        let state = self.state.lock();
        Self::check_open(&state)?;
        Ok(state.pins)
    }

    fn set_latency_timer(&mut self, ms: u8) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state.latency = ms;
        Ok(())
    }

    fn latency_timer(&mut self) -> Result<u8> {
        let state = self.state.lock();
        Self::check_open(&state)?;
        Ok(state.latency_override.unwrap_or(state.latency))
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state.baudrate = Some(baudrate);
        state.baudrate_calls += 1;
        Ok(())
    }

    fn set_line_property(&mut self, line: &LineConfig) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state.line = Some(*line);
        state.line_calls += 1;
        Ok(())
    }

    fn purge_buffers(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state.purges += 1;
        let next = state.reads_after_purge.pop_front().unwrap_or_default();
        state.reads = next;
        Ok(())
    }

    fn purge_tx_buffer(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        state.tx_purges += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
