//! The append/finalize engine.
//!
//! [`Engine`] glues the Fr32 expander to a [`LayerReduce`] implementation
//! and owns the streaming bookkeeping: the cumulative payload counter, the
//! sub-window carry, the reused expansion buffer, and the short-payload
//! latch. `append_bytes` accepts slices of any size; roots depend only on
//! the concatenated byte stream, never on how it was sliced.
//!
//! Lifecycle: a fresh engine consumes bytes via [`Engine::append_bytes`],
//! optionally latches the padded tail via [`Engine::close_payload`], and
//! produces the root via [`Engine::finalize`], which resets it for the next
//! stream. Any error leaves the engine dead; construct a new one.

use std::io::Read;

use crate::error::{Error, Result};
use crate::hash::{leaf_hash, Digest};
use crate::reducer::{LayerReduce, SyncReducer};
use crate::pipeline::{PipelinedReducer, ShutdownHandle};
use crate::{fr32, EXPANDED_WINDOW_SIZE, MAX_PIECE_PAYLOAD, WINDOW_SIZE};

/// Read granularity of [`Engine::process`].
const PROCESS_READ_SIZE: usize = 256 * 1024;

/// Streaming commP engine over a pluggable layer reducer.
pub struct Engine<R: LayerReduce = SyncReducer> {
    reducer: R,
    payload_size: u64,
    short_seen: bool,
    carry: Vec<u8>,
    expansion: [u8; EXPANDED_WINDOW_SIZE],
}

impl Engine<SyncReducer> {
    /// Engine with the in-thread reducer. The default choice.
    #[must_use]
    pub fn new() -> Self {
        Self::over(SyncReducer::new())
    }
}

impl Default for Engine<SyncReducer> {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine<PipelinedReducer> {
    /// Engine with one worker thread per active tree layer.
    #[must_use]
    pub fn pipelined() -> Self {
        Self::over(PipelinedReducer::new())
    }

    /// Cancellation handle for the layer workers.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reducer.shutdown_handle()
    }
}

impl<R: LayerReduce> Engine<R> {
    /// Engine over an explicit reducer.
    #[must_use]
    pub fn over(reducer: R) -> Self {
        Self {
            reducer,
            payload_size: 0,
            short_seen: false,
            carry: Vec::with_capacity(WINDOW_SIZE),
            expansion: [0u8; EXPANDED_WINDOW_SIZE],
        }
    }

    /// Cumulative payload bytes consumed since the last reset.
    #[must_use]
    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    /// Append raw payload bytes.
    ///
    /// Full 127-byte windows are expanded and hashed immediately; a
    /// trailing residue is carried until more data or [`Engine::finalize`]
    /// arrives. Fails once the padded tail has been latched
    /// ([`Error::AppendAfterShortChunk`]) or the cumulative payload crosses
    /// [`MAX_PIECE_PAYLOAD`].
    pub fn append_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.short_seen {
            return Err(Error::AppendAfterShortChunk);
        }
        if data.is_empty() {
            return Ok(());
        }

        let new_size = self
            .payload_size
            .checked_add(data.len() as u64)
            .ok_or_else(Error::payload_exceeds_max)?;
        if new_size > MAX_PIECE_PAYLOAD {
            return Err(Error::payload_exceeds_max());
        }
        self.payload_size = new_size;

        let mut rest = data;

        // Top the carry up to a whole window first.
        if !self.carry.is_empty() {
            let take = rest.len().min(WINDOW_SIZE - self.carry.len());
            let (head, tail) = rest.split_at(take);
            self.carry.extend_from_slice(head);
            rest = tail;
            if self.carry.len() < WINDOW_SIZE {
                return Ok(());
            }
            let window = std::mem::take(&mut self.carry);
            self.ingest_window(&window)?;
            self.carry = window;
            self.carry.clear();
        }

        while rest.len() >= WINDOW_SIZE {
            let (window, tail) = rest.split_at(WINDOW_SIZE);
            self.ingest_window(window)?;
            rest = tail;
        }
        self.carry.extend_from_slice(rest);
        Ok(())
    }

    /// Zero-pad and ingest the carried residue, latching the short-payload
    /// flag. Idempotent; implied by [`Engine::finalize`]. After a residue
    /// has been latched, only `finalize` is legal.
    pub fn close_payload(&mut self) -> Result<()> {
        if self.short_seen || self.carry.is_empty() {
            return Ok(());
        }
        if self.payload_size < WINDOW_SIZE as u64 {
            return Err(Error::InputTooShort);
        }
        let mut window = [0u8; WINDOW_SIZE];
        window[..self.carry.len()].copy_from_slice(&self.carry);
        self.ingest_window(&window)?;
        self.carry.clear();
        self.short_seen = true;
        Ok(())
    }

    /// Produce the 32-byte piece commitment and reset the engine.
    pub fn finalize(&mut self) -> Result<Digest> {
        if self.payload_size < WINDOW_SIZE as u64 {
            return Err(Error::InputTooShort);
        }
        self.close_payload()?;
        let root = self.reducer.finalize_root()?;
        self.payload_size = 0;
        self.short_seen = false;
        self.carry.clear();
        Ok(root)
    }

    /// Streaming convenience: drain `reader` to EOF and finalize.
    pub fn process<T: Read>(&mut self, mut reader: T) -> Result<Digest> {
        let mut buf = vec![0u8; PROCESS_READ_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.append_bytes(&buf[..n])?;
        }
        self.finalize()
    }

    fn ingest_window(&mut self, window: &[u8]) -> Result<()> {
        fr32::expand(window, &mut self.expansion);
        self.reducer.push_leaf(leaf_hash(&self.expansion[..64]))?;
        self.reducer.push_leaf(leaf_hash(&self.expansion[64..]))
    }
}
