//! Ingest driver: glue a [`Read`]er to the commP engine.
//!
//! The driver owns the outer streaming loop: it pulls regions from the
//! quantized ring buffer, runs the chunker chain over each region, feeds
//! every chunk to the engine, enforces the short-chunk invariant (a
//! sub-stride chunk is only legal as the last chunk of the stream), and
//! finalizes into an [`IngestOutcome`].
//!
//! Chunk sizes are a multiple of 127 except possibly the stream's last, so
//! the engine's window carry stays empty mid-stream and every region is
//! fully released before the next is requested.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::io::Read;
use std::time::Instant;

use anyhow::{bail, Context};
use serde::Serialize;
use tracing::{debug, info};

use commp_chunker::{ChunkerChain, FixedSizeChunker};
use commp_core::{Digest, Engine, Error, LayerReduce, MAX_LEAF_PAYLOAD, STRIDE, WINDOW_SIZE};
use commp_ringbuf::{Config as RingConfig, QuantizedRingBuffer, RingError};

/// Multibase-free piece-CID prefix: CIDv1, codec 0xF101, multihash 0x1012,
/// digest length 32.
const PIECE_CID_PREFIX: [u8; 7] = [0x01, 0x81, 0xE2, 0x03, 0x92, 0x20, 0x20];

/// Tuning for one ingestion run.
#[derive(Clone, Copy, Debug)]
pub struct IngestConfig {
    /// Top-level chunk size; must be a whole number of 127-byte windows.
    pub stride: usize,
    /// Ring buffer geometry.
    pub ring: RingConfig,
    /// Run the reducer as one worker thread per tree layer.
    pub pipelined: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            stride: STRIDE,
            // MinRegion must be twice the max chunk, otherwise chunking
            // chains cannot make progress across region seams.
            ring: RingConfig {
                min_region: 2 * MAX_LEAF_PAYLOAD,
                max_copy: 2 * MAX_LEAF_PAYLOAD,
                ..RingConfig::default()
            },
            pipelined: false,
        }
    }
}

impl IngestConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.stride < WINDOW_SIZE
            || self.stride > MAX_LEAF_PAYLOAD
            || self.stride % WINDOW_SIZE != 0
        {
            bail!(
                "stride {} must be a multiple of {} within {}..={}",
                self.stride,
                WINDOW_SIZE,
                WINDOW_SIZE,
                MAX_LEAF_PAYLOAD
            );
        }
        if self.ring.min_region < 2 * self.stride {
            bail!(
                "ring min_region {} cannot seat two {}-byte chunks",
                self.ring.min_region,
                self.stride
            );
        }
        Ok(())
    }
}

/// Reader-facing counters for one run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IngestStats {
    /// Total payload bytes committed.
    #[serde(rename = "payload")]
    pub payload_bytes: u64,
    /// Number of 127-byte windows (including the padded tail window).
    pub windows: u64,
    /// `read(2)`-equivalent calls issued by the ring buffer.
    #[serde(rename = "readCalls")]
    pub read_calls: u64,
    /// Bytes pulled from the reader.
    #[serde(rename = "bytesRead")]
    pub bytes_read: u64,
    /// Wall-clock processing time.
    #[serde(rename = "elapsedNanoseconds")]
    pub elapsed_nanoseconds: u128,
}

/// The result of one ingestion run.
#[derive(Clone, Debug)]
pub struct IngestOutcome {
    /// The 32-byte piece commitment.
    pub commp: Digest,
    /// Payload bytes committed.
    pub payload_size: u64,
    /// Size of the padded piece the commitment covers:
    /// `2^(ceil(log2(payload / 127)) + 7)`.
    pub piece_size: u64,
    /// Counters for reporting.
    pub stats: IngestStats,
}

impl IngestOutcome {
    /// The commitment framed as a Filecoin piece CID (raw bytes).
    #[must_use]
    pub fn piece_cid(&self) -> [u8; 39] {
        let mut cid = [0u8; 39];
        cid[..7].copy_from_slice(&PIECE_CID_PREFIX);
        cid[7..].copy_from_slice(&self.commp);
        cid
    }
}

/// Fr32 windows needed for `payload` bytes.
fn window_count(payload: u64) -> u64 {
    payload.div_ceil(WINDOW_SIZE as u64)
}

/// The padded piece size for `payload` bytes; `payload ≥ 127`.
fn piece_size(payload: u64) -> u64 {
    window_count(payload).next_power_of_two() * 128
}

/// Compute the commP of everything `reader` yields.
pub fn process_reader<T: Read>(
    cfg: &IngestConfig,
    reader: T,
) -> anyhow::Result<IngestOutcome> {
    cfg.validate()?;
    if cfg.pipelined {
        run(cfg, reader, Engine::pipelined())
    } else {
        run(cfg, reader, Engine::new())
    }
}

fn run<T: Read, R: LayerReduce>(
    cfg: &IngestConfig,
    reader: T,
    mut engine: Engine<R>,
) -> anyhow::Result<IngestOutcome> {
    let t0 = Instant::now();

    let mut qrb = QuantizedRingBuffer::new(reader, cfg.ring)
        .context("constructing ring buffer")?;
    qrb.start_fill(0).context("starting ring buffer fill")?;

    let chunker =
        FixedSizeChunker::new(cfg.stride).context("constructing stride chunker")?;
    let chain = ChunkerChain::new(vec![Box::new(chunker)]);

    let mut stream_offset = 0u64;
    let mut windows = 0u64;
    let mut short_chunk_seen = false;
    let mut consumed = 0usize;

    loop {
        let buffered = qrb.buffered();
        let region = match qrb.next_region(consumed) {
            Ok(Some(region)) => region,
            Ok(None) => break,
            Err(RingError::Reader(e)) => {
                return Err(Error::Reader(e))
                    .with_context(|| failure_context(stream_offset, buffered))
            }
            Err(e) => return Err(e).context("ring buffer failure"),
        };

        let end_in_view = region.stream_end_in_view();
        let data = region.bytes();
        debug!(
            size = data.len(),
            end_in_view, stream_offset, "processing region"
        );

        let reservation = region.reserve();
        let stride = cfg.stride;
        let processed = chain
            .split_region(data, end_in_view, &mut |bytes, chunk| {
                if short_chunk_seen {
                    return Err(Error::AppendAfterShortChunk);
                }
                engine.append_bytes(bytes)?;
                windows += window_count(chunk.size as u64);
                if chunk.size < stride {
                    // Tolerated only as the stream's final chunk; latch the
                    // engine so any stray successor is rejected too.
                    engine.close_payload()?;
                    short_chunk_seen = true;
                }
                Ok(())
            })
            .with_context(|| failure_context(stream_offset, data.len()))?;
        reservation.release();

        consumed = processed;
        stream_offset += processed as u64;
    }

    let payload_size = engine.payload_size();
    let commp = engine
        .finalize()
        .with_context(|| failure_context(stream_offset, qrb.buffered()))?;

    let stats = IngestStats {
        payload_bytes: payload_size,
        windows,
        read_calls: qrb.stats().read_calls,
        bytes_read: qrb.stats().bytes_read,
        elapsed_nanoseconds: t0.elapsed().as_nanos(),
    };
    let outcome = IngestOutcome {
        commp,
        payload_size,
        piece_size: piece_size(payload_size),
        stats,
    };
    info!(
        payload = outcome.payload_size,
        piece = outcome.piece_size,
        windows = outcome.stats.windows,
        "piece commitment computed"
    );
    Ok(outcome)
}

fn failure_context(stream_offset: u64, buffered: usize) -> String {
    format!(
        "failure at byte offset {stream_offset} with {buffered} bytes buffered/unprocessed"
    )
}
