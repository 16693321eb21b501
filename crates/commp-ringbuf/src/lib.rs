//! Sector-quantized ring buffer for streaming ingestion.
//!
//! ## Overview
//! A [`QuantizedRingBuffer`] wraps a [`Read`]er and a single backing
//! allocation, and hands out contiguous [`Region`]s of the stream without
//! copying payload around (aside from an occasional bounded tail
//! relocation). The consumer promises, via the `consumed` argument of
//! [`QuantizedRingBuffer::next_region`], how much of the previous region it
//! is done with; the unconsumed tail stays addressable at the front of the
//! next region.
//!
//! Two mechanisms keep region bytes stable:
//! - a region borrows the buffer, so the borrow checker rules out any
//!   refill while the region is alive, and
//! - a [`Reservation`] pins the region's *sectors* past the next
//!   `next_region` call; the writer refuses to overwrite pinned sectors
//!   until every reservation on them is released.
//!
//! Guarantees: at most one fill is active; regions are at least
//! `min_region` bytes except at end of stream; the region that contains
//! the end of the stream reports [`Region::stream_end_in_view`]; a reader
//! error is propagated verbatim exactly once, after which the buffer is
//! terminal.
//!
//! Memory use is `O(buffer_size)` regardless of stream length.

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

use serde::Serialize;
use std::cell::RefCell;
use std::io::Read;
use std::ops::Range;
use std::rc::Rc;
use thiserror::Error;

/// Failures of the buffer itself (reader failures pass through).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RingError {
    /// The wrapped reader failed. Surfaced verbatim, exactly once.
    #[error(transparent)]
    Reader(#[from] std::io::Error),

    /// The buffer already surfaced a reader error and is terminal.
    #[error("ring buffer is terminal after an earlier reader error")]
    Terminated,

    /// Outstanding reservations pin the sectors the writer needs.
    #[error("reserved sectors pin the ring buffer; release reservations before refilling")]
    Pinned,

    /// Invalid construction parameters.
    #[error("invalid ring buffer configuration: {0}")]
    Config(String),

    /// API misuse by the caller.
    #[error("ring buffer misuse: {0}")]
    Misuse(String),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RingError>;

/// Buffer geometry and refill thresholds.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Total backing allocation.
    pub buffer_size: usize,
    /// Reservation granularity.
    pub sector_size: usize,
    /// Minimum region handed to the consumer, except at end of stream.
    pub min_region: usize,
    /// Free space below which the tail is relocated before reading on.
    pub min_read: usize,
    /// Upper bound on how many live bytes a relocation may move.
    pub max_copy: usize,
}

impl Config {
    fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(RingError::Config(msg.to_owned()));
        if self.sector_size == 0 || self.min_region == 0 || self.min_read == 0 {
            return fail("sector_size, min_region and min_read must be nonzero");
        }
        if self.buffer_size % self.sector_size != 0 {
            return fail("buffer_size must be a whole number of sectors");
        }
        if self.max_copy < self.min_region {
            return fail("max_copy must cover at least one min_region");
        }
        if self.buffer_size < self.max_copy + self.min_read
            || self.buffer_size < 2 * self.min_region
        {
            return fail("buffer_size too small for the requested region geometry");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: 24 * 1024 * 1024,
            sector_size: 64 * 1024,
            min_region: 4 * 1024 * 1024,
            min_read: 256 * 1024,
            max_copy: 4 * 1024 * 1024,
        }
    }
}

/// Counters the buffer keeps about its reader interactions.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Stats {
    /// Number of `read(2)`-equivalent calls issued.
    #[serde(rename = "readCalls")]
    pub read_calls: u64,
    /// Total bytes obtained from the reader.
    #[serde(rename = "bytesRead")]
    pub bytes_read: u64,
}

type Ledger = Rc<RefCell<Vec<u32>>>;

/// The ring buffer proper.
pub struct QuantizedRingBuffer<T: Read> {
    reader: T,
    buf: Box<[u8]>,
    cfg: Config,
    ledger: Ledger,
    head: usize,
    tail: usize,
    /// Bytes the current fill may still take from the reader.
    remaining: Option<u64>,
    started: bool,
    eof: bool,
    dead: bool,
    stats: Stats,
}

impl<T: Read> QuantizedRingBuffer<T> {
    /// Wrap `reader` in a buffer with the given geometry.
    pub fn new(reader: T, cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let n_sectors = cfg.buffer_size / cfg.sector_size;
        Ok(Self {
            reader,
            buf: vec![0u8; cfg.buffer_size].into_boxed_slice(),
            cfg,
            ledger: Rc::new(RefCell::new(vec![0u32; n_sectors])),
            head: 0,
            tail: 0,
            remaining: None,
            started: false,
            eof: false,
            dead: false,
            stats: Stats::default(),
        })
    }

    /// Begin a fill of up to `limit` bytes (`0` = until reader EOF).
    ///
    /// Only one fill may be active; a new one may start once the previous
    /// stream has been fully consumed.
    pub fn start_fill(&mut self, limit: u64) -> Result<()> {
        if self.dead {
            return Err(RingError::Terminated);
        }
        if self.started && !(self.at_end() && self.head == self.tail) {
            return Err(RingError::Misuse(
                "start_fill while a previous fill is still active".to_owned(),
            ));
        }
        self.remaining = (limit > 0).then_some(limit);
        self.started = true;
        Ok(())
    }

    /// Retire `consumed` bytes of the previous region and return the next
    /// contiguous view of the stream, or `None` once it is exhausted.
    pub fn next_region(&mut self, consumed: usize) -> Result<Option<Region<'_>>> {
        if self.dead {
            return Err(RingError::Terminated);
        }
        if !self.started {
            return Err(RingError::Misuse(
                "next_region before start_fill".to_owned(),
            ));
        }
        if consumed > self.tail - self.head {
            return Err(RingError::Misuse(format!(
                "consumed {} bytes of a {}-byte region",
                consumed,
                self.tail - self.head
            )));
        }
        self.head += consumed;

        self.refill()?;

        if self.head == self.tail {
            return Ok(None);
        }

        let sectors = self.head / self.cfg.sector_size
            ..(self.tail - 1) / self.cfg.sector_size + 1;
        Ok(Some(Region {
            bytes: &self.buf[self.head..self.tail],
            sectors,
            ledger: Rc::clone(&self.ledger),
            stream_end_in_view: self.at_end(),
        }))
    }

    /// Bytes currently buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.tail - self.head
    }

    /// Reader interaction counters so far.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn at_end(&self) -> bool {
        self.eof || self.remaining == Some(0)
    }

    fn refill(&mut self) -> Result<()> {
        if self.at_end() || self.tail - self.head >= self.cfg.min_region {
            return Ok(());
        }

        // Relocate the live tail to the front when the write headroom runs
        // out. Pinned sectors in the destination forbid it.
        if self.buf.len() - self.tail < self.cfg.min_read && self.head > 0 {
            let live = self.tail - self.head;
            if live > self.cfg.max_copy {
                return Err(RingError::Pinned);
            }
            if live > 0 {
                let dest_sectors = 0..(live - 1) / self.cfg.sector_size + 1;
                self.ensure_unpinned(dest_sectors)?;
                self.buf.copy_within(self.head..self.tail, 0);
            }
            self.head = 0;
            self.tail = live;
        }

        while self.tail - self.head < self.cfg.min_region
            && !self.at_end()
            && self.tail < self.buf.len()
        {
            let mut want = self.buf.len() - self.tail;
            if let Some(rem) = self.remaining {
                want = want.min(usize::try_from(rem).unwrap_or(usize::MAX));
            }
            want = self.cap_to_unpinned(self.tail, want);
            if want == 0 {
                return Err(RingError::Pinned);
            }

            let n = match self.reader.read(&mut self.buf[self.tail..self.tail + want]) {
                Ok(n) => n,
                Err(e) => {
                    self.dead = true;
                    return Err(RingError::Reader(e));
                }
            };
            self.stats.read_calls += 1;
            self.stats.bytes_read += n as u64;
            if n == 0 {
                self.eof = true;
                break;
            }
            self.tail += n;
            if let Some(rem) = self.remaining.as_mut() {
                *rem -= n as u64;
            }
        }
        Ok(())
    }

    fn ensure_unpinned(&self, sectors: Range<usize>) -> Result<()> {
        let ledger = self.ledger.borrow();
        if sectors.clone().any(|s| ledger[s] > 0) {
            return Err(RingError::Pinned);
        }
        Ok(())
    }

    /// Cap an intended write at `offset` so it stops short of the first
    /// pinned sector.
    fn cap_to_unpinned(&self, offset: usize, want: usize) -> usize {
        let ledger = self.ledger.borrow();
        let first_sector = offset / self.cfg.sector_size;
        let last_sector = (offset + want - 1) / self.cfg.sector_size;
        for s in first_sector..=last_sector {
            if ledger[s] > 0 {
                return (s * self.cfg.sector_size).saturating_sub(offset);
            }
        }
        want
    }
}

/// A contiguous, stable view of buffered stream bytes.
pub struct Region<'a> {
    bytes: &'a [u8],
    sectors: Range<usize>,
    ledger: Ledger,
    stream_end_in_view: bool,
}

impl<'a> Region<'a> {
    /// The buffered bytes.
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Region length in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the end of the stream falls inside this region.
    #[must_use]
    pub fn stream_end_in_view(&self) -> bool {
        self.stream_end_in_view
    }

    /// Pin this region's sectors past the next `next_region` call.
    ///
    /// The writer will not reuse the pinned sectors until the returned
    /// [`Reservation`] is released.
    #[must_use]
    pub fn reserve(&self) -> Reservation {
        {
            let mut ledger = self.ledger.borrow_mut();
            for s in self.sectors.clone() {
                ledger[s] += 1;
            }
        }
        Reservation {
            sectors: self.sectors.clone(),
            ledger: Rc::clone(&self.ledger),
        }
    }
}

/// A sector pin taken out by [`Region::reserve`]. Dropping releases it.
pub struct Reservation {
    sectors: Range<usize>,
    ledger: Ledger,
}

impl Reservation {
    /// Release explicitly (equivalent to dropping).
    pub fn release(self) {}
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut ledger = self.ledger.borrow_mut();
        for s in self.sectors.clone() {
            ledger[s] -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    fn small_cfg() -> Config {
        Config {
            buffer_size: 64 * 16,
            sector_size: 64,
            min_region: 128,
            min_read: 64,
            max_copy: 128,
        }
    }

    fn drain(data: &[u8], cfg: Config, consume_per_round: usize) -> Vec<u8> {
        let mut qrb = QuantizedRingBuffer::new(Cursor::new(data.to_vec()), cfg)
            .expect("config");
        qrb.start_fill(0).expect("start");
        let mut out = Vec::new();
        let mut consumed = 0;
        loop {
            let Some(region) = qrb.next_region(consumed).expect("region") else {
                break;
            };
            let take = if region.stream_end_in_view() {
                region.size()
            } else {
                consume_per_round.min(region.size())
            };
            out.extend_from_slice(&region.bytes()[..take]);
            consumed = take;
        }
        out
    }

    #[test]
    fn stream_is_reassembled_exactly() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        for step in [97usize, 128, 1000] {
            assert_eq!(drain(&data, small_cfg(), step), data, "step {step}");
        }
    }

    #[test]
    fn regions_meet_min_region_until_the_end() {
        let data = vec![7u8; 10_000];
        let cfg = small_cfg();
        let mut qrb =
            QuantizedRingBuffer::new(Cursor::new(data), cfg).expect("config");
        qrb.start_fill(0).expect("start");
        let mut consumed = 0;
        loop {
            let Some(region) = qrb.next_region(consumed).expect("region") else {
                break;
            };
            if !region.stream_end_in_view() {
                assert!(region.size() >= cfg.min_region);
            }
            consumed = region.size().min(130);
        }
    }

    #[test]
    fn fill_limit_caps_the_stream_and_marks_its_end() {
        let data = vec![1u8; 5_000];
        let mut qrb =
            QuantizedRingBuffer::new(Cursor::new(data), small_cfg()).expect("config");
        qrb.start_fill(300).expect("start");

        let mut seen = 0usize;
        let mut consumed = 0;
        loop {
            let Some(region) = qrb.next_region(consumed).expect("region") else {
                break;
            };
            assert!(region.stream_end_in_view(), "300 < min_region: end in view");
            seen += region.size();
            consumed = region.size();
        }
        assert_eq!(seen, 300);
    }

    #[test]
    fn start_fill_twice_while_active_is_rejected() {
        let mut qrb = QuantizedRingBuffer::new(Cursor::new(vec![0u8; 1000]), small_cfg())
            .expect("config");
        qrb.start_fill(0).expect("start");
        let _ = qrb.next_region(0).expect("region");
        assert!(matches!(
            qrb.start_fill(0),
            Err(RingError::Misuse(_))
        ));
    }

    #[test]
    fn reservations_block_sector_reuse() {
        let data: Vec<u8> = (0..8_000u32).map(|i| (i % 251) as u8).collect();
        let mut qrb = QuantizedRingBuffer::new(Cursor::new(data), small_cfg())
            .expect("config");
        qrb.start_fill(0).expect("start");

        let first_copy;
        let reservation;
        {
            let region = qrb
                .next_region(0)
                .expect("region")
                .expect("non-empty stream");
            first_copy = region.bytes().to_vec();
            reservation = region.reserve();
        }

        // Walking the rest of the stream now runs out of writable sectors
        // instead of clobbering the pinned ones.
        let mut consumed = qrb.buffered();
        let mut pinned_hit = false;
        loop {
            match qrb.next_region(consumed) {
                Ok(Some(region)) => consumed = region.size(),
                Ok(None) => break,
                Err(RingError::Pinned) => {
                    pinned_hit = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(pinned_hit, "expected the pinned sectors to stall the fill");

        reservation.release();
        assert!(!first_copy.is_empty());
    }

    struct FailingReader {
        good: Vec<u8>,
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe burst"));
            }
            self.served = true;
            let n = self.good.len().min(buf.len());
            buf[..n].copy_from_slice(&self.good[..n]);
            Ok(n)
        }
    }

    #[test]
    fn reader_errors_surface_once_then_terminal() {
        let reader = FailingReader {
            good: vec![9u8; 100],
            served: false,
        };
        let mut qrb = QuantizedRingBuffer::new(reader, small_cfg()).expect("config");
        qrb.start_fill(0).expect("start");

        let first = qrb.next_region(0);
        assert!(
            matches!(first, Err(RingError::Reader(ref e)) if e.kind() == io::ErrorKind::BrokenPipe),
            "reader error must surface verbatim"
        );
        assert!(matches!(qrb.next_region(0), Err(RingError::Terminated)));
    }
}
