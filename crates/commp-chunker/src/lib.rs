//! Chunkers split a buffered region into a stream of contiguous chunks.
//!
//! The contract, for a call `split(bytes, use_entire_region, sink)`:
//!
//! - chunks are emitted in order and cover a prefix of `bytes`;
//! - every emitted size is in `[1, max_chunk_size]`;
//! - when `use_entire_region` is false, an undersized tail is left for the
//!   next region; when true (the stream end is in view), the tail must be
//!   emitted too.
//!
//! A chunker reporting a size that escapes the region is a programming
//! error and aborts ingestion with
//! [`commp_core::Error::InvariantViolation`].
//!
//! Only the fixed-size chunker exists here; it is the one commP needs
//! (stride-sized, stride a multiple of 127). The [`ChunkerChain`] driver
//! still walks an arbitrary chain recursively, handing each chunk of one
//! link to the next for sub-splitting.

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

use commp_core::{Error, Result, MAX_LEAF_PAYLOAD};

/// One emitted chunk. Sizes only; the bytes stay in the region.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Chunk {
    /// Chunk length in bytes.
    pub size: usize,
}

/// The callback a chunker feeds, one call per chunk, in order.
pub type ChunkSink<'s> = dyn FnMut(Chunk) -> Result<()> + 's;

/// A splitter over a single region.
pub trait Chunker {
    /// Largest chunk this instance will emit.
    fn max_chunk_size(&self) -> usize;

    /// Emit chunks covering a prefix of `data` (all of it when
    /// `use_entire_region` is set).
    fn split(&self, data: &[u8], use_entire_region: bool, sink: &mut ChunkSink<'_>)
        -> Result<()>;
}

/// Splits a buffer into equally sized chunks; only the final chunk of the
/// stream may come up short.
#[derive(Clone, Copy, Debug)]
pub struct FixedSizeChunker {
    size: usize,
}

impl FixedSizeChunker {
    /// A chunker emitting `size`-byte chunks.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || size > MAX_LEAF_PAYLOAD {
            return Err(Error::invariant(format!(
                "fixed chunk size {size} outside 1..={MAX_LEAF_PAYLOAD}"
            )));
        }
        Ok(Self { size })
    }

    /// The configured chunk size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Chunker for FixedSizeChunker {
    fn max_chunk_size(&self) -> usize {
        self.size
    }

    fn split(
        &self,
        data: &[u8],
        use_entire_region: bool,
        sink: &mut ChunkSink<'_>,
    ) -> Result<()> {
        let mut offset = 0;
        while data.len() - offset >= self.size {
            sink(Chunk { size: self.size })?;
            offset += self.size;
        }
        if use_entire_region && offset < data.len() {
            sink(Chunk {
                size: data.len() - offset,
            })?;
        }
        Ok(())
    }
}

/// Per-chunk callback of the chain driver: the chunk's bytes and its
/// descriptor.
pub type RegionSink<'s> = dyn FnMut(&[u8], Chunk) -> Result<()> + 's;

/// Drives a chain of chunkers over a region, recursing into sub-chunkers,
/// and reports how many bytes of the region were covered.
pub struct ChunkerChain {
    chain: Vec<Box<dyn Chunker>>,
}

impl ChunkerChain {
    /// A chain over the given links, outermost first.
    #[must_use]
    pub fn new(chain: Vec<Box<dyn Chunker>>) -> Self {
        Self { chain }
    }

    /// Split `data`, invoking `sink` once per final (innermost) chunk.
    ///
    /// Returns the number of bytes handed to the sink; when
    /// `use_entire_region` is false the undersized tail stays unprocessed
    /// and the caller carries it into the next region.
    pub fn split_region(
        &self,
        data: &[u8],
        use_entire_region: bool,
        sink: &mut RegionSink<'_>,
    ) -> Result<usize> {
        if self.chain.is_empty() {
            return Err(Error::invariant("empty chunker chain"));
        }
        self.split_from(0, data, use_entire_region, sink)
    }

    fn split_from(
        &self,
        index: usize,
        data: &[u8],
        use_entire_region: bool,
        sink: &mut RegionSink<'_>,
    ) -> Result<usize> {
        let mut processed = 0usize;
        let max_chunk = self.chain[index].max_chunk_size();

        self.chain[index].split(data, use_entire_region, &mut |chunk: Chunk| {
            if chunk.size == 0 || chunk.size > max_chunk || chunk.size > data.len() - processed
            {
                return Err(Error::invariant(format!(
                    "chunker #{index} returned chunk size {} out of bounds \
                     (max {}, region size {}, position {}, remaining {})",
                    chunk.size,
                    max_chunk,
                    data.len(),
                    processed,
                    data.len() - processed,
                )));
            }
            let bytes = &data[processed..processed + chunk.size];
            if index + 1 < self.chain.len() {
                // Sub-chunkers always consume their entire sub-region.
                self.split_from(index + 1, bytes, true, sink)?;
            } else {
                sink(bytes, chunk)?;
            }
            processed += chunk.size;
            Ok(())
        })?;

        if processed == 0 && index + 1 < self.chain.len() {
            // This link produced nothing; hand the whole frame onward.
            return self.split_from(index + 1, data, use_entire_region, sink);
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(
        chain: &ChunkerChain,
        data: &[u8],
        use_entire_region: bool,
    ) -> (usize, Vec<usize>) {
        let mut sizes = Vec::new();
        let processed = chain
            .split_region(data, use_entire_region, &mut |bytes, chunk| {
                assert_eq!(bytes.len(), chunk.size);
                sizes.push(chunk.size);
                Ok(())
            })
            .unwrap();
        (processed, sizes)
    }

    #[test]
    fn covers_region_in_exact_chunks() {
        let chain =
            ChunkerChain::new(vec![Box::new(FixedSizeChunker::new(254).unwrap())]);
        let data = vec![0u8; 254 * 4];
        let (processed, sizes) = collect(&chain, &data, false);
        assert_eq!(processed, data.len());
        assert_eq!(sizes, vec![254; 4]);
    }

    #[test]
    fn tail_is_left_for_the_next_region_mid_stream() {
        let chain =
            ChunkerChain::new(vec![Box::new(FixedSizeChunker::new(254).unwrap())]);
        let data = vec![0u8; 254 * 4 + 100];
        let (processed, sizes) = collect(&chain, &data, false);
        assert_eq!(processed, 254 * 4);
        assert_eq!(sizes, vec![254; 4]);
    }

    #[test]
    fn tail_is_emitted_at_stream_end() {
        let chain =
            ChunkerChain::new(vec![Box::new(FixedSizeChunker::new(254).unwrap())]);
        let data = vec![0u8; 254 * 4 + 100];
        let (processed, sizes) = collect(&chain, &data, true);
        assert_eq!(processed, data.len());
        assert_eq!(sizes, vec![254, 254, 254, 254, 100]);
    }

    #[test]
    fn chained_links_subsplit_each_chunk() {
        let chain = ChunkerChain::new(vec![
            Box::new(FixedSizeChunker::new(500).unwrap()),
            Box::new(FixedSizeChunker::new(200).unwrap()),
        ]);
        let data = vec![0u8; 1100];
        let (processed, sizes) = collect(&chain, &data, true);
        assert_eq!(processed, 1100);
        // 500 → (200, 200, 100), 500 → (200, 200, 100), tail 100 → (100).
        assert_eq!(sizes, vec![200, 200, 100, 200, 200, 100, 100]);
    }

    struct LyingChunker;

    impl Chunker for LyingChunker {
        fn max_chunk_size(&self) -> usize {
            1024
        }

        fn split(
            &self,
            data: &[u8],
            _use_entire_region: bool,
            sink: &mut ChunkSink<'_>,
        ) -> Result<()> {
            sink(Chunk {
                size: data.len() + 1,
            })
        }
    }

    #[test]
    fn out_of_bounds_chunk_is_an_invariant_violation() {
        let chain = ChunkerChain::new(vec![Box::new(LyingChunker)]);
        let err = chain
            .split_region(&[0u8; 64], true, &mut |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    struct OverruningChunker;

    impl Chunker for OverruningChunker {
        fn max_chunk_size(&self) -> usize {
            10
        }

        fn split(
            &self,
            _data: &[u8],
            _use_entire_region: bool,
            sink: &mut ChunkSink<'_>,
        ) -> Result<()> {
            // Fits the region but overruns the ceiling this chunker itself
            // declared.
            sink(Chunk { size: 32 })
        }
    }

    #[test]
    fn chunk_exceeding_declared_max_is_rejected() {
        let chain = ChunkerChain::new(vec![Box::new(OverruningChunker)]);
        let err = chain
            .split_region(&[0u8; 64], true, &mut |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn rejects_degenerate_sizes() {
        assert!(FixedSizeChunker::new(0).is_err());
        assert!(FixedSizeChunker::new(MAX_LEAF_PAYLOAD + 1).is_err());
    }
}
