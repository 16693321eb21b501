//! Error kinds surfaced by the engine.
//!
//! None of these are recoverable: any error terminates the engine and the
//! caller must construct a fresh one. Partial digests are never exposed.

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while computing a piece commitment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Fewer than one full Fr32 window of payload arrived before the end of
    /// the stream.
    #[error("minimum input of 127 bytes required for commP calculation")]
    InputTooShort,

    /// The cumulative payload no longer fits a proving tree of 31 layers.
    #[error("maximum proving tree payload size of {max} bytes exceeded")]
    PayloadExceedsMax {
        /// The fixed payload ceiling that was crossed.
        max: u64,
    },

    /// Data arrived after a short (thus supposedly final) chunk was padded.
    #[error("additional data appended after a short (thus supposedly final) chunk")]
    AppendAfterShortChunk,

    /// The upstream reader failed. Bytes already consumed are gone.
    #[error("reader failed")]
    Reader(#[from] std::io::Error),

    /// The shutdown signal fired; all layer workers were torn down.
    #[error("processing aborted by shutdown signal")]
    Shutdown,

    /// A chunker or reducer broke an internal invariant. Always a bug.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Shorthand for an [`Error::InvariantViolation`].
    #[must_use]
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// The payload-cap error with the engine's fixed ceiling filled in.
    #[must_use]
    pub const fn payload_exceeds_max() -> Self {
        Self::PayloadExceedsMax {
            max: crate::MAX_PIECE_PAYLOAD,
        }
    }
}
