//! commp-core — streaming piece-commitment (commP) engine.
//!
//! This crate computes the 32-byte Filecoin piece commitment of a byte
//! stream: the root of a binary SHA-256 Merkle tree over the Fr32-expanded
//! form of the input, zero-padded up to the next power-of-two leaf count.
//! It is the **stable boundary** the rest of the workspace builds on:
//!
//! - the Fr32 bit-expansion of 127-byte payload windows ([`fr32`]),
//! - the 254-bit SHA-256 leaf/node hash ([`hash`]),
//! - the canonical zero-subtree digest table ([`zerocomm`]),
//! - the layered Merkle reducer, in a synchronous ([`reducer`]) and a
//!   pipelined, one-worker-per-layer ([`pipeline`]) flavor, and
//! - the [`Engine`] append/finalize API consumed by e.g. a CAR validator.
//!
//! ```no_run
//! use commp_core::Engine;
//!
//! let mut engine = Engine::new();
//! engine.append_bytes(&[0u8; 127])?;
//! let root = engine.finalize()?;
//! assert_eq!(root[31] & 0xC0, 0);
//! # Ok::<(), commp_core::Error>(())
//! ```
//!
//! Memory use is constant: one 127-byte carry, one 128-byte expansion
//! buffer, and up to 31 pending digests — independent of stream length.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
// Small, explicit allowlist to keep docs readable and APIs ergonomic.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]

/// Engine error kinds.
pub mod error;
/// Append/finalize engine front-end over a layer reducer.
pub mod engine;
/// Fr32 bit-expansion of 127-byte windows into 128-byte leaf inputs.
pub mod fr32;
/// 254-bit SHA-256 leaf and node hashing.
pub mod hash;
/// Pipelined layer reducer: one worker thread per active tree layer.
pub mod pipeline;
/// Synchronous layer reducer: a pending-digest slot per tree layer.
pub mod reducer;
/// Canonical zero-subtree digest table.
pub mod zerocomm;

pub use engine::Engine;
pub use error::{Error, Result};
pub use hash::{leaf_hash, node_hash, Digest};
pub use pipeline::{PipelinedReducer, ShutdownHandle};
pub use reducer::{LayerReduce, SyncReducer};
pub use zerocomm::ZeroComm;

/// Highest addressable tree layer count: `log2(64 GiB / 32)`.
pub const MAX_LAYERS: usize = 31;

/// Upper bound on the payload any single chunk may carry.
pub const MAX_LEAF_PAYLOAD: usize = 2 * 1024 * 1024;

/// Payload bytes per Fr32 window.
pub const WINDOW_SIZE: usize = 127;

/// Bytes per expanded window (two 64-byte SHA-256 blocks).
pub const EXPANDED_WINDOW_SIZE: usize = 128;

/// The commP chunking stride: the largest whole number of Fr32 windows
/// fitting in [`MAX_LEAF_PAYLOAD`].
pub const STRIDE: usize = MAX_LEAF_PAYLOAD - (MAX_LEAF_PAYLOAD % WINDOW_SIZE);

/// Largest payload a proving tree of [`MAX_LAYERS`] layers can commit.
pub const MAX_PIECE_PAYLOAD: u64 = 127 * (((1u64 << MAX_LAYERS) * 32) / 128);
