//! Synchronous layer reducer.
//!
//! One pending slot per tree layer. A digest entering layer `i` either
//! parks in `pending[i]` or pairs with the parked digest and carries the
//! parent into layer `i + 1`. Finalize flushes each parked digest upward
//! with its same-height zero-subtree sibling until a single root remains.
//!
//! This is the reference implementation; [`crate::pipeline`] must produce
//! byte-identical roots.

use crate::error::{Error, Result};
use crate::hash::{node_hash, Digest};
use crate::zerocomm::ZeroComm;
use crate::MAX_LAYERS;

/// The seam between the engine and a reduction strategy.
///
/// Digests must enter layer 0 in strict stream order; the tree shape is
/// defined by that order. `finalize_root` consumes the accumulated state
/// and leaves the reducer reset.
pub trait LayerReduce {
    /// Feed the next leaf digest, in stream order.
    fn push_leaf(&mut self, digest: Digest) -> Result<()>;

    /// Collapse all layers into the root digest and reset.
    fn finalize_root(&mut self) -> Result<Digest>;
}

/// In-thread reducer over a fixed `pending` array.
pub struct SyncReducer {
    pending: [Option<Digest>; MAX_LAYERS],
    /// Highest layer that has held a digest since the last reset.
    top: usize,
    seeded: bool,
    zero: ZeroComm,
}

impl SyncReducer {
    /// A reset reducer with the zero table precomputed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: [None; MAX_LAYERS],
            top: 0,
            seeded: false,
            zero: ZeroComm::new(),
        }
    }

    fn push_at(&mut self, mut layer: usize, mut digest: Digest) -> Result<()> {
        loop {
            if layer >= MAX_LAYERS {
                return Err(Error::invariant(format!(
                    "digest escaped the {MAX_LAYERS}-layer reduction stack"
                )));
            }
            if layer > self.top {
                self.top = layer;
            }
            match self.pending[layer].take() {
                None => {
                    self.pending[layer] = Some(digest);
                    return Ok(());
                }
                Some(left) => {
                    digest = node_hash(&left, &digest);
                    layer += 1;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.pending = [None; MAX_LAYERS];
        self.top = 0;
        self.seeded = false;
    }
}

impl Default for SyncReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerReduce for SyncReducer {
    fn push_leaf(&mut self, digest: Digest) -> Result<()> {
        self.seeded = true;
        self.push_at(0, digest)
    }

    fn finalize_root(&mut self) -> Result<Digest> {
        if !self.seeded {
            return Err(Error::InputTooShort);
        }

        // Walk upward, flushing each parked digest with its same-height
        // zero sibling. Pair-pushes along the way may raise `top`; the
        // single digest parked there once we arrive is the root.
        let mut layer = 0;
        loop {
            if layer == self.top {
                let root = self.pending[layer].take().ok_or_else(|| {
                    Error::invariant("top layer empty at finalize")
                })?;
                self.reset();
                return Ok(root);
            }
            if let Some(held) = self.pending[layer].take() {
                let padded = node_hash(&held, self.zero.pad_for_layer(layer));
                self.push_at(layer + 1, padded)?;
            }
            layer += 1;
        }
    }
}
