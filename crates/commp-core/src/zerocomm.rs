//! Canonical zero-subtree digests.
//!
//! `Z[0]` is a 32-byte extent of nul bytes — the zero field element.
//! `Z[i] = H254(Z[i-1] ‖ Z[i-1])` is the digest of a complete subtree of
//! height `i` whose payload is all zeros. The table is what lets the
//! reducer pad an orphaned digest with a sibling of the *same* height
//! instead of materializing gigabytes of zero input.
//!
//! Note the indexing convention: a digest flushed out of layer `i` commits
//! a subtree of height `i + 1`, so its pad is `Z[i + 1]`. Layer 0 never
//! pads at all — every window contributes its two leaf digests together.

use crate::hash::{node_hash, Digest};
use crate::MAX_LAYERS;

/// Number of table entries; one longer than the layer stack.
pub const TABLE_LEN: usize = MAX_LAYERS + 1;

/// Precomputed zero-subtree digest stack.
#[derive(Clone, Debug)]
pub struct ZeroComm {
    table: [Digest; TABLE_LEN],
}

impl ZeroComm {
    /// Build the table. Cheap enough to do at engine construction.
    #[must_use]
    pub fn new() -> Self {
        let mut table = [[0u8; 32]; TABLE_LEN];
        for i in 1..TABLE_LEN {
            table[i] = node_hash(&table[i - 1], &table[i - 1]);
        }
        Self { table }
    }

    /// The zero digest at height `i`.
    #[inline]
    #[must_use]
    pub fn at(&self, i: usize) -> &Digest {
        &self.table[i]
    }

    /// The sibling pad for a digest flushed out of layer `layer`.
    #[inline]
    #[must_use]
    pub fn pad_for_layer(&self, layer: usize) -> &Digest {
        &self.table[layer + 1]
    }
}

impl Default for ZeroComm {
    fn default() -> Self {
        Self::new()
    }
}
