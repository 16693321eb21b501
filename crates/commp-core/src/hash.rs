//! 254-bit SHA-256: plain SHA-256 with the top two bits of the last digest
//! byte cleared, so every 32-byte digest is a valid BLS12-381 scalar.
//!
//! Two entry points exist and they must stay byte-compatible with each
//! other: [`leaf_hash`] for a single 64-byte expanded half, and
//! [`node_hash`] for a pair of sibling digests. Both feed one SHA-256 state
//! and finalize once.

use sha2::{Digest as _, Sha256};

/// A 32-byte tree digest. Invariant: `digest[31] & 0xC0 == 0` for every
/// digest produced by this crate.
pub type Digest = [u8; 32];

/// Mask applied to the last digest byte to drop into the 254-bit range.
pub const CLEAR_MASK: u8 = 0x3F;

#[inline]
fn finalize_254(hasher: Sha256) -> Digest {
    let mut out: Digest = hasher.finalize().into();
    out[31] &= CLEAR_MASK;
    out
}

/// Hash one 64-byte half of an expanded window into a leaf digest.
///
/// The input length is exactly one SHA-256 block, which is what makes the
/// two-half split of the Fr32 expansion worthwhile.
#[inline]
#[must_use]
pub fn leaf_hash(half: &[u8]) -> Digest {
    debug_assert_eq!(half.len(), 64, "leaf input must be a 64-byte half");
    let mut h = Sha256::new();
    h.update(half);
    finalize_254(h)
}

/// Combine two sibling digests into their parent digest.
#[inline]
#[must_use]
pub fn node_hash(left: &Digest, right: &Digest) -> Digest {
    let mut h = Sha256::new();
    h.update(left);
    h.update(right);
    finalize_254(h)
}
