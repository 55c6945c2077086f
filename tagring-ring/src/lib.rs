//! Modular 160-bit ring-identifier arithmetic (Chord's key space) and the
//! handful of pure comparisons the rest of the system is built on: interval
//! membership on the ring, the Bully "who wins" comparator, and finger-table
//! key derivation.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

pub const ID_BITS: u32 = 160;
pub const ID_BYTES: usize = 20;

/// A 160-bit ring identifier. Ordering is the numeric (big-endian) order of
/// the underlying bytes; arithmetic wraps modulo 2^160.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id([u8; ID_BYTES]);

impl Id {
    pub const ZERO: Id = Id([0u8; ID_BYTES]);

    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Id {
        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// `hash(s) -> ID`: SHA-1 of `s`, interpreted big-endian.
    pub fn hash(data: &[u8]) -> Id {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&digest);
        Id(bytes)
    }

    /// Builds an `Id` from a small integer, useful for tests and for the
    /// "finger start" derivation below. The value occupies the low-order
    /// bytes; the rest of the ring stays zero.
    pub fn from_u64(value: u64) -> Id {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Id(bytes)
    }

    /// `2^i mod 2^160`, for `i` in `0..160`.
    pub fn pow2(i: u32) -> Id {
        assert!(i < ID_BITS, "finger index out of range: {i}");
        let mut bytes = [0u8; ID_BYTES];
        let byte_from_end = (i / 8) as usize;
        let bit = i % 8;
        bytes[ID_BYTES - 1 - byte_from_end] = 1 << bit;
        Id(bytes)
    }

    /// Addition modulo 2^160. Byte-array addition with carry propagation
    /// already discards any carry out of the top byte, which is exactly
    /// reduction mod 2^160 — no bignum library required.
    pub fn wrapping_add(&self, other: &Id) -> Id {
        let mut result = [0u8; ID_BYTES];
        let mut carry: u16 = 0;
        for i in (0..ID_BYTES).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            result[i] = sum as u8;
            carry = sum >> 8;
        }
        Id(result)
    }

    /// `fingerStart(id, i) -> ID`: `(id + 2^i) mod 2^160`.
    pub fn finger_start(&self, i: u32) -> Id {
        self.wrapping_add(&Id::pow2(i))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_hex())
    }
}

/// Membership in the half-open ring interval `(a, b]`: if `a < b`, the plain
/// interval; otherwise the wrapped interval that crosses the ring's origin.
pub fn between(k: &Id, a: &Id, b: &Id) -> bool {
    if a < b {
        k > a && k <= b
    } else {
        k > a || k <= b
    }
}

/// Bully comparator: `a` wins an election over `b` iff `a`'s id is larger.
pub fn bully(a: &Id, b: &Id) -> bool {
    a > b
}

/// Membership in the fully-open ring interval `(a, b)`, used by
/// `closestPrecedingNode` (spec.md §4.4), which excludes the search key
/// itself as well as the scanning node's own id.
pub fn strictly_between(k: &Id, a: &Id, b: &Id) -> bool {
    if a < b {
        k > a && k < b
    } else {
        k > a || k < b
    }
}
