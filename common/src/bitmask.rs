//! Bounded Bitsets
//!
//! Fixed-capacity bit vectors used for CCE, RBG and PRB occupancy. The
//! logical length is set at construction and never exceeds 128 bits, which
//! covers the largest LTE carrier (100 PRB, at most 88 CCEs).

use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign};

/// Bit vector with a runtime length and a 128-bit fixed capacity
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BoundedBitset {
    bits: u128,
    len: u32,
}

/// Control channel element occupancy
pub type CceMask = BoundedBitset;
/// Downlink resource block group occupancy
pub type RbgMask = BoundedBitset;
/// Uplink physical resource block occupancy
pub type PrbMask = BoundedBitset;

impl BoundedBitset {
    /// Maximum number of bits a bitset can hold
    pub const MAX_BITS: u32 = 128;

    /// Create an all-zero bitset of `len` bits
    pub fn new(len: u32) -> Self {
        assert!(len <= Self::MAX_BITS, "bitset length {} exceeds {}", len, Self::MAX_BITS);
        Self { bits: 0, len }
    }

    /// Create a bitset of `len` bits with `[start, end)` set
    pub fn with_range(len: u32, start: u32, end: u32) -> Self {
        let mut mask = Self::new(len);
        mask.fill(start, end);
        mask
    }

    /// Build a bitset from an iterator of set positions
    pub fn from_indices(len: u32, indices: impl IntoIterator<Item = u32>) -> Self {
        let mut mask = Self::new(len);
        for idx in indices {
            mask.set(idx);
        }
        mask
    }

    fn range_bits(start: u32, end: u32) -> u128 {
        if start >= end {
            return 0;
        }
        let width = end - start;
        let ones = if width == 128 { u128::MAX } else { (1u128 << width) - 1 };
        ones << start
    }

    /// Logical length in bits
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set every bit in `[start, end)`
    pub fn fill(&mut self, start: u32, end: u32) {
        debug_assert!(end <= self.len, "fill [{}, {}) out of bitset of length {}", start, end, self.len);
        self.bits |= Self::range_bits(start, end.min(self.len));
    }

    pub fn set(&mut self, idx: u32) {
        debug_assert!(idx < self.len, "bit {} out of bitset of length {}", idx, self.len);
        if idx < self.len {
            self.bits |= 1u128 << idx;
        }
    }

    pub fn test(&self, idx: u32) -> bool {
        idx < self.len && (self.bits >> idx) & 1 == 1
    }

    /// Clear all bits, keeping the length
    pub fn reset(&mut self) {
        self.bits = 0;
    }

    /// Clear all bits and change the length
    pub fn resize(&mut self, len: u32) {
        *self = Self::new(len);
    }

    /// True when at least one bit is set
    pub fn any(&self) -> bool {
        self.bits != 0
    }

    /// True when no bit is set
    pub fn none(&self) -> bool {
        self.bits == 0
    }

    /// Number of set bits
    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    /// True when both bitsets share at least one set bit
    pub fn intersects(&self, other: &Self) -> bool {
        self.bits & other.bits != 0
    }

    /// Iterate over the indices of set bits in increasing order
    pub fn iter_ones(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(move |&i| self.test(i))
    }

    /// Hex dump, most significant nibble first
    pub fn to_hex(&self) -> String {
        let width = ((self.len + 3) / 4).max(1) as usize;
        format!("{:0width$x}", self.bits, width = width)
    }
}

impl BitAnd for BoundedBitset {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        debug_assert_eq!(self.len, rhs.len);
        Self { bits: self.bits & rhs.bits, len: self.len }
    }
}

impl BitOr for BoundedBitset {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        debug_assert_eq!(self.len, rhs.len);
        Self { bits: self.bits | rhs.bits, len: self.len }
    }
}

impl BitAndAssign for BoundedBitset {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}

impl BitOrAssign for BoundedBitset {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl fmt::Debug for BoundedBitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundedBitset(len={}, 0x{})", self.len, self.to_hex())
    }
}

impl fmt::Display for BoundedBitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl Serialize for BoundedBitset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
