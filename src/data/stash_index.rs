//! Index types a stash can carry, and the insert/accumulate policy.
//!
//! A [`StashIndex`] knows the global key the ownership map is consulted
//! with and how it travels on the wire. Plain integer widths cover vector
//! assembly; [`MatIndex`] covers matrix assembly, owned by row.

use crate::algs::wire::{WireI64, WireMatIndex};
use bytemuck::Pod;
use num_traits::ToPrimitive;
use std::fmt;

/// How stashed values are merged into owned storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum InsertMode {
    Insert,
    Accumulate,
}

impl InsertMode {
    /// Bit used in the insert-mode agreement all-reduce.
    pub const fn flag(self) -> u64 {
        match self {
            InsertMode::Insert => 0b01,
            InsertMode::Accumulate => 0b10,
        }
    }

    /// Merge `incoming` into `slot`.
    #[inline]
    pub fn merge(self, slot: &mut f64, incoming: f64) {
        match self {
            InsertMode::Insert => *slot = incoming,
            InsertMode::Accumulate => *slot += incoming,
        }
    }
}

impl fmt::Display for InsertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertMode::Insert => f.write_str("insert"),
            InsertMode::Accumulate => f.write_str("accumulate"),
        }
    }
}

/// Global index stored with each stash entry.
pub trait StashIndex: Copy + fmt::Debug + PartialEq + Send + 'static {
    /// Wire representation.
    type Wire: Pod;

    /// Key looked up in the ownership map, or `None` for an ignored
    /// (negative) index.
    fn ownership_key(self) -> Option<u64>;
    fn to_wire(self) -> Self::Wire;
    fn from_wire(w: Self::Wire) -> Self;
}

macro_rules! impl_stash_index {
    ($($t:ty),*) => {$(
        impl StashIndex for $t {
            type Wire = WireI64;

            #[inline]
            fn ownership_key(self) -> Option<u64> {
                self.to_u64()
            }
            // `WireI64` carries the bit pattern: unsigned values past
            // `i64::MAX` travel as negatives and `from_wire` restores them.
            #[inline]
            fn to_wire(self) -> WireI64 {
                WireI64::of(self as i64)
            }
            #[inline]
            fn from_wire(w: WireI64) -> Self {
                w.get() as $t
            }
        }
    )*};
}

impl_stash_index!(i32, i64, u32, u64, usize);

/// Matrix entry position, owned by the rank owning `row`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatIndex {
    pub row: i64,
    pub col: i64,
}

impl MatIndex {
    pub const fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }
}

impl StashIndex for MatIndex {
    type Wire = WireMatIndex;

    #[inline]
    fn ownership_key(self) -> Option<u64> {
        if self.col < 0 {
            return None;
        }
        self.row.to_u64()
    }
    #[inline]
    fn to_wire(self) -> WireMatIndex {
        WireMatIndex::new(self.row, self.col)
    }
    #[inline]
    fn from_wire(w: WireMatIndex) -> Self {
        Self::new(w.row(), w.col())
    }
}
