//! Geometric growth with a cross-cycle high-water hint.
//!
//! Sizes handed in and out of the policy are measured in scalars except
//! where a method says entries; an entry is `bs` scalars.

/// Growth policy attached to one stash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizingPolicy {
    bs: usize,
    default_size: usize,
    /// Caller-supplied initial size in scalars.
    initial: Option<usize>,
    /// Peak of previous cycles in scalars, 0 until a cycle completed.
    high_water: usize,
}

impl SizingPolicy {
    /// Default scalars for vector stashes.
    pub const VECTOR_DEFAULT: usize = 100;
    /// Default scalars for matrix stashes.
    pub const MATRIX_DEFAULT: usize = 10_000;

    pub fn new(bs: usize, default_size: usize, initial: Option<usize>) -> Self {
        Self {
            bs: bs.max(1),
            default_size,
            initial: initial.filter(|&n| n > 0),
            high_water: 0,
        }
    }

    pub fn vector(bs: usize, initial: Option<usize>) -> Self {
        Self::new(bs, Self::VECTOR_DEFAULT, initial)
    }

    pub fn matrix(bs: usize, initial: Option<usize>) -> Self {
        Self::new(bs, Self::MATRIX_DEFAULT, initial)
    }

    /// Capacity in entries after growing from `current` entries so that
    /// `incr` more entries fit.
    pub fn next_capacity(&self, current: usize, incr: usize) -> usize {
        let mut next = if current == 0 && self.high_water == 0 {
            self.initial.unwrap_or(self.default_size) / self.bs
        } else if current == 0 {
            self.initial.unwrap_or(0).max(self.high_water) / self.bs
        } else {
            current * 2
        };
        if next < current + incr {
            next += 2 * incr;
        }
        next
    }

    /// Capacity in entries a buffer keeps between cycles.
    pub fn retained_capacity(&self) -> usize {
        self.initial.unwrap_or(0).max(self.high_water) / self.bs
    }

    /// Record a finished cycle of `n` entries.
    ///
    /// The hint grows to `(floor(1.1 n) + 5) * bs` scalars and never shrinks.
    pub fn record_cycle(&mut self, n: usize) {
        let hint = ((n as f64 * 1.1) as usize + 5) * self.bs;
        if hint > self.high_water {
            self.high_water = hint;
        }
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn bs(&self) -> usize {
        self.bs
    }
}
