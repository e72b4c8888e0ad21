//! Append-only buffer of `(index, block of bs scalars)` entries.

use crate::assembly_error::AssemblyError;
use crate::data::sizing::SizingPolicy;
use crate::data::stash_index::StashIndex;
use crate::debug_invariants::DebugInvariants;

#[derive(Clone, Debug)]
pub struct EntryBuffer<I> {
    indices: Vec<I>,
    values: Vec<f64>,
    policy: SizingPolicy,
    /// Growths in this cycle; -1 until the cycle's first allocation.
    reallocs: isize,
}

impl<I: StashIndex> EntryBuffer<I> {
    pub fn new(policy: SizingPolicy) -> Self {
        Self {
            indices: Vec::new(),
            values: Vec::new(),
            policy,
            reallocs: -1,
        }
    }

    pub fn bs(&self) -> usize {
        self.policy.bs()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Capacity in entries.
    pub fn capacity(&self) -> usize {
        self.indices.capacity()
    }

    /// Reallocations performed in the current cycle.
    pub fn reallocs(&self) -> usize {
        self.reallocs.max(0) as usize
    }

    pub fn policy(&self) -> &SizingPolicy {
        &self.policy
    }

    /// Make room for `incr` more entries, growing per the sizing policy.
    pub fn reserve_entries(&mut self, incr: usize) -> Result<(), AssemblyError> {
        let len = self.len();
        if len + incr <= self.capacity() {
            return Ok(());
        }
        let next = self.policy.next_capacity(self.capacity(), incr);
        self.indices.try_reserve_exact(next - len)?;
        self.values.try_reserve_exact((next - len) * self.bs())?;
        self.reallocs += 1;
        Ok(())
    }

    /// Append one entry; `payload` must hold exactly `bs` scalars.
    pub fn push(&mut self, index: I, payload: &[f64]) -> Result<(), AssemblyError> {
        if payload.len() != self.bs() {
            return Err(AssemblyError::PayloadLength {
                expected: self.bs(),
                got: payload.len(),
            });
        }
        self.reserve_entries(1)?;
        self.indices.push(index);
        self.values.extend_from_slice(payload);
        Ok(())
    }

    /// Append an entry whose payload is produced scalar by scalar.
    ///
    /// Room must have been reserved beforehand.
    pub(crate) fn push_with(&mut self, index: I, payload: impl Iterator<Item = f64>) {
        self.indices.push(index);
        let before = self.values.len();
        self.values.extend(payload.take(self.policy.bs()));
        debug_assert_eq!(self.values.len() - before, self.policy.bs());
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &[f64])> + '_ {
        self.indices
            .iter()
            .copied()
            .zip(self.values.chunks_exact(self.bs()))
    }

    /// End the cycle: record the high-water hint, drop the entries, and
    /// size the buffer to the capacity the hint asks for.
    ///
    /// The next cycle starts with `max(initial, high_water) / bs` entries of
    /// room already allocated, so its growths count from zero.
    pub fn finish_cycle(&mut self) -> Result<(), AssemblyError> {
        self.policy.record_cycle(self.len());
        self.indices.clear();
        self.values.clear();
        let keep = self.policy.retained_capacity();
        if self.indices.capacity() > keep {
            self.indices.shrink_to(keep);
            self.values.shrink_to(keep * self.bs());
        } else {
            self.indices.try_reserve_exact(keep)?;
            self.values.try_reserve_exact(keep * self.bs())?;
        }
        self.reallocs = if self.capacity() > 0 { 0 } else { -1 };
        self.debug_assert_invariants();
        Ok(())
    }
}

impl<I: StashIndex> DebugInvariants for EntryBuffer<I> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "EntryBuffer");
    }

    fn validate_invariants(&self) -> Result<(), AssemblyError> {
        if self.values.len() != self.indices.len() * self.bs() {
            return Err(AssemblyError::PayloadLength {
                expected: self.indices.len() * self.bs(),
                got: self.values.len(),
            });
        }
        Ok(())
    }
}
