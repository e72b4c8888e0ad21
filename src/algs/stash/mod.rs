//! Assembly stash: buffers entries destined for other ranks and moves them
//! to their owners.
//!
//! A cycle is `put`* → [`Stash::scatter_begin`] →
//! [`Stash::scatter_get_message`]* → [`Stash::scatter_end`]. Entries whose
//! owner is the calling rank are handed back as a message from the caller
//! itself without touching the network.
//!
//! The index type is a parameter: plain integers for vectors,
//! [`MatIndex`](crate::data::stash_index::MatIndex) for matrices. Each entry
//! carries `bs` scalars.

mod exchange;
mod matrix;

pub use exchange::StashMessage;

use crate::algs::communicator::{CommTag, Communicator, StashCommTags};
use crate::assembly_error::AssemblyError;
use crate::data::entry_buffer::EntryBuffer;
use crate::data::sizing::SizingPolicy;
use crate::data::stash_index::{InsertMode, StashIndex};
use crate::topology::ownership::OwnershipMap;
use exchange::ScatterState;

/// Default tag base for stashes with one scalar per entry.
pub const STASH_TAG_BASE: CommTag = CommTag::new(0x5A00);
/// Default tag base for block stashes.
pub const BLOCK_STASH_TAG_BASE: CommTag = CommTag::new(0x5B00);

/// Buffer of off-process entries plus the exchange that delivers them.
pub struct Stash<I: StashIndex, C: Communicator> {
    comm: C,
    owners: OwnershipMap,
    tags: StashCommTags,
    entries: EntryBuffer<I>,
    mode: Option<InsertMode>,
    scatter: Option<ScatterState<I, C>>,
}

impl<I: StashIndex, C: Communicator> Stash<I, C> {
    /// Stash with `bs` scalars per entry and the vector sizing defaults.
    pub fn new(comm: C, owners: OwnershipMap, bs: usize) -> Result<Self, AssemblyError> {
        Self::with_policy(comm, owners, SizingPolicy::vector(bs, None))
    }

    /// Stash sized by an explicit policy; the policy's block size is the
    /// number of scalars per entry.
    pub fn with_policy(
        comm: C,
        owners: OwnershipMap,
        policy: SizingPolicy,
    ) -> Result<Self, AssemblyError> {
        if owners.size() != comm.size() {
            return Err(AssemblyError::InvalidOwnership(format!(
                "map has {} ranks, communicator has {}",
                owners.size(),
                comm.size()
            )));
        }
        let tags = if policy.bs() > 1 {
            StashCommTags::from_base(BLOCK_STASH_TAG_BASE)
        } else {
            StashCommTags::from_base(STASH_TAG_BASE)
        };
        Ok(Self {
            comm,
            owners,
            tags,
            entries: EntryBuffer::new(policy),
            mode: None,
            scatter: None,
        })
    }

    /// Use a different pair of channel tags.
    pub fn with_tags(mut self, tags: StashCommTags) -> Self {
        self.tags = tags;
        self
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn owners(&self) -> &OwnershipMap {
        &self.owners
    }

    /// Scalars per entry.
    pub fn bs(&self) -> usize {
        self.entries.bs()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert mode of the current cycle, if any value was put.
    pub fn mode(&self) -> Option<InsertMode> {
        self.mode
    }

    pub fn is_scattering(&self) -> bool {
        self.scatter.is_some()
    }

    /// `(entries, reallocations)` of the current cycle.
    pub fn get_info(&self) -> (usize, usize) {
        (self.entries.len(), self.entries.reallocs())
    }

    /// Append one entry.
    ///
    /// Negative indices are skipped. Indices at or past the global extent
    /// are rejected.
    pub fn put(&mut self, index: I, payload: &[f64], mode: InsertMode) -> Result<(), AssemblyError> {
        self.check_put(mode)?;
        if self.admit(index)? {
            self.entries.push(index, payload)?;
        }
        Ok(())
    }

    /// Validate state and mode for a put of `mode` and fix the cycle's mode.
    fn check_put(&mut self, mode: InsertMode) -> Result<(), AssemblyError> {
        if self.scatter.is_some() {
            return Err(AssemblyError::ScatterInProgress);
        }
        match self.mode {
            Some(current) if current != mode => Err(AssemblyError::MixedInsertMode {
                current,
                requested: mode,
            }),
            _ => {
                self.mode = Some(mode);
                Ok(())
            }
        }
    }

    /// `false` for ignored indices; error for indices past the extent.
    fn admit(&self, index: I) -> Result<bool, AssemblyError> {
        match index.ownership_key() {
            None => Ok(false),
            Some(key) if key >= self.owners.extent() => Err(AssemblyError::IndexOutOfRange {
                index: key,
                extent: self.owners.extent(),
            }),
            Some(_) => Ok(true),
        }
    }
}

impl<I: StashIndex, C: Communicator> std::fmt::Debug for Stash<I, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stash")
            .field("rank", &self.comm.rank())
            .field("bs", &self.bs())
            .field("len", &self.len())
            .field("mode", &self.mode)
            .field("scattering", &self.scatter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    fn serial(bs: usize) -> Stash<i64, NoComm> {
        Stash::new(NoComm, OwnershipMap::new(vec![0, 10]).unwrap(), bs).unwrap()
    }

    #[test]
    fn mixed_modes_rejected_at_first_conflict() {
        let mut s = serial(1);
        s.put(1, &[1.0], InsertMode::Accumulate).unwrap();
        s.put(2, &[1.0], InsertMode::Accumulate).unwrap();
        let err = s.put(3, &[1.0], InsertMode::Insert).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::MixedInsertMode {
                current: InsertMode::Accumulate,
                requested: InsertMode::Insert
            }
        ));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn negative_skipped_out_of_range_rejected() {
        let mut s = serial(1);
        s.put(-5, &[1.0], InsertMode::Insert).unwrap();
        assert!(s.is_empty());
        assert!(matches!(
            s.put(10, &[1.0], InsertMode::Insert),
            Err(AssemblyError::IndexOutOfRange { index: 10, .. })
        ));
    }

    #[test]
    fn map_must_match_communicator() {
        let map = OwnershipMap::new(vec![0, 2, 4]).unwrap();
        assert!(Stash::<i64, _>::new(NoComm, map, 1).is_err());
    }

    #[test]
    fn block_stash_uses_block_tags() {
        let s = serial(3);
        assert_eq!(s.tags.values, BLOCK_STASH_TAG_BASE);
        assert_eq!(serial(1).tags.indices, STASH_TAG_BASE.offset(1));
    }
}
