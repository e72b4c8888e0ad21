//! Distributed vector of `f64` driven through stash assembly.
//!
//! Each rank stores the contiguous slice it owns. Values set for indices
//! owned elsewhere go into a plain stash (one scalar per entry) or, for
//! block-indexed sets, a block stash bound to the block ownership map.
//! [`DistVec::assembly_begin`] / [`DistVec::assembly_end`] deliver them.

use crate::algs::combine::CountOp;
use crate::algs::communicator::{Communicator, StashCommTags};
use crate::algs::stash::{BLOCK_STASH_TAG_BASE, STASH_TAG_BASE, Stash};
use crate::assembly_error::AssemblyError;
use crate::config::StashOptions;
use crate::data::sizing::SizingPolicy;
use crate::data::stash_index::{InsertMode, StashIndex};
use crate::topology::ownership::OwnershipMap;

pub struct DistVec<C: Communicator + Clone> {
    comm: C,
    owners: OwnershipMap,
    bowners: OwnershipMap,
    bs: usize,
    local: Vec<f64>,
    stash: Stash<i64, C>,
    bstash: Stash<i64, C>,
    mode: Option<InsertMode>,
    ignore_off_process: bool,
}

impl<C: Communicator + Clone> DistVec<C> {
    /// Zero vector with the given ownership map and block size.
    pub fn new(
        comm: C,
        owners: OwnershipMap,
        bs: usize,
        options: &StashOptions,
    ) -> Result<Self, AssemblyError> {
        if owners.size() != comm.size() {
            return Err(AssemblyError::InvalidOwnership(format!(
                "map has {} ranks, communicator has {}",
                owners.size(),
                comm.size()
            )));
        }
        let bowners = owners.blocked(bs)?;
        let rank = comm.rank();
        let initial = options.initial_size_for(rank);
        let range = owners.range(rank)?;
        let stash = Stash::with_policy(
            comm.clone(),
            owners.clone(),
            SizingPolicy::vector(1, initial),
        )?
        .with_tags(StashCommTags::from_base(STASH_TAG_BASE));
        let bstash = Stash::with_policy(
            comm.clone(),
            bowners.clone(),
            SizingPolicy::vector(bs, initial),
        )?
        .with_tags(StashCommTags::from_base(BLOCK_STASH_TAG_BASE));
        Ok(Self {
            comm,
            owners,
            bowners,
            bs,
            local: vec![0.0; (range.end - range.start) as usize],
            stash,
            bstash,
            mode: None,
            ignore_off_process: options.ignore_off_process_entries,
        })
    }

    /// Collective: build the ownership map from each rank's local length.
    pub fn from_local_size(
        comm: C,
        n_local: usize,
        bs: usize,
        options: &StashOptions,
    ) -> Result<Self, AssemblyError> {
        let owners = OwnershipMap::from_local_sizes(&comm, n_local)?;
        Self::new(comm, owners, bs, options)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn owners(&self) -> &OwnershipMap {
        &self.owners
    }

    pub fn block_size(&self) -> usize {
        self.bs
    }

    pub fn global_len(&self) -> u64 {
        self.owners.extent()
    }

    /// Locally owned values.
    pub fn local(&self) -> &[f64] {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut [f64] {
        &mut self.local
    }

    /// Entry counts and reallocations of the plain and block stashes.
    pub fn stash_info(&self) -> ((usize, usize), (usize, usize)) {
        (self.stash.get_info(), self.bstash.get_info())
    }

    fn check_mode(&mut self, mode: InsertMode) -> Result<(), AssemblyError> {
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

    /// Set `y[i]` at global index `ix[i]`; negative indices are skipped.
    pub fn set_values(&mut self, ix: &[i64], y: &[f64], mode: InsertMode) -> Result<(), AssemblyError> {
        if ix.len() != y.len() {
            return Err(AssemblyError::PayloadLength {
                expected: ix.len(),
                got: y.len(),
            });
        }
        self.check_mode(mode)?;
        let own = self.owners.range(self.comm.rank())?;
        let extent = self.owners.extent();
        for (&i, &v) in ix.iter().zip(y) {
            let Some(key) = i.ownership_key() else {
                continue;
            };
            if key >= extent {
                return Err(AssemblyError::IndexOutOfRange { index: key, extent });
            }
            if own.contains(&key) {
                mode.merge(&mut self.local[(key - own.start) as usize], v);
            } else if !self.ignore_off_process {
                self.stash.put(i, &[v], mode)?;
            }
        }
        Ok(())
    }

    /// Set one block of `bs` values per block index in `bix`.
    pub fn set_values_blocked(
        &mut self,
        bix: &[i64],
        y: &[f64],
        mode: InsertMode,
    ) -> Result<(), AssemblyError> {
        let bs = self.bs;
        if y.len() != bix.len() * bs {
            return Err(AssemblyError::PayloadLength {
                expected: bix.len() * bs,
                got: y.len(),
            });
        }
        self.check_mode(mode)?;
        let own = self.bowners.range(self.comm.rank())?;
        let extent = self.bowners.extent();
        for (&b, block) in bix.iter().zip(y.chunks_exact(bs)) {
            let Some(key) = b.ownership_key() else {
                continue;
            };
            if key >= extent {
                return Err(AssemblyError::IndexOutOfRange { index: key, extent });
            }
            if own.contains(&key) {
                let start = (key - own.start) as usize * bs;
                for (slot, &v) in self.local[start..start + bs].iter_mut().zip(block) {
                    mode.merge(slot, v);
                }
            } else if !self.ignore_off_process {
                self.bstash.put(b, block, mode)?;
            }
        }
        Ok(())
    }

    /// Collective: agree on the insert mode and start both scatters.
    pub fn assembly_begin(&mut self) -> Result<(), AssemblyError> {
        if self.ignore_off_process {
            return Ok(());
        }
        let local = [self.mode.map_or(0, InsertMode::flag)];
        let mut agreed = [0u64];
        self.comm.all_reduce_u64(&local, &mut agreed, CountOp::BitOr)?;
        self.mode = match agreed[0] {
            0 => None,
            f if f == InsertMode::Insert.flag() => Some(InsertMode::Insert),
            f if f == InsertMode::Accumulate.flag() => Some(InsertMode::Accumulate),
            _ => return Err(AssemblyError::InconsistentInsertMode),
        };

        self.stash.scatter_begin()?;
        self.bstash.scatter_begin()?;
        let (n, reallocs) = self.stash.get_info();
        log::debug!("stash has {n} entries, uses {reallocs} mallocs");
        let (n, reallocs) = self.bstash.get_info();
        log::debug!("block-stash has {n} entries, uses {reallocs} mallocs");
        Ok(())
    }

    /// Drain both stashes into local storage and end the cycle.
    pub fn assembly_end(&mut self) -> Result<(), AssemblyError> {
        if self.ignore_off_process {
            self.mode = None;
            return Ok(());
        }
        let drained = self.drain();
        let ended = self.stash.scatter_end();
        let bended = self.bstash.scatter_end();
        self.mode = None;
        drained.and(ended).and(bended)
    }

    fn drain(&mut self) -> Result<(), AssemblyError> {
        // Messages only arrive when some rank set values, so a mode exists.
        let mode = self.mode.unwrap_or(InsertMode::Insert);
        let rank = self.comm.rank();

        let own = self.owners.range(rank)?;
        while let Some(msg) = self.stash.scatter_get_message()? {
            for (i, v) in msg.iter() {
                let slot = local_slot(i, &own)?;
                mode.merge(&mut self.local[slot], v[0]);
            }
        }

        let own = self.bowners.range(rank)?;
        let bs = self.bs;
        while let Some(msg) = self.bstash.scatter_get_message()? {
            for (b, block) in msg.iter() {
                let start = local_slot(b, &own)? * bs;
                for (slot, &v) in self.local[start..start + bs].iter_mut().zip(block) {
                    mode.merge(slot, v);
                }
            }
        }
        Ok(())
    }
}

/// Offset of a received global index within the owned range.
fn local_slot(index: i64, own: &std::ops::Range<u64>) -> Result<usize, AssemblyError> {
    match index.ownership_key() {
        Some(key) if own.contains(&key) => Ok((key - own.start) as usize),
        _ => Err(AssemblyError::InvalidOwnership(format!(
            "received index {index} outside owned range {own:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};

    fn serial(n: usize, bs: usize) -> DistVec<NoComm> {
        DistVec::from_local_size(NoComm, n, bs, &StashOptions::default()).unwrap()
    }

    #[test]
    fn local_insert_and_accumulate() {
        let mut v = serial(4, 1);
        v.set_values(&[0, 2, -1], &[1.0, 2.0, 9.0], InsertMode::Accumulate)
            .unwrap();
        v.set_values(&[0], &[1.5], InsertMode::Accumulate).unwrap();
        v.assembly_begin().unwrap();
        v.assembly_end().unwrap();
        assert_eq!(v.local(), &[2.5, 0.0, 2.0, 0.0]);
        // mode resets after assembly
        v.set_values(&[0], &[7.0], InsertMode::Insert).unwrap();
        assert_eq!(v.local()[0], 7.0);
    }

    #[test]
    fn mixing_modes_in_one_cycle_fails() {
        let mut v = serial(2, 1);
        v.set_values(&[0], &[1.0], InsertMode::Insert).unwrap();
        assert!(matches!(
            v.set_values(&[1], &[1.0], InsertMode::Accumulate),
            Err(AssemblyError::MixedInsertMode { .. })
        ));
    }

    #[test]
    fn blocked_values_land_in_place() {
        let mut v = serial(6, 2);
        v.set_values_blocked(&[2, 0], &[5.0, 6.0, 1.0, 2.0], InsertMode::Insert)
            .unwrap();
        assert_eq!(v.local(), &[1.0, 2.0, 0.0, 0.0, 5.0, 6.0]);
        assert!(v.set_values_blocked(&[3], &[0.0, 0.0], InsertMode::Insert).is_err());
        assert!(v.set_values_blocked(&[1], &[0.0], InsertMode::Insert).is_err());
    }

    #[test]
    fn map_smaller_than_group_is_rejected() {
        let comms = LocalComm::world(3);
        let owners = OwnershipMap::new(vec![0, 2, 4]).unwrap();
        for comm in comms {
            assert!(matches!(
                DistVec::new(comm, owners.clone(), 1, &StashOptions::default()),
                Err(AssemblyError::InvalidOwnership(_))
            ));
        }
    }

    #[test]
    fn out_of_range_rejected() {
        let mut v = serial(3, 1);
        assert!(matches!(
            v.set_values(&[3], &[1.0], InsertMode::Insert),
            Err(AssemblyError::IndexOutOfRange {
                index: 3,
                extent: 3
            })
        ));
    }
}
