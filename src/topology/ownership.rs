//! Ownership map of a distributed index space.
//!
//! An [`OwnershipMap`] stores `size + 1` global boundaries; rank `j` owns
//! the half-open range `boundaries[j]..boundaries[j + 1]`. Maps are built
//! once per distributed object and read-only afterwards.

use crate::algs::combine::CountOp;
use crate::algs::communicator::Communicator;
use crate::assembly_error::AssemblyError;
use crate::debug_invariants::DebugInvariants;
use itertools::Itertools;
use std::ops::Range;

/// Serializes as the bare boundary list; deserializing validates it.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct OwnershipMap {
    boundaries: Vec<u64>,
}

impl OwnershipMap {
    /// Build a map from explicit boundaries.
    ///
    /// Requires at least two boundaries, `boundaries[0] == 0`, and a
    /// non-decreasing sequence. Ranks may own empty ranges.
    pub fn new(boundaries: Vec<u64>) -> Result<Self, AssemblyError> {
        let map = Self { boundaries };
        map.validate_invariants()?;
        Ok(map)
    }

    /// Build the map collectively from each rank's local length.
    pub fn from_local_sizes<C: Communicator>(
        comm: &C,
        n_local: usize,
    ) -> Result<Self, AssemblyError> {
        let size = comm.size();
        let mut local = vec![0u64; size];
        local[comm.rank()] = n_local as u64;
        let mut sizes = vec![0u64; size];
        comm.all_reduce_u64(&local, &mut sizes, CountOp::Sum)?;
        let mut boundaries = Vec::with_capacity(size + 1);
        boundaries.push(0);
        boundaries.extend(sizes.iter().scan(0u64, |acc, &n| {
            *acc += n;
            Some(*acc)
        }));
        Self::new(boundaries)
    }

    /// Derive the map of a block index space (`boundaries[j] / bs`).
    pub fn blocked(&self, bs: usize) -> Result<Self, AssemblyError> {
        if bs == 0 {
            return Err(AssemblyError::InvalidOwnership(
                "block size must be positive".into(),
            ));
        }
        let bs = bs as u64;
        if let Some(b) = self.boundaries.iter().find(|&&b| b % bs != 0) {
            return Err(AssemblyError::InvalidOwnership(format!(
                "boundary {b} is not a multiple of block size {bs}"
            )));
        }
        Self::new(self.boundaries.iter().map(|&b| b / bs).collect())
    }

    /// Rank owning `index`.
    pub fn owner(&self, index: u64) -> Result<usize, AssemblyError> {
        let extent = self.extent();
        if index >= extent {
            return Err(AssemblyError::IndexOutOfRange { index, extent });
        }
        // Last boundary <= index; empty ranges before it are skipped.
        Ok(self.boundaries.partition_point(|&b| b <= index) - 1)
    }

    /// Global range owned by `rank`.
    pub fn range(&self, rank: usize) -> Result<Range<u64>, AssemblyError> {
        match (self.boundaries.get(rank), self.boundaries.get(rank + 1)) {
            (Some(&lo), Some(&hi)) => Ok(lo..hi),
            _ => Err(AssemblyError::InvalidOwnership(format!(
                "rank {rank} outside a map of {} ranks",
                self.size()
            ))),
        }
    }

    /// Total number of global indices.
    pub fn extent(&self) -> u64 {
        self.boundaries.last().copied().unwrap_or(0)
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    pub fn boundaries(&self) -> &[u64] {
        &self.boundaries
    }
}

impl TryFrom<Vec<u64>> for OwnershipMap {
    type Error = AssemblyError;

    fn try_from(boundaries: Vec<u64>) -> Result<Self, Self::Error> {
        Self::new(boundaries)
    }
}

impl From<OwnershipMap> for Vec<u64> {
    fn from(map: OwnershipMap) -> Self {
        map.boundaries
    }
}

impl DebugInvariants for OwnershipMap {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "OwnershipMap");
    }

    fn validate_invariants(&self) -> Result<(), AssemblyError> {
        if self.boundaries.len() < 2 {
            return Err(AssemblyError::InvalidOwnership(format!(
                "need at least 2 boundaries, got {}",
                self.boundaries.len()
            )));
        }
        if self.boundaries[0] != 0 {
            return Err(AssemblyError::InvalidOwnership(format!(
                "first boundary must be 0, got {}",
                self.boundaries[0]
            )));
        }
        if let Some((j, (a, b))) = self
            .boundaries
            .iter()
            .tuple_windows()
            .enumerate()
            .find(|(_, (a, b))| b < a)
        {
            return Err(AssemblyError::InvalidOwnership(format!(
                "boundaries decrease at rank {j}: {a} > {b}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn owner_lookup() {
        let map = OwnershipMap::new(vec![0, 3, 6, 9, 12]).unwrap();
        assert_eq!(map.owner(0).unwrap(), 0);
        assert_eq!(map.owner(3).unwrap(), 1);
        assert_eq!(map.owner(10).unwrap(), 3);
        assert!(matches!(
            map.owner(12),
            Err(AssemblyError::IndexOutOfRange {
                index: 12,
                extent: 12
            })
        ));
        assert_eq!(map.range(2).unwrap(), 6..9);
        assert_eq!(map.size(), 4);
        assert!(matches!(
            map.range(4),
            Err(AssemblyError::InvalidOwnership(_))
        ));
    }

    #[test]
    fn empty_ranges_are_skipped() {
        let map = OwnershipMap::new(vec![0, 2, 2, 2, 5]).unwrap();
        assert_eq!(map.owner(1).unwrap(), 0);
        assert_eq!(map.owner(2).unwrap(), 3);
    }

    #[test]
    fn rejects_bad_boundaries() {
        assert!(OwnershipMap::new(vec![0]).is_err());
        assert!(OwnershipMap::new(vec![1, 4]).is_err());
        assert!(OwnershipMap::new(vec![0, 4, 3]).is_err());
    }

    #[test]
    fn blocked_divides_boundaries() {
        let map = OwnershipMap::new(vec![0, 4, 8]).unwrap();
        assert_eq!(map.blocked(2).unwrap().boundaries(), &[0, 2, 4]);
        assert!(map.blocked(3).is_err());
        assert!(map.blocked(0).is_err());
    }

    #[test]
    fn from_local_sizes_serial() {
        let map = OwnershipMap::from_local_sizes(&NoComm, 7).unwrap();
        assert_eq!(map.boundaries(), &[0, 7]);
    }

    #[test]
    fn serde_roundtrip() {
        let map = OwnershipMap::new(vec![0, 1, 5]).unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, "[0,1,5]");
        let back: OwnershipMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn deserialize_rejects_invalid_boundaries() {
        assert!(serde_json::from_str::<OwnershipMap>("[5,1]").is_err());
        assert!(serde_json::from_str::<OwnershipMap>("[0,4,3]").is_err());
        assert!(serde_json::from_str::<OwnershipMap>("[]").is_err());
    }
}
