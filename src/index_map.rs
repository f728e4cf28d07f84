//! `IndexMap`: a rank's view of a block-partitioned global index space.
//!
//! The global space is split into *nodes*; each node carries `block_size`
//! consecutive scalar entries (elements). Every rank owns one contiguous
//! range of nodes, and may additionally reference *ghost* nodes owned by
//! other ranks. Construction is collective: the per-rank ownership table is
//! derived by gathering every rank's owned node count, and ghost owners are
//! resolved against that table.
//!
//! Index maps are plain read-only data after construction and are shared
//! between patterns and matrices via `Arc`.

use crate::comm::communicator::{CommTag, Communicator};
use crate::comm::exchange::all_gather_counts;
use crate::debug_invariants::DebugInvariants;
use crate::error::SparsityError;

const TAG_RANGE_GATHER: CommTag = CommTag(0x0011);

/// Partition metadata for one dimension of a distributed matrix or vector.
///
/// # Invariants
///
/// - `all_ranges` is a monotone prefix-sum table of owned node counts, one
///   entry per rank plus a trailing global total.
/// - Every ghost node lies inside exactly one *other* rank's owned range,
///   and `ghost_owners[i]` names that rank.
///
/// Checked after construction in debug builds and under the
/// `check-invariants` feature.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexMap {
    block_size: usize,
    rank: usize,
    /// Prefix sums of owned node counts; `all_ranges[r]..all_ranges[r+1]`
    /// is rank r's owned range.
    all_ranges: Vec<u64>,
    /// Global node ids referenced but not owned by this rank.
    ghosts: Vec<u64>,
    ghost_owners: Vec<usize>,
}

impl IndexMap {
    /// Build the map for this rank: `local_size` owned nodes, the given
    /// ghost nodes, and `block_size` elements per node.
    ///
    /// Collective: every rank in `comm` must call this with its own local
    /// size, in the same order relative to other collectives.
    ///
    /// # Errors
    /// Returns a ghost-validation error if a ghost node is out of the global
    /// range or lies inside this rank's own range, and propagates exchange
    /// failures.
    ///
    /// # Panics
    /// Panics if `block_size == 0`.
    pub fn new<C: Communicator>(
        comm: &C,
        local_size: u64,
        ghosts: Vec<u64>,
        block_size: usize,
    ) -> Result<Self, SparsityError> {
        assert!(block_size > 0, "block_size must be positive");
        let sizes = all_gather_counts(comm, TAG_RANGE_GATHER, local_size)?;
        let mut all_ranges = Vec::with_capacity(sizes.len() + 1);
        let mut acc = 0u64;
        all_ranges.push(0);
        for s in sizes {
            acc += s;
            all_ranges.push(acc);
        }

        let mut map = Self {
            block_size,
            rank: comm.rank(),
            all_ranges,
            ghost_owners: Vec::with_capacity(ghosts.len()),
            ghosts,
        };
        let (start, end) = map.local_range();
        for &g in &map.ghosts {
            if g >= start && g < end {
                return Err(SparsityError::GhostOwnedLocally { node: g });
            }
            map.ghost_owners.push(map.owner_of(g)?);
        }
        map.debug_assert_invariants();
        Ok(map)
    }

    /// Elements per node.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// This rank's id within the map's communicator group.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of ranks sharing the global space.
    #[inline]
    pub fn num_ranks(&self) -> usize {
        self.all_ranges.len() - 1
    }

    /// Owned node range `[start, end)` of this rank.
    #[inline]
    pub fn local_range(&self) -> (u64, u64) {
        self.rank_range(self.rank)
    }

    /// Owned node range `[start, end)` of an arbitrary rank.
    #[inline]
    pub fn rank_range(&self, rank: usize) -> (u64, u64) {
        (self.all_ranges[rank], self.all_ranges[rank + 1])
    }

    /// Number of nodes owned by this rank.
    #[inline]
    pub fn owned_size(&self) -> u64 {
        let (start, end) = self.local_range();
        end - start
    }

    /// Owned plus ghost node count.
    #[inline]
    pub fn ghosted_size(&self) -> u64 {
        self.owned_size() + self.ghosts.len() as u64
    }

    /// Total node count across all ranks.
    #[inline]
    pub fn global_size(&self) -> u64 {
        *self.all_ranges.last().unwrap_or(&0)
    }

    /// Ghost nodes referenced by this rank, as global node ids.
    #[inline]
    pub fn ghosts(&self) -> &[u64] {
        &self.ghosts
    }

    /// Owning rank of each ghost node, parallel to [`ghosts`](Self::ghosts).
    #[inline]
    pub fn ghost_owners(&self) -> &[usize] {
        &self.ghost_owners
    }

    /// Owning rank of a global node.
    ///
    /// # Errors
    /// Returns [`SparsityError::NodeOutOfGlobalRange`] for nodes past the end
    /// of the global space.
    pub fn owner_of(&self, node: u64) -> Result<usize, SparsityError> {
        if node >= self.global_size() {
            return Err(SparsityError::NodeOutOfGlobalRange {
                node,
                global: self.global_size(),
            });
        }
        // all_ranges is sorted; the owner is the last rank starting at or
        // before `node`.
        Ok(self.all_ranges.partition_point(|&r| r <= node) - 1)
    }

    /// Global node id of a ghosted-local node index: owned nodes first, then
    /// ghosts in registration order.
    ///
    /// # Errors
    /// Returns [`SparsityError::LocalNodeOutOfRange`] past the ghosted count.
    pub fn local_to_global(&self, node: usize) -> Result<u64, SparsityError> {
        let owned = self.owned_size() as usize;
        if node < owned {
            Ok(self.all_ranges[self.rank] + node as u64)
        } else if node - owned < self.ghosts.len() {
            Ok(self.ghosts[node - owned])
        } else {
            Err(SparsityError::LocalNodeOutOfRange {
                node,
                limit: self.ghosted_size() as usize,
            })
        }
    }
}

impl DebugInvariants for IndexMap {
    fn debug_assert_invariants(&self) {
        crate::debug_assert_ok!(self.validate_invariants(), "IndexMap invalid");
    }

    fn validate_invariants(&self) -> Result<(), SparsityError> {
        if self.all_ranges.is_empty() || self.rank >= self.num_ranks() {
            return Err(SparsityError::InvariantViolation {
                context: format!("rank {} outside range table", self.rank),
            });
        }
        if !self.all_ranges.is_sorted() {
            return Err(SparsityError::InvariantViolation {
                context: "ownership ranges must be monotone".into(),
            });
        }
        if self.ghosts.len() != self.ghost_owners.len() {
            return Err(SparsityError::InvariantViolation {
                context: "ghost/owner tables differ in length".into(),
            });
        }
        let (start, end) = self.local_range();
        for (&g, &owner) in self.ghosts.iter().zip(&self.ghost_owners) {
            if g >= start && g < end {
                return Err(SparsityError::GhostOwnedLocally { node: g });
            }
            if self.owner_of(g)? != owner {
                return Err(SparsityError::InvariantViolation {
                    context: format!("ghost {g} recorded with wrong owner {owner}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{NoComm, ThreadComm};

    #[test]
    fn serial_map_owns_everything() {
        let map = IndexMap::new(&NoComm, 6, vec![], 2).unwrap();
        assert_eq!(map.local_range(), (0, 6));
        assert_eq!(map.owned_size(), 6);
        assert_eq!(map.ghosted_size(), 6);
        assert_eq!(map.global_size(), 6);
        assert_eq!(map.block_size(), 2);
        assert_eq!(map.owner_of(5).unwrap(), 0);
        assert_eq!(map.local_to_global(3).unwrap(), 3);
    }

    #[test]
    fn local_lookup_past_ghosts_fails() {
        let map = IndexMap::new(&NoComm, 4, vec![], 1).unwrap();
        assert_eq!(
            map.local_to_global(4).unwrap_err(),
            SparsityError::LocalNodeOutOfRange { node: 4, limit: 4 }
        );
    }

    #[test]
    fn owner_past_global_range_fails() {
        let map = IndexMap::new(&NoComm, 4, vec![], 1).unwrap();
        assert_eq!(
            map.owner_of(4).unwrap_err(),
            SparsityError::NodeOutOfGlobalRange { node: 4, global: 4 }
        );
    }

    #[test]
    fn ghost_inside_own_range_is_rejected() {
        let err = IndexMap::new(&NoComm, 4, vec![2], 1).unwrap_err();
        assert_eq!(err, SparsityError::GhostOwnedLocally { node: 2 });
    }

    #[test]
    fn two_rank_partition_and_ghost_owners() {
        let handles: Vec<_> = (0..2)
            .map(|r| {
                std::thread::spawn(move || {
                    let comm = ThreadComm::new(r, 2);
                    // rank 0 owns nodes [0,2), rank 1 owns [2,5); each
                    // ghosts one node of the other.
                    let (local, ghosts) = if r == 0 { (2, vec![3]) } else { (3, vec![1]) };
                    let map = IndexMap::new(&comm, local, ghosts, 1).unwrap();
                    assert_eq!(map.global_size(), 5);
                    assert_eq!(map.rank_range(0), (0, 2));
                    assert_eq!(map.rank_range(1), (2, 5));
                    assert_eq!(map.ghost_owners(), &[1 - r]);
                    if r == 0 {
                        assert_eq!(map.local_to_global(2).unwrap(), 3);
                    } else {
                        assert_eq!(map.local_to_global(0).unwrap(), 2);
                        assert_eq!(map.local_to_global(3).unwrap(), 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn json_roundtrip() {
        let map = IndexMap::new(&NoComm, 3, vec![], 2).unwrap();
        let ser = serde_json::to_string(&map).expect("serialize");
        let de: IndexMap = serde_json::from_str(&ser).expect("deserialize");
        assert_eq!(de, map);
    }

    #[test]
    fn bincode_roundtrip() {
        let map = IndexMap::new(&NoComm, 4, vec![], 1).unwrap();
        let bytes = bincode::serialize(&map).unwrap();
        let de: IndexMap = bincode::deserialize(&bytes).unwrap();
        assert_eq!(de, map);
    }
}
