//! Block composition: merge a rectangular grid of finalized sub-patterns
//! into one pattern describing the row-major block concatenation, the way a
//! block matrix is assembled from submatrices.
//!
//! The composer only reads the sub-patterns; ownership stays with the
//! caller. Column indices are re-based from each sub-pattern's column space
//! into the merged numbering through the per-block-column index maps, so the
//! result is correct for distributed sub-patterns whose owned chunks
//! interleave across ranks.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::comm::communicator::Communicator;
use crate::debug_invariants::DebugInvariants;
use crate::error::SparsityError;
use crate::index_map::IndexMap;
use crate::pattern::set::ColumnSet;
use crate::pattern::sparsity_pattern::SparsityPattern;

/// Global element index of column `col` of block-column `field`, in the
/// merged numbering: the owner rank keeps its chunks of all block columns
/// adjacent, ordered by block column, and ranks are laid out ascending.
fn merged_global_index(
    cmaps: &[&IndexMap],
    field: usize,
    col: u64,
) -> Result<u64, SparsityError> {
    let map = cmaps[field];
    let bs = map.block_size() as u64;
    let owner = map.owner_of(col / bs)?;

    // Position inside the owner's chunk of this block column.
    let mut merged = col - bs * map.rank_range(owner).0;
    for (f, m) in cmaps.iter().enumerate() {
        let mbs = m.block_size() as u64;
        let (start, end) = m.rank_range(owner);
        // Elements every block column contributes below the owner rank.
        merged += mbs * start;
        // Chunks of preceding block columns on the owner rank itself.
        if f < field {
            merged += mbs * (end - start);
        }
    }
    Ok(merged)
}

impl<C: Communicator> SparsityPattern<C> {
    /// Compose a rectangular grid of finalized sub-patterns into one
    /// pattern, re-basing rows by cumulative block-row offsets and columns
    /// through the block-column index maps.
    ///
    /// Collective when `comm` spans more than one rank: fresh index maps for
    /// the merged pattern are constructed with block size 1, the summed
    /// local element sizes, and empty ghost lists.
    ///
    /// # Errors
    /// - [`SparsityError::EmptyBlockGrid`] / [`SparsityError::RaggedBlockGrid`]
    ///   for a malformed grid;
    /// - [`SparsityError::UnfinalizedBlock`] if any sub-pattern still holds
    ///   buffered non-local entries;
    /// - [`SparsityError::BlockIndexMapMismatch`] if the patterns of a block
    ///   row (column) disagree on the row (column) index map.
    pub fn from_blocks(
        comm: Arc<C>,
        blocks: &[Vec<&SparsityPattern<C>>],
    ) -> Result<Self, SparsityError> {
        if blocks.is_empty() || blocks[0].is_empty() {
            return Err(SparsityError::EmptyBlockGrid);
        }
        let num_block_cols = blocks[0].len();
        for (r, row) in blocks.iter().enumerate() {
            if row.len() != num_block_cols {
                return Err(SparsityError::RaggedBlockGrid { row: r });
            }
        }
        for (r, row) in blocks.iter().enumerate() {
            for (c, p) in row.iter().enumerate() {
                if !p.non_local.is_empty() {
                    return Err(SparsityError::UnfinalizedBlock { row: r, col: c });
                }
                if p.index_maps[0] != row[0].index_maps[0] {
                    return Err(SparsityError::BlockIndexMapMismatch { row: r, col: c, dim: 0 });
                }
                if p.index_maps[1] != blocks[0][c].index_maps[1] {
                    return Err(SparsityError::BlockIndexMapMismatch { row: r, col: c, dim: 1 });
                }
            }
        }

        let cmaps: Vec<&IndexMap> = blocks[0]
            .iter()
            .map(|p| p.index_maps[1].as_ref())
            .collect();

        // Summed local element sizes for the fresh merged maps.
        let row_local_size: u64 = blocks
            .iter()
            .map(|row| {
                let m = &row[0].index_maps[0];
                m.block_size() as u64 * m.owned_size()
            })
            .sum();
        let col_local_size: u64 = cmaps
            .iter()
            .map(|m| m.block_size() as u64 * m.owned_size())
            .sum();

        let mut diagonal: Vec<ColumnSet> = Vec::with_capacity(row_local_size as usize);
        let mut off_diagonal: Vec<ColumnSet> = Vec::with_capacity(row_local_size as usize);

        let mut row_local_offset = 0usize;
        for row in blocks {
            let row_map = &row[0].index_maps[0];
            let row_size = row_map.block_size() * row_map.owned_size() as usize;
            diagonal.resize_with(diagonal.len() + row_size, ColumnSet::default);
            off_diagonal.resize_with(off_diagonal.len() + row_size, ColumnSet::default);

            for (c, p) in row.iter().enumerate() {
                crate::debug_assert_ok!(
                    check_block_height(p, row_size),
                    "sub-pattern storage height"
                );
                for k in 0..p.diagonal.len() {
                    for &col in p.diagonal[k].iter() {
                        let merged = merged_global_index(&cmaps, c, col)?;
                        diagonal[row_local_offset + k].insert(merged);
                    }
                    for &col in p.off_diagonal[k].iter() {
                        let merged = merged_global_index(&cmaps, c, col)?;
                        off_diagonal[row_local_offset + k].insert(merged);
                    }
                }
            }
            row_local_offset += row_size;
        }

        // Merged maps carry no ghost structure; see DESIGN.md.
        let merged_rows = IndexMap::new(comm.as_ref(), row_local_size, vec![], 1)?;
        let merged_cols = IndexMap::new(comm.as_ref(), col_local_size, vec![], 1)?;

        let merged = Self {
            comm,
            index_maps: [Arc::new(merged_rows), Arc::new(merged_cols)],
            diagonal,
            off_diagonal,
            full_rows: BTreeSet::new(),
            non_local: Vec::new(),
        };
        merged.debug_assert_invariants();
        Ok(merged)
    }
}

fn check_block_height<C: Communicator>(
    p: &SparsityPattern<C>,
    expected: usize,
) -> Result<(), SparsityError> {
    if p.diagonal.len() == expected {
        Ok(())
    } else {
        Err(SparsityError::InvariantViolation {
            context: format!(
                "sub-pattern has {} rows, its index map reports {expected}",
                p.diagonal.len()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::NoComm;

    fn pattern(rows: u64, cols: u64) -> SparsityPattern<NoComm> {
        let comm = Arc::new(NoComm);
        let row_map = Arc::new(IndexMap::new(comm.as_ref(), rows, vec![], 1).unwrap());
        let col_map = Arc::new(IndexMap::new(comm.as_ref(), cols, vec![], 1).unwrap());
        SparsityPattern::new(comm, row_map, col_map)
    }

    #[test]
    fn merged_index_is_cumulative_in_serial() {
        let comm = NoComm;
        let m1 = IndexMap::new(&comm, 3, vec![], 1).unwrap();
        let m2 = IndexMap::new(&comm, 4, vec![], 1).unwrap();
        let cmaps = vec![&m1, &m2];
        assert_eq!(merged_global_index(&cmaps, 0, 2).unwrap(), 2);
        assert_eq!(merged_global_index(&cmaps, 1, 0).unwrap(), 3);
        assert_eq!(merged_global_index(&cmaps, 1, 3).unwrap(), 6);
    }

    #[test]
    fn empty_grid_is_rejected() {
        let err =
            SparsityPattern::<NoComm>::from_blocks(Arc::new(NoComm), &[]).unwrap_err();
        assert_eq!(err, SparsityError::EmptyBlockGrid);
    }

    #[test]
    fn ragged_grid_is_rejected() {
        let a = pattern(2, 2);
        let b = pattern(2, 3);
        let grid = vec![vec![&a, &b], vec![&a]];
        let err = SparsityPattern::from_blocks(Arc::new(NoComm), &grid).unwrap_err();
        assert_eq!(err, SparsityError::RaggedBlockGrid { row: 1 });
    }

    #[test]
    fn unfinalized_block_is_rejected() {
        // Stage a non-local entry by hand; serial runs never buffer.
        let mut a = pattern(2, 2);
        a.non_local.push((2, 0));
        let grid = vec![vec![&a]];
        let err = SparsityPattern::from_blocks(Arc::new(NoComm), &grid).unwrap_err();
        assert_eq!(err, SparsityError::UnfinalizedBlock { row: 0, col: 0 });
    }

    #[test]
    fn mismatched_row_map_is_rejected() {
        let a = pattern(2, 2);
        let b = pattern(3, 3);
        let grid = vec![vec![&a, &b]];
        let err = SparsityPattern::from_blocks(Arc::new(NoComm), &grid).unwrap_err();
        assert_eq!(
            err,
            SparsityError::BlockIndexMapMismatch { row: 0, col: 1, dim: 0 }
        );
    }
}
