//! Distributed sparsity pattern: which entries of a sparse matrix will be
//! structurally nonzero, decided before any numeric assembly.
//!
//! Rows are stored in local element indices relative to this rank's owned
//! row range; columns are always stored as global element indices, split per
//! row into a *diagonal* set (columns this rank owns) and an *off-diagonal*
//! set (columns owned elsewhere). Entries whose row is reached through a
//! ghost are staged in a non-local buffer and routed to their owning rank by
//! [`apply`](SparsityPattern::apply), the one collective step.
//!
//! Insertions take a row sequence and a column sequence and treat them as a
//! dense cross product of candidate nonzeros, which matches how element
//! matrices touch a set of row and column degrees of freedom at once.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::comm::communicator::{CommTag, Communicator};
use crate::comm::exchange::all_to_allv;
use crate::comm::wire::WireEntry;
use crate::debug_invariants::DebugInvariants;
use crate::error::SparsityError;
use crate::index_map::IndexMap;
use crate::pattern::set::ColumnSet;

const TAG_APPLY: CommTag = CommTag(0x0021);

/// Output ordering for [`SparsityPattern::diagonal_pattern`] and
/// [`SparsityPattern::off_diagonal_pattern`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColumnOrder {
    Sorted,
    Unsorted,
}

/// The closed set of index conventions accepted by the insertion entry
/// points. Each variant fixes how a raw row/column index is mapped before
/// classification.
#[derive(Copy, Clone, Debug)]
enum EntryMapping {
    /// Rows global (must be owned here), columns global.
    Global,
    /// Rows ghosted-local, columns ghosted-local.
    Local,
    /// Rows ghosted-local, columns global.
    LocalGlobal,
}

impl EntryMapping {
    /// Map a raw row index to local element space.
    fn map_row(self, i: u64, rows: &IndexMap) -> Result<u64, SparsityError> {
        match self {
            EntryMapping::Global => {
                let bs = rows.block_size() as u64;
                let (start, end) = rows.local_range();
                let (start, end) = (bs * start, bs * end);
                if i < start || i >= end {
                    return Err(SparsityError::OwnedRowOutOfRange { index: i, start, end });
                }
                Ok(i - start)
            }
            EntryMapping::Local | EntryMapping::LocalGlobal => Ok(i),
        }
    }

    /// Map a raw column index to global element space.
    fn map_col(self, j: u64, cols: &IndexMap) -> Result<u64, SparsityError> {
        match self {
            EntryMapping::Local => {
                let bs = cols.block_size() as u64;
                let node = (j / bs) as usize;
                let component = j % bs;
                Ok(cols.local_to_global(node)? * bs + component)
            }
            EntryMapping::Global | EntryMapping::LocalGlobal => Ok(j),
        }
    }
}

/// Sparsity pattern of a distributed sparse matrix.
///
/// Lifecycle: construct bound to a row and a column [`IndexMap`], insert
/// entries (and optionally mark full rows), call [`apply`](Self::apply) once
/// on every rank, then read counts and per-row column sets. Block patterns
/// are composed from finalized sub-patterns with
/// [`from_blocks`](Self::from_blocks).
///
/// # Example
/// ```
/// use matrix_sparsity::comm::NoComm;
/// use matrix_sparsity::index_map::IndexMap;
/// use matrix_sparsity::pattern::{ColumnOrder, SparsityPattern};
/// use std::sync::Arc;
/// # fn main() -> Result<(), matrix_sparsity::error::SparsityError> {
/// let comm = Arc::new(NoComm);
/// let map = Arc::new(IndexMap::new(comm.as_ref(), 3, vec![], 1)?);
/// let mut p = SparsityPattern::new(comm, map.clone(), map);
/// p.insert_global(&[0, 1], &[0, 2])?;
/// p.apply()?;
/// assert_eq!(p.num_nonzeros(), 4);
/// assert_eq!(p.diagonal_pattern(ColumnOrder::Sorted)[0], vec![0, 2]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SparsityPattern<C: Communicator> {
    pub(crate) comm: Arc<C>,
    /// Row space and column space.
    pub(crate) index_maps: [Arc<IndexMap>; 2],
    /// Per owned row: columns owned by this rank.
    pub(crate) diagonal: Vec<ColumnSet>,
    /// Per owned row: columns owned by other ranks.
    pub(crate) off_diagonal: Vec<ColumnSet>,
    /// Rows dense across the whole global column range, kept sparse.
    pub(crate) full_rows: BTreeSet<usize>,
    /// Staged `(ghosted-local row, global column)` pairs awaiting `apply`.
    pub(crate) non_local: Vec<(usize, u64)>,
}

impl<C: Communicator> SparsityPattern<C> {
    /// Fresh, empty pattern bound to a row and a column index map.
    pub fn new(comm: Arc<C>, row_map: Arc<IndexMap>, col_map: Arc<IndexMap>) -> Self {
        let local_size0 = row_map.block_size() * row_map.owned_size() as usize;
        Self {
            comm,
            index_maps: [row_map, col_map],
            diagonal: vec![ColumnSet::default(); local_size0],
            off_diagonal: vec![ColumnSet::default(); local_size0],
            full_rows: BTreeSet::new(),
            non_local: Vec::new(),
        }
    }

    /// Insert the cross product of `rows` x `cols`, both in global element
    /// indices. Every row must be owned by this rank.
    ///
    /// # Errors
    /// [`SparsityError::OwnedRowOutOfRange`] for rows outside the owned
    /// range; [`SparsityError::RowIndexOutOfRange`] in single-rank runs.
    pub fn insert_global(&mut self, rows: &[u64], cols: &[u64]) -> Result<(), SparsityError> {
        self.insert_entries(rows, cols, EntryMapping::Global)
    }

    /// Insert the cross product of `rows` x `cols`; rows are local element
    /// indices, columns are ghosted-local element indices translated through
    /// the column map.
    pub fn insert_local(&mut self, rows: &[u64], cols: &[u64]) -> Result<(), SparsityError> {
        self.insert_entries(rows, cols, EntryMapping::Local)
    }

    /// Insert the cross product of `rows` x `cols`; rows are local element
    /// indices, columns are already global.
    pub fn insert_local_global(&mut self, rows: &[u64], cols: &[u64]) -> Result<(), SparsityError> {
        self.insert_entries(rows, cols, EntryMapping::LocalGlobal)
    }

    fn insert_entries(
        &mut self,
        rows: &[u64],
        cols: &[u64],
        mapping: EntryMapping,
    ) -> Result<(), SparsityError> {
        let map0 = Arc::clone(&self.index_maps[0]);
        let map1 = Arc::clone(&self.index_maps[1]);
        let bs0 = map0.block_size() as u64;
        let bs1 = map1.block_size() as u64;
        let local_size0 = self.diagonal.len() as u64;
        let (col_start, col_end) = {
            let (s, e) = map1.local_range();
            (bs1 * s, bs1 * e)
        };

        if self.comm.size() == 1 {
            // Sequential mode: local and global coincide, so classification
            // reduces to a plain diagonal insert.
            for &i in rows {
                if i >= local_size0 {
                    return Err(SparsityError::RowIndexOutOfRange {
                        index: i,
                        rows: local_size0,
                    });
                }
                if self.full_rows.contains(&(i as usize)) {
                    continue;
                }
                for &j in cols {
                    self.diagonal[i as usize].insert(j);
                }
            }
            return Ok(());
        }

        let ghosted_size0 = bs0 * map0.ghosted_size();
        for &i in rows {
            let mapped = mapping.map_row(i, &map0)?;
            // Full rows are stored separately.
            if self.full_rows.contains(&(mapped as usize)) {
                continue;
            }
            if mapped < local_size0 {
                // Owned row: classify each column against the owned column
                // range.
                let row = mapped as usize;
                for &j in cols {
                    let col = mapping.map_col(j, &map1)?;
                    if col >= col_start && col < col_end {
                        self.diagonal[row].insert(col);
                    } else {
                        self.off_diagonal[row].insert(col);
                    }
                }
            } else if mapped < ghosted_size0 {
                // Row owned elsewhere, reached via a ghost: stage for apply.
                let row = mapped as usize;
                for &j in cols {
                    let col = mapping.map_col(j, &map1)?;
                    self.non_local.push((row, col));
                }
            } else {
                return Err(SparsityError::RowIndexOutOfRange {
                    index: i,
                    rows: ghosted_size0,
                });
            }
        }
        self.debug_assert_invariants();
        Ok(())
    }

    /// Mark local rows as dense across the entire global column range.
    ///
    /// Marking is retroactive and prospective: later insertions into a
    /// marked row are skipped, and count/enumeration queries synthesize the
    /// full column range instead of reading the explicit sets. Rows are
    /// expected to be marked before any entries are inserted into them.
    ///
    /// # Errors
    /// [`SparsityError::FullRowOutOfRange`] past the ghosted row count.
    pub fn insert_full_rows_local(&mut self, rows: &[u64]) -> Result<(), SparsityError> {
        let map0 = &self.index_maps[0];
        let ghosted_size0 = map0.block_size() as u64 * map0.ghosted_size();
        for &i in rows {
            if i >= ghosted_size0 {
                return Err(SparsityError::FullRowOutOfRange {
                    index: i,
                    limit: ghosted_size0,
                });
            }
            self.full_rows.insert(i as usize);
        }
        Ok(())
    }

    /// Finalize the pattern: route every staged non-local entry to its
    /// owning rank in one all-to-all exchange and classify what arrives.
    ///
    /// Collective; every rank must call this exactly once, after all
    /// insertions and before any read. A second call is a no-op since the
    /// buffer is already empty.
    ///
    /// # Errors
    /// [`SparsityError::NonLocalEntryOutOfRange`] if an inbound entry's row
    /// is not owned here, which signals an index-map/ghost inconsistency
    /// across ranks; exchange failures propagate as
    /// [`SparsityError::CommError`].
    pub fn apply(&mut self) -> Result<(), SparsityError> {
        let map0 = Arc::clone(&self.index_maps[0]);
        let map1 = Arc::clone(&self.index_maps[1]);
        let bs0 = map0.block_size();
        let bs1 = map1.block_size() as u64;
        let local_size0 = self.diagonal.len();
        let (row_start, row_end) = {
            let (s, e) = map0.local_range();
            (bs0 as u64 * s, bs0 as u64 * e)
        };
        let (col_start, col_end) = {
            let (s, e) = map1.local_range();
            (bs1 * s, bs1 * e)
        };

        log::debug!("sparsity pattern before finalize: {}", self.statistics());

        if self.comm.size() > 1 {
            // Route each staged entry to the rank owning its ghost row.
            let ghosts = map0.ghosts();
            let owners = map0.ghost_owners();
            let mut outgoing: Vec<Vec<WireEntry>> = vec![Vec::new(); self.comm.size()];
            for &(row, col) in &self.non_local {
                let offset = row - local_size0;
                let node = offset / bs0;
                let component = (offset % bs0) as u64;
                let owner = owners[node];
                debug_assert_ne!(owner, self.comm.rank());
                let global_row = bs0 as u64 * ghosts[node] + component;
                outgoing[owner].push(WireEntry::new(global_row, col));
            }

            let inbound = all_to_allv(self.comm.as_ref(), TAG_APPLY, &outgoing)?;

            for entry in &inbound {
                let (row, col) = (entry.row(), entry.col());
                if row < row_start || row >= row_end {
                    return Err(SparsityError::NonLocalEntryOutOfRange {
                        index: row,
                        start: row_start,
                        end: row_end,
                    });
                }
                let local = (row - row_start) as usize;
                // Rows marked full stay implicit; everything else lands in
                // the diagonal or off-diagonal set.
                if self.full_rows.contains(&local) {
                    continue;
                }
                if col >= col_start && col < col_end {
                    self.diagonal[local].insert(col);
                } else {
                    self.off_diagonal[local].insert(col);
                }
            }
        }

        self.non_local.clear();
        self.debug_assert_invariants();
        Ok(())
    }

    /// Owned element range `[start, end)` for dimension 0 (rows) or 1
    /// (columns).
    ///
    /// # Panics
    /// Panics if `dim > 1`.
    pub fn local_range(&self, dim: usize) -> (u64, u64) {
        assert!(dim < 2, "dim must be 0 or 1");
        let map = &self.index_maps[dim];
        let bs = map.block_size() as u64;
        let (s, e) = map.local_range();
        (bs * s, bs * e)
    }

    /// Index map for dimension 0 (rows) or 1 (columns).
    ///
    /// # Panics
    /// Panics if `dim > 1`.
    pub fn index_map(&self, dim: usize) -> &Arc<IndexMap> {
        assert!(dim < 2, "dim must be 0 or 1");
        &self.index_maps[dim]
    }

    /// Total nonzeros on this rank, full rows contributing the entire global
    /// column width.
    pub fn num_nonzeros(&self) -> usize {
        let mut nz: usize = self.diagonal.iter().map(ColumnSet::len).sum();
        nz += self.off_diagonal.iter().map(ColumnSet::len).sum::<usize>();

        let map1 = &self.index_maps[1];
        let ncols = map1.block_size() * map1.global_size() as usize;
        nz += self.owned_full_rows().count() * ncols;
        nz
    }

    /// Per-row nonzero counts in the diagonal block; full rows count the
    /// whole owned column range.
    pub fn num_nonzeros_diagonal(&self) -> Vec<usize> {
        let mut counts: Vec<usize> = self.diagonal.iter().map(ColumnSet::len).collect();
        let map1 = &self.index_maps[1];
        let owned_cols = map1.block_size() * map1.owned_size() as usize;
        for row in self.owned_full_rows() {
            counts[row] = owned_cols;
        }
        counts
    }

    /// Per-row nonzero counts in the off-diagonal block; full rows count the
    /// complement of the owned column range.
    pub fn num_nonzeros_off_diagonal(&self) -> Vec<usize> {
        let mut counts: Vec<usize> = self.off_diagonal.iter().map(ColumnSet::len).collect();
        let map1 = &self.index_maps[1];
        let unowned_cols =
            map1.block_size() * (map1.global_size() - map1.owned_size()) as usize;
        for row in self.owned_full_rows() {
            counts[row] = unowned_cols;
        }
        counts
    }

    /// Per-row totals across both blocks.
    pub fn num_local_nonzeros(&self) -> Vec<usize> {
        let mut counts = self.num_nonzeros_diagonal();
        for (total, off) in counts.iter_mut().zip(self.num_nonzeros_off_diagonal()) {
            *total += off;
        }
        counts
    }

    /// Materialize each row's diagonal columns; full rows synthesize the
    /// entire owned column range, ascending.
    pub fn diagonal_pattern(&self, order: ColumnOrder) -> Vec<Vec<u64>> {
        let mut rows: Vec<Vec<u64>> = match order {
            ColumnOrder::Sorted => self.diagonal.iter().map(ColumnSet::sorted).collect(),
            ColumnOrder::Unsorted => {
                self.diagonal.iter().map(|s| s.as_slice().to_vec()).collect()
            }
        };
        let (col_start, col_end) = self.local_range(1);
        for row in self.owned_full_rows() {
            debug_assert!(rows[row].is_empty());
            rows[row] = (col_start..col_end).collect();
        }
        rows
    }

    /// Materialize each row's off-diagonal columns; full rows synthesize the
    /// complement of the owned column range, ascending.
    pub fn off_diagonal_pattern(&self, order: ColumnOrder) -> Vec<Vec<u64>> {
        let mut rows: Vec<Vec<u64>> = match order {
            ColumnOrder::Sorted => self.off_diagonal.iter().map(ColumnSet::sorted).collect(),
            ColumnOrder::Unsorted => self
                .off_diagonal
                .iter()
                .map(|s| s.as_slice().to_vec())
                .collect(),
        };
        let (col_start, col_end) = self.local_range(1);
        let map1 = &self.index_maps[1];
        let ncols = map1.block_size() as u64 * map1.global_size();
        for row in self.owned_full_rows() {
            debug_assert!(rows[row].is_empty());
            rows[row] = (0..col_start).chain(col_end..ncols).collect();
        }
        rows
    }

    /// Aggregate counts for diagnostics; no stability contract on the
    /// `Display` format.
    pub fn statistics(&self) -> PatternStatistics {
        let map0 = &self.index_maps[0];
        let map1 = &self.index_maps[1];
        PatternStatistics {
            global_rows: map0.block_size() as u64 * map0.global_size(),
            global_cols: map1.block_size() as u64 * map1.global_size(),
            num_diagonal: self.diagonal.iter().map(ColumnSet::len).sum(),
            num_off_diagonal: self.off_diagonal.iter().map(ColumnSet::len).sum(),
            num_non_local: self.non_local.len(),
        }
    }

    /// Full rows that this rank owns (markers may also name ghost rows).
    fn owned_full_rows(&self) -> impl Iterator<Item = usize> + '_ {
        let local_size0 = self.diagonal.len();
        self.full_rows.iter().copied().filter(move |&r| r < local_size0)
    }
}

impl<C: Communicator> fmt::Display for SparsityPattern<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diag) in self.diagonal.iter().enumerate() {
            write!(f, "Row {i}:")?;
            if !diag.is_empty() {
                write!(f, " {}", diag.iter().format(" "))?;
            }
            if !self.off_diagonal[i].is_empty() {
                write!(f, " {}", self.off_diagonal[i].iter().format(" "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl<C: Communicator> DebugInvariants for SparsityPattern<C> {
    fn debug_assert_invariants(&self) {
        crate::debug_assert_ok!(self.validate_invariants(), "SparsityPattern invalid");
    }

    fn validate_invariants(&self) -> Result<(), SparsityError> {
        let map0 = &self.index_maps[0];
        let map1 = &self.index_maps[1];
        let local_size0 = map0.block_size() * map0.owned_size() as usize;
        if self.diagonal.len() != local_size0 || self.off_diagonal.len() != local_size0 {
            return Err(SparsityError::InvariantViolation {
                context: format!(
                    "row storage {}x{} disagrees with owned row count {local_size0}",
                    self.diagonal.len(),
                    self.off_diagonal.len()
                ),
            });
        }
        let bs1 = map1.block_size() as u64;
        let (col_start, col_end) = {
            let (s, e) = map1.local_range();
            (bs1 * s, bs1 * e)
        };
        let ncols = bs1 * map1.global_size();
        // In sequential mode no classification happens; the owned column
        // range covers everything anyway.
        for (row, set) in self.diagonal.iter().enumerate() {
            for &col in set.iter() {
                if col >= ncols {
                    return Err(SparsityError::InvariantViolation {
                        context: format!("diagonal ({row}, {col}) beyond {ncols} columns"),
                    });
                }
            }
        }
        for (row, set) in self.off_diagonal.iter().enumerate() {
            for &col in set.iter() {
                if col >= ncols || (col >= col_start && col < col_end) {
                    return Err(SparsityError::InvariantViolation {
                        context: format!("off-diagonal ({row}, {col}) misclassified"),
                    });
                }
            }
        }
        let ghosted_size0 = map0.block_size() as u64 * map0.ghosted_size();
        for &row in &self.full_rows {
            if row as u64 >= ghosted_size0 {
                return Err(SparsityError::FullRowOutOfRange {
                    index: row as u64,
                    limit: ghosted_size0,
                });
            }
            if row < local_size0
                && (!self.diagonal[row].is_empty() || !self.off_diagonal[row].is_empty())
            {
                return Err(SparsityError::InvariantViolation {
                    context: format!("full row {row} has explicit entries"),
                });
            }
        }
        for &(row, _) in &self.non_local {
            if row < local_size0 || row as u64 >= ghosted_size0 {
                return Err(SparsityError::InvariantViolation {
                    context: format!("staged entry row {row} outside ghost region"),
                });
            }
        }
        Ok(())
    }
}

/// Nonzero totals of one rank's pattern, for logging and diagnostics.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PatternStatistics {
    pub global_rows: u64,
    pub global_cols: u64,
    pub num_diagonal: usize,
    pub num_off_diagonal: usize,
    pub num_non_local: usize,
}

impl PatternStatistics {
    pub fn total(&self) -> usize {
        self.num_diagonal + self.num_off_diagonal + self.num_non_local
    }
}

impl fmt::Display for PatternStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells = self.global_rows.saturating_mul(self.global_cols);
        let fill = if cells == 0 {
            0.0
        } else {
            100.0 * self.total() as f64 / cells as f64
        };
        write!(
            f,
            "Matrix of size {} x {} has {} ({fill:.3}%) nonzero entries.",
            self.global_rows,
            self.global_cols,
            self.total()
        )?;
        if self.total() != self.num_diagonal && self.total() > 0 {
            let pct = |n: usize| 100.0 * n as f64 / self.total() as f64;
            write!(
                f,
                " Diagonal: {} ({:.1}%), off-diagonal: {} ({:.1}%), non-local: {} ({:.1}%)",
                self.num_diagonal,
                pct(self.num_diagonal),
                self.num_off_diagonal,
                pct(self.num_off_diagonal),
                self.num_non_local,
                pct(self.num_non_local),
            )?;
        }
        Ok(())
    }
}
