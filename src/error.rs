//! SparsityError: unified error type for matrix-sparsity public APIs
//!
//! Every fallible operation in this crate reports through this type. All
//! variants describe either a caller-contract violation (bad index, merging
//! an unfinalized block) or a cross-rank consistency violation detected
//! during the finalize exchange. Neither kind is retryable.

use thiserror::Error;

/// Unified error type for matrix-sparsity operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SparsityError {
    /// A row index exceeds the pattern's row storage.
    #[error("row index {index} out of range ({rows} local rows)")]
    RowIndexOutOfRange { index: u64, rows: u64 },
    /// A global row passed to `insert_global` is not owned by this rank.
    #[error("global row {index} outside this rank's owned range [{start}, {end})")]
    OwnedRowOutOfRange { index: u64, start: u64, end: u64 },
    /// A full-row marker exceeds the ghosted row count.
    #[error("full row {index} out of range ({limit} ghosted rows)")]
    FullRowOutOfRange { index: u64, limit: u64 },
    /// A local node index has no owned or ghost entry in the index map.
    #[error("local node {node} out of range ({limit} ghosted nodes)")]
    LocalNodeOutOfRange { node: usize, limit: usize },
    /// A global node index falls outside the global index space.
    #[error("global node {node} outside the global range of {global} nodes")]
    NodeOutOfGlobalRange { node: u64, global: u64 },
    /// A ghost node registered at construction is owned by this rank itself.
    #[error("ghost node {node} lies inside this rank's owned range")]
    GhostOwnedLocally { node: u64 },
    /// The finalize exchange delivered an entry whose row this rank does not
    /// own. Indicates an index-map/ghost-owner inconsistency across ranks.
    #[error(
        "received illegal sparsity pattern entry for row {index}, not in range [{start}, {end})"
    )]
    NonLocalEntryOutOfRange { index: u64, start: u64, end: u64 },
    /// A sub-pattern handed to the block composer still has buffered
    /// non-local entries.
    #[error("sub-pattern ({row}, {col}) has not been finalised (apply must be called)")]
    UnfinalizedBlock { row: usize, col: usize },
    /// A sub-pattern's index map disagrees with its block row/column.
    #[error("sub-pattern ({row}, {col}) does not share the block index map for dim {dim}")]
    BlockIndexMapMismatch { row: usize, col: usize, dim: usize },
    /// The block composer was given an empty grid.
    #[error("block grid is empty")]
    EmptyBlockGrid,
    /// The block composer was given a non-rectangular grid.
    #[error("block grid row {row} has a different number of columns")]
    RaggedBlockGrid { row: usize },
    /// A point-to-point exchange with a neighbor rank failed.
    #[error("communication error with rank {neighbor}: {detail}")]
    CommError { neighbor: usize, detail: String },
    /// An internal structural invariant does not hold.
    #[error("invariant violated: {context}")]
    InvariantViolation { context: String },
}
