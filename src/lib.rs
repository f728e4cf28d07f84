#![cfg_attr(docsrs, feature(doc_cfg))]
//! # matrix-sparsity
//!
//! matrix-sparsity is a Rust library for building the sparsity pattern of a
//! distributed sparse matrix before numeric assembly, designed for
//! scientific computing and PDE codes. Each rank classifies inserted
//! (row, column) entries as locally owned diagonal, locally owned
//! off-diagonal, or owned by a remote rank; remote entries are staged and
//! routed in a single collective finalize step. Finished patterns can be
//! concatenated into block patterns and queried for per-row nonzero counts,
//! which is what linear-algebra backends need for preallocation.
//!
//! ## Features
//! - Diagonal/off-diagonal split per owned row, with compact full-row markers
//! - One-shot all-to-all finalize with deterministic, rank-ordered results
//! - Block composition of finalized sub-patterns with column re-basing
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Determinism
//!
//! Per-row column sets are unordered at storage time and sorted on demand,
//! so reported patterns do not depend on insertion order or on message
//! arrival order during finalize.
//!
//! ## Usage
//! Add `matrix-sparsity` as a dependency in your `Cargo.toml` and enable
//! features as needed:
//!
//! ```toml
//! [dependencies]
//! matrix-sparsity = "0.4"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```

// Re-export our major subsystems:
pub mod comm;
pub mod debug_invariants;
pub mod error;
pub mod index_map;
pub mod pattern;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::communicator::MpiComm;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::error::SparsityError;
    pub use crate::index_map::IndexMap;
    pub use crate::pattern::{ColumnOrder, ColumnSet, PatternStatistics, SparsityPattern};
}
