//! Sparsity-pattern storage, insertion, finalize, and block composition.

pub mod merge;
pub mod set;
pub mod sparsity_pattern;

pub use set::ColumnSet;
pub use sparsity_pattern::{ColumnOrder, PatternStatistics, SparsityPattern};
