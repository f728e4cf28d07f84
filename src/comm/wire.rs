//! Fixed, little-endian wire types for the finalize exchange.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn cast_slice_from<T: Pod>(v: &[u8]) -> &[T] {
    bytemuck::cast_slice(v)
}

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.
///
/// Count header exchanged in stage 1 of a variable-length collective.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A `(global row, global column)` pair, the unit of the finalize exchange.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Pod, Zeroable)]
pub struct WireEntry {
    pub row_le: u64,
    pub col_le: u64,
}

impl WireEntry {
    pub fn new(row: u64, col: u64) -> Self {
        Self {
            row_le: row.to_le(),
            col_le: col.to_le(),
        }
    }
    pub fn row(&self) -> u64 {
        u64::from_le(self.row_le)
    }
    pub fn col(&self) -> u64 {
        u64::from_le(self.col_le)
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    // Pod/Zeroable ensures no padding contains uninit when cast to bytes.
    assert!(size_of::<WireCount>() == 8);
    assert!(size_of::<WireEntry>() == 16);
    assert!(align_of::<WireEntry>() == 8);
};
