//! Multi-rank pattern behavior over the in-process communicator: ghost-row
//! routing through `apply`, and full-row semantics with a real off-diagonal
//! block. Ranks share one mailbox, so these tests are serialized.

use matrix_sparsity::prelude::*;
use serial_test::serial;
use std::sync::Arc;
use std::thread;

fn spawn_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = (0..n)
        .map(|r| {
            let f = f.clone();
            thread::spawn(move || f(r))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
#[serial]
fn ghost_row_entry_lands_on_the_owner() {
    // Rows and columns split [0,2) / [2,4). Rank 0 reaches global row 3
    // through its ghost and inserts column 0 there; after apply the entry
    // must live on rank 1's local row 1, and in the off-diagonal block
    // since column 0 is owned by rank 0.
    let results = spawn_ranks(2, |rank| {
        let comm = Arc::new(ThreadComm::new(rank, 2));
        let row_ghosts = if rank == 0 { vec![3] } else { vec![1] };
        let row_map = Arc::new(IndexMap::new(comm.as_ref(), 2, row_ghosts, 1).unwrap());
        let col_map = Arc::new(IndexMap::new(comm.as_ref(), 2, vec![], 1).unwrap());
        let mut p = SparsityPattern::new(comm, row_map, col_map);
        if rank == 0 {
            // ghosted-local row 2 is global row 3
            p.insert_local_global(&[2], &[0]).unwrap();
        }
        p.apply().unwrap();
        (
            p.diagonal_pattern(ColumnOrder::Sorted),
            p.off_diagonal_pattern(ColumnOrder::Sorted),
            p.num_nonzeros(),
        )
    });

    let (diag0, off0, nnz0) = &results[0];
    assert!(diag0.iter().all(Vec::is_empty));
    assert!(off0.iter().all(Vec::is_empty));
    assert_eq!(*nnz0, 0);

    let (diag1, off1, nnz1) = &results[1];
    assert!(diag1.iter().all(Vec::is_empty));
    assert_eq!(off1[1], vec![0]);
    assert_eq!(*nnz1, 1);
}

#[test]
#[serial]
fn finalize_matches_a_single_rank_run() {
    // Rows/cols split [0,3) / [3,6). Each rank inserts owned entries plus
    // one ghost row, including a duplicate of an entry the owner already
    // holds; the union across ranks must equal a serial run over the same
    // global insertions, with nothing lost or duplicated.
    let global_pairs: &[(u64, u64)] = &[
        (0, 0),
        (0, 4),
        (1, 0),
        (1, 4),
        (3, 3),
        (3, 1),
        (5, 3),
        (5, 1),
        (4, 2),
        (4, 5),
        (1, 0), // duplicate routed through the exchange
    ];

    let results = spawn_ranks(2, |rank| {
        let comm = Arc::new(ThreadComm::new(rank, 2));
        let row_ghosts = if rank == 0 { vec![4] } else { vec![1] };
        let row_map = Arc::new(IndexMap::new(comm.as_ref(), 3, row_ghosts, 1).unwrap());
        let col_map = Arc::new(IndexMap::new(comm.as_ref(), 3, vec![], 1).unwrap());
        let mut p = SparsityPattern::new(comm, row_map, col_map);
        if rank == 0 {
            p.insert_global(&[0, 1], &[0, 4]).unwrap();
            // ghosted-local row 3 is global row 4
            p.insert_local_global(&[3], &[2, 5]).unwrap();
        } else {
            p.insert_global(&[3, 5], &[3, 1]).unwrap();
            // ghosted-local row 3 is global row 1, duplicating (1, 0)
            p.insert_local_global(&[3], &[0]).unwrap();
        }
        p.apply().unwrap();
        (
            p.local_range(0),
            p.diagonal_pattern(ColumnOrder::Sorted),
            p.off_diagonal_pattern(ColumnOrder::Sorted),
        )
    });

    // Serial reference over the same global insertions.
    let comm = Arc::new(NoComm);
    let map = Arc::new(IndexMap::new(comm.as_ref(), 6, vec![], 1).unwrap());
    let mut reference = SparsityPattern::new(comm, map.clone(), map);
    for &(r, c) in global_pairs {
        reference.insert_global(&[r], &[c]).unwrap();
    }
    reference.apply().unwrap();
    let expected = reference.diagonal_pattern(ColumnOrder::Sorted);

    let mut nnz_union = 0;
    for ((start, end), diag, off) in &results {
        for local in 0..(end - start) as usize {
            let mut combined: Vec<u64> = diag[local].iter().chain(&off[local]).copied().collect();
            combined.sort_unstable();
            assert_eq!(combined, expected[*start as usize + local]);
            nnz_union += combined.len();
        }
    }
    assert_eq!(nnz_union, reference.num_nonzeros());
}

#[test]
#[serial]
fn local_columns_translate_through_the_map() {
    // Column map with block size 2: rank 0 owns nodes [0,2) (elements
    // [0,4)) and ghosts node 2. Ghosted-local element 4 is the first
    // component of that ghost node, global element 4, which rank 0 does not
    // own.
    let results = spawn_ranks(2, |rank| {
        let comm = Arc::new(ThreadComm::new(rank, 2));
        let row_map = Arc::new(IndexMap::new(comm.as_ref(), 2, vec![], 1).unwrap());
        let col_ghosts = if rank == 0 { vec![2] } else { vec![1] };
        let col_map = Arc::new(IndexMap::new(comm.as_ref(), 2, col_ghosts, 2).unwrap());
        let mut p = SparsityPattern::new(comm, row_map, col_map);
        if rank == 0 {
            p.insert_local(&[0], &[1, 4]).unwrap();
        }
        p.apply().unwrap();
        (
            p.diagonal_pattern(ColumnOrder::Sorted),
            p.off_diagonal_pattern(ColumnOrder::Sorted),
        )
    });

    let (diag, off) = &results[0];
    assert_eq!(diag[0], vec![1]);
    assert_eq!(off[0], vec![4]);
}

#[test]
#[serial]
fn block_rows_route_per_component() {
    // Row map with block size 2: rank 0 owns node 0 (elements [0,2)) and
    // ghosts node 1. Ghosted-local element 3 is component 1 of the ghost
    // node, so it must arrive at rank 1 as global row 3, local row 1.
    let results = spawn_ranks(2, |rank| {
        let comm = Arc::new(ThreadComm::new(rank, 2));
        let row_ghosts = if rank == 0 { vec![1] } else { vec![0] };
        let row_map = Arc::new(IndexMap::new(comm.as_ref(), 1, row_ghosts, 2).unwrap());
        let col_map = Arc::new(IndexMap::new(comm.as_ref(), 2, vec![], 1).unwrap());
        let mut p = SparsityPattern::new(comm, row_map, col_map);
        if rank == 0 {
            p.insert_local_global(&[3], &[0]).unwrap();
        }
        p.apply().unwrap();
        p.off_diagonal_pattern(ColumnOrder::Sorted)
    });

    assert!(results[0].iter().all(Vec::is_empty));
    assert_eq!(results[1], vec![vec![], vec![0]]);
}

#[test]
#[serial]
fn full_rows_split_into_owned_and_remote_columns() {
    // Columns split [0,3) / [3,6); rank 0 marks its local row 0 full. The
    // diagonal side synthesizes the owned range, the off-diagonal side the
    // complement, with zero explicit insertions.
    let results = spawn_ranks(2, |rank| {
        let comm = Arc::new(ThreadComm::new(rank, 2));
        let row_map = Arc::new(IndexMap::new(comm.as_ref(), 2, vec![], 1).unwrap());
        let col_map = Arc::new(IndexMap::new(comm.as_ref(), 3, vec![], 1).unwrap());
        let mut p = SparsityPattern::new(comm, row_map, col_map);
        if rank == 0 {
            p.insert_full_rows_local(&[0]).unwrap();
            // masked by the marker
            p.insert_global(&[0], &[1]).unwrap();
        }
        p.apply().unwrap();
        (
            p.num_nonzeros_diagonal(),
            p.num_nonzeros_off_diagonal(),
            p.diagonal_pattern(ColumnOrder::Sorted),
            p.off_diagonal_pattern(ColumnOrder::Sorted),
        )
    });

    let (diag_counts, off_counts, diag, off) = &results[0];
    assert_eq!(diag_counts[0], 3);
    assert_eq!(off_counts[0], 3);
    assert_eq!(diag[0], vec![0, 1, 2]);
    assert_eq!(off[0], vec![3, 4, 5]);
    assert_eq!(diag_counts[1] + off_counts[1], 0);

    let (diag_counts1, off_counts1, _, _) = &results[1];
    assert!(diag_counts1.iter().all(|&n| n == 0));
    assert!(off_counts1.iter().all(|&n| n == 0));
}
