//! Ownership-range and ghost-resolution behavior across three ranks.

use matrix_sparsity::prelude::*;
use serial_test::serial;
use std::thread;

#[test]
#[serial]
fn three_rank_partition_resolves_ghost_owners() {
    // Owned node counts 2, 3, 1: ranges [0,2), [2,5), [5,6).
    let handles: Vec<_> = (0..3)
        .map(|rank| {
            thread::spawn(move || {
                let comm = ThreadComm::new(rank, 3);
                let (local, ghosts) = match rank {
                    0 => (2, vec![2, 5]),
                    1 => (3, vec![1]),
                    _ => (1, vec![4, 0]),
                };
                let map = IndexMap::new(&comm, local, ghosts, 2).unwrap();
                assert_eq!(map.global_size(), 6);
                assert_eq!(map.rank_range(0), (0, 2));
                assert_eq!(map.rank_range(1), (2, 5));
                assert_eq!(map.rank_range(2), (5, 6));
                match rank {
                    0 => {
                        assert_eq!(map.ghost_owners(), &[1, 2]);
                        assert_eq!(map.ghosted_size(), 4);
                        assert_eq!(map.local_to_global(2).unwrap(), 2);
                        assert_eq!(map.local_to_global(3).unwrap(), 5);
                    }
                    1 => {
                        assert_eq!(map.ghost_owners(), &[0]);
                        assert_eq!(map.local_to_global(0).unwrap(), 2);
                    }
                    _ => {
                        assert_eq!(map.ghost_owners(), &[1, 0]);
                        assert_eq!(map.owner_of(3).unwrap(), 1);
                    }
                }
                map.validate_invariants().unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
