//! Integration tests for the thread-safe containers
//!
//! Threads insert disjoint key ranges, meet at a barrier, then verify the
//! combined contents.

use std::sync::Barrier;

use crossbeam_utils::thread;
use tessera_structures::{DenseMap, SharedSparseMap};

const THREADS: u32 = 8;
const KEYS_PER_THREAD: u32 = 500;

#[test]
fn test_disjoint_inserts() {
    let map: DenseMap<u32, u32> = DenseMap::new();
    let barrier = Barrier::new(THREADS as usize);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let map = &map;
            let barrier = &barrier;
            scope.spawn(move |_| {
                let start = t * KEYS_PER_THREAD;
                for key in start..start + KEYS_PER_THREAD {
                    assert!(map.emplace(key, key * 2).expect("allocation failed"));
                }
                barrier.wait();

                // Every other thread's keys are visible after the barrier
                assert_eq!(map.len(), (THREADS * KEYS_PER_THREAD) as usize);
            });
        }
    })
    .expect("worker thread panicked");

    assert_eq!(map.len(), (THREADS * KEYS_PER_THREAD) as usize);
    for key in 0..THREADS * KEYS_PER_THREAD {
        assert_eq!(map.get(key), Some(key * 2), "key {} missing", key);
    }
}

#[test]
fn test_interleaved_insert_and_erase() {
    let map: DenseMap<u32, u32> = DenseMap::new();
    let barrier = Barrier::new(THREADS as usize);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let map = &map;
            let barrier = &barrier;
            scope.spawn(move |_| {
                let start = t * KEYS_PER_THREAD;
                for key in start..start + KEYS_PER_THREAD {
                    map.emplace(key, t).expect("allocation failed");
                }
                barrier.wait();

                // Erase the odd keys of this thread's range while others do the same
                for key in (start..start + KEYS_PER_THREAD).filter(|k| k % 2 == 1) {
                    assert_eq!(map.erase(key), Some(t));
                }
            });
        }
    })
    .expect("worker thread panicked");

    assert_eq!(map.len(), (THREADS * KEYS_PER_THREAD / 2) as usize);
    let view = map.read();
    for (key, owner) in view.iter() {
        assert_eq!(key % 2, 0);
        assert_eq!(*owner, key / KEYS_PER_THREAD);
    }
    for key in (0..THREADS * KEYS_PER_THREAD).filter(|k| k % 2 == 1) {
        assert!(!view.contains(key));
    }
}

#[test]
fn test_concurrent_swaps_do_not_deadlock() {
    let a: DenseMap<u32, &str> = DenseMap::new();
    let b: DenseMap<u32, &str> = DenseMap::new();
    a.emplace(1, "a").unwrap();
    b.emplace(2, "b").unwrap();

    thread::scope(|scope| {
        scope.spawn(|_| {
            for _ in 0..1000 {
                a.swap(&b);
            }
        });
        scope.spawn(|_| {
            for _ in 0..1000 {
                b.swap(&a);
            }
        });
    })
    .expect("worker thread panicked");

    // An even number of swaps in total restores the original layout
    assert_eq!(a.get(1), Some("a"));
    assert_eq!(b.get(2), Some("b"));
}

#[test]
fn test_shared_map_disjoint_inserts() {
    let map: SharedSparseMap<u32, u32> = SharedSparseMap::new();
    let barrier = Barrier::new(THREADS as usize);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let map = &map;
            let barrier = &barrier;
            scope.spawn(move |_| {
                let start = t * KEYS_PER_THREAD;
                for key in start..start + KEYS_PER_THREAD {
                    *map.get_or_insert(key).expect("allocation failed") = key + 1;
                }
                barrier.wait();
            });
        }
    })
    .expect("worker thread panicked");

    let map = map.into_inner();
    assert_eq!(map.len(), (THREADS * KEYS_PER_THREAD) as usize);
    for key in 0..THREADS * KEYS_PER_THREAD {
        assert_eq!(map.at(key), Ok(&(key + 1)));
    }
}
