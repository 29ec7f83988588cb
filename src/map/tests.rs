// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

mod util;

use util::{DropNotifier, NoisyDropper};

use super::*;

use std::{
    sync::{Arc, Barrier},
    thread,
};

#[test]
fn round_trip() {
    let map = HashMap::new();

    assert!(map.insert(17, 29));
    assert_eq!(map.get(&17), Some(29));

    assert!(!map.insert(17, 31));
    assert_eq!(map.get(&17), Some(31));

    assert_eq!(map.len(), 1);
}

#[test]
fn lookup_by_borrowed_key() {
    let map = HashMap::new();

    map.insert("alpha".to_string(), 1);
    map.insert("beta".to_string(), 2);

    assert!(map.contains_key("alpha"));
    assert!(!map.contains_key("gamma"));

    assert_eq!(
        map.get_key_value_and("beta", |k, v| (k.clone(), *v)),
        Some(("beta".to_string(), 2))
    );
}

#[test]
fn batch_counts_only_new_keys() {
    let map = HashMap::new();

    assert_eq!(map.insert_many([(1, 10), (2, 20), (1, 11)]), 2);
    assert_eq!(map.get(&1), Some(11));
    assert_eq!(map.get(&2), Some(20));
    assert_eq!(map.len(), 2);
}

#[test]
fn remove_many_returns_values_in_key_order() {
    let map = HashMap::new();
    map.insert_many([(1, 10), (3, 30)]);

    let keys = [1, 2, 3];
    assert_eq!(map.remove_many(keys.iter()), vec![Some(10), None, Some(30)]);
    assert!(map.is_empty());
}

#[test]
fn discard_many_counts_present_keys() {
    let map = HashMap::new();
    map.insert_many([(1, 10), (2, 20), (3, 30)]);

    let keys = [2, 3, 4];
    assert_eq!(map.discard_many(keys.iter()), 2);

    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&1), Some(10));
    assert_eq!(map.get(&2), None);
}

#[test]
fn with_capacity_respects_the_hint() {
    let map: HashMap<i32, i32> = HashMap::with_capacity(500);

    assert!(map.capacity() >= 500);
    assert!(map.is_empty());
}

#[test]
fn load_factor_bound_holds_after_every_batch() {
    let map = HashMap::builder().max_load(0.75).build();

    for chunk in (0..10_000_i64).collect::<Vec<_>>().chunks(500) {
        map.insert_many(chunk.iter().map(|&key| (key, ())));

        assert!(map.len() <= map.capacity());
    }
}

#[test]
fn growth_preserves_membership() {
    let map = HashMap::builder().rehash_workers(4).build();
    let initial_capacity = map.capacity();

    map.insert_many((0..5_000_u32).map(|key| (key, u64::from(key) * 3)));

    assert!(map.capacity() > initial_capacity);
    assert_eq!(map.len(), 5_000);

    for key in 0..5_000_u32 {
        assert_eq!(map.get(&key), Some(u64::from(key) * 3));
    }
}

#[test]
fn growth_with_a_single_rehash_worker() {
    let map = HashMap::builder().rehash_workers(1).lock_stripes(8).build();

    map.insert_many((0..10_000_u32).map(|key| (key, key)));

    assert_eq!(map.len(), 10_000);

    for key in 0..10_000_u32 {
        assert_eq!(map.get(&key), Some(key));
    }
}

#[test]
fn removal_drains_every_chain() {
    const NUM_KEYS: i32 = 4_096;

    let mut map = HashMap::with_capacity(NUM_KEYS as usize);
    map.insert_many((0..NUM_KEYS).map(|key| (key, key)));

    let keys: Vec<_> = (0..NUM_KEYS).collect();
    let removed = map.remove_many(keys.iter());

    assert!(removed.iter().all(Option::is_some));
    assert_eq!(map.len(), 0);
    assert!(map.raw.chains_are_empty());
}

#[test]
fn merge_combines_on_collision() {
    let map: HashMap<i32, i32> = HashMap::builder()
        .merge(|existing, incoming| *existing += incoming)
        .build();

    assert!(map.insert(3, 10));
    assert!(!map.insert(3, 4));
    assert!(!map.insert(3, 1));

    assert_eq!(map.get(&3), Some(15));
    assert_eq!(map.len(), 1);
}

#[test]
fn concurrent_overlapping_inserts_with_merge_converge() {
    const NUM_THREADS: usize = 8;
    const NUM_KEYS: u32 = 1_000;

    let map: Arc<HashMap<u32, u32>> = Arc::new(
        HashMap::builder()
            .merge(|existing, incoming| *existing += incoming)
            .build(),
    );
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let map = map.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();
                map.insert_many((0..NUM_KEYS).map(|key| (key, 1)));
            })
        })
        .collect();

    for result in threads.into_iter().map(|t| t.join()) {
        assert!(result.is_ok());
    }

    assert_eq!(map.len(), NUM_KEYS as usize);

    for key in 0..NUM_KEYS {
        assert_eq!(map.get(&key), Some(NUM_THREADS as u32));
    }
}

#[test]
fn concurrent_batched_churn_drains() {
    const NUM_THREADS: usize = 8;
    const KEYS_PER_THREAD: u64 = 512;
    const NUM_ROUNDS: usize = 8;

    let map: Arc<HashMap<u64, u64>> = Arc::new(HashMap::new());
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let threads: Vec<_> = (0..NUM_THREADS as u64)
        .map(|i| {
            let map = map.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                let start = i * KEYS_PER_THREAD;
                let keys: Vec<_> = (start..start + KEYS_PER_THREAD).collect();

                for _ in 0..NUM_ROUNDS {
                    let added = map.insert_many(keys.iter().map(|&key| (key, key)));
                    assert_eq!(added, keys.len());

                    let removed = map.remove_many(keys.iter());
                    assert!(removed.iter().all(Option::is_some));
                }
            })
        })
        .collect();

    for result in threads.into_iter().map(|t| t.join()) {
        assert!(result.is_ok());
    }

    assert_eq!(map.len(), 0);

    let mut map = Arc::try_unwrap(map).ok().unwrap();
    assert!(map.raw.chains_are_empty());
}

// Four workers, disjoint quarters of 100 000 sequential keys, then a full
// presence and absence sweep.
#[test]
fn four_threads_insert_disjoint_quarters() {
    const NUM_THREADS: u64 = 4;
    const NUM_KEYS: u64 = 100_000;
    const KEYS_PER_THREAD: u64 = NUM_KEYS / NUM_THREADS;
    const BATCH: u64 = 1_000;

    let map: Arc<HashMap<u64, u64>> = Arc::new(
        HashMap::builder()
            .min_occupancy(500)
            .max_load(1.0)
            .rehash_workers(4)
            .build(),
    );
    let barrier = Arc::new(Barrier::new(NUM_THREADS as usize));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let map = map.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                let start = i * KEYS_PER_THREAD;
                let end = start + KEYS_PER_THREAD;
                let mut added = 0;
                let mut key = start;

                while key < end {
                    let batch_end = (key + BATCH).min(end);
                    added += map.insert_many((key..batch_end).map(|k| (k, k.wrapping_mul(2))));
                    key = batch_end;
                }

                assert_eq!(added, KEYS_PER_THREAD as usize);
            })
        })
        .collect();

    for result in threads.into_iter().map(|t| t.join()) {
        assert!(result.is_ok());
    }

    assert_eq!(map.len(), NUM_KEYS as usize);

    for key in 0..NUM_KEYS {
        assert_eq!(map.get(&key), Some(key.wrapping_mul(2)));
        assert_eq!(map.get(&(key + NUM_KEYS)), None);
    }
}

#[test]
fn remove_moves_the_value_out_undropped() {
    let notifier = Arc::new(DropNotifier::new());
    let map = HashMap::new();

    map.insert(0, NoisyDropper::new(notifier.clone(), 5));

    let value = map.remove(&0).unwrap();
    assert!(!notifier.was_dropped());
    assert_eq!(*value, 5);

    drop(value);
    assert!(notifier.was_dropped());
    assert!(map.is_empty());
}

#[test]
fn discard_drops_the_value() {
    let notifier = Arc::new(DropNotifier::new());
    let map = HashMap::new();

    map.insert(0, NoisyDropper::new(notifier.clone(), 5));
    assert!(!notifier.was_dropped());

    assert!(map.discard(&0));
    assert!(notifier.was_dropped());
    assert!(map.is_empty());

    assert!(!map.discard(&0));
}

#[test]
fn overwrite_drops_the_old_value() {
    let first = Arc::new(DropNotifier::new());
    let second = Arc::new(DropNotifier::new());
    let map = HashMap::new();

    map.insert(0, NoisyDropper::new(first.clone(), 5));
    map.insert(0, NoisyDropper::new(second.clone(), 6));

    assert!(first.was_dropped());
    assert!(!second.was_dropped());
    assert_eq!(map.get_and(&0, |value| value.elem), Some(6));
}

#[test]
fn merge_drops_only_the_incoming_value() {
    let first = Arc::new(DropNotifier::new());
    let second = Arc::new(DropNotifier::new());

    // Keep the existing value; the incoming one is consumed by the merge.
    let map: HashMap<i32, NoisyDropper<i32>> =
        HashMap::builder().merge(|_existing, _incoming| {}).build();

    map.insert(0, NoisyDropper::new(first.clone(), 5));
    map.insert(0, NoisyDropper::new(second.clone(), 6));

    assert!(!first.was_dropped());
    assert!(second.was_dropped());
    assert_eq!(map.get_and(&0, |value| value.elem), Some(5));
}

#[test]
fn duplicate_insert_keeps_the_original_key() {
    let first = Arc::new(DropNotifier::new());
    let second = Arc::new(DropNotifier::new());
    let map = HashMap::new();

    map.insert(NoisyDropper::new(first.clone(), 7), 1);
    map.insert(NoisyDropper::new(second.clone(), 7), 2);

    assert!(!first.was_dropped());
    assert!(second.was_dropped());

    assert_eq!(map.get(&7), Some(2));
    assert_eq!(map.len(), 1);
}

#[test]
fn dropping_the_map_drops_every_entry() {
    let notifiers: Vec<_> = (0..64).map(|_| Arc::new(DropNotifier::new())).collect();
    let map = HashMap::new();

    for (i, notifier) in notifiers.iter().enumerate() {
        map.insert(i, NoisyDropper::new(notifier.clone(), i));
    }

    assert!(notifiers.iter().all(|n| !n.was_dropped()));

    drop(map);

    assert!(notifiers.iter().all(|n| n.was_dropped()));
}

#[test]
fn entries_survive_growth_undropped() {
    let notifiers: Vec<_> = (0..512).map(|_| Arc::new(DropNotifier::new())).collect();
    let map = HashMap::new();

    // Well past the smallest bucket count, so several growths happen while
    // these values' boxes are relinked.
    for (i, notifier) in notifiers.iter().enumerate() {
        map.insert(i, NoisyDropper::new(notifier.clone(), i));
    }

    assert!(notifiers.iter().all(|n| !n.was_dropped()));

    for (i, _) in notifiers.iter().enumerate() {
        assert_eq!(map.get_and(&i, |value| value.elem), Some(i));
    }
}
