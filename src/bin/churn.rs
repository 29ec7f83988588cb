use stripemap::HashMap;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

fn main() {
    const NUM_THREADS: u64 = 16;
    const KEYS_PER_THREAD: u64 = 1024;

    let keep_running = Arc::new(AtomicBool::new(true));
    let map = Arc::new(HashMap::new());

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let keep_running = keep_running.clone();
            let map = map.clone();

            thread::spawn(move || {
                let start = i * KEYS_PER_THREAD;
                let keys: Vec<_> = (start..start + KEYS_PER_THREAD).collect();

                while keep_running.load(Ordering::Relaxed) {
                    let added = map.insert_many(keys.iter().map(|&key| (key, key)));
                    assert_eq!(added, keys.len());

                    let discarded = map.discard_many(keys.iter());
                    assert_eq!(discarded, keys.len());
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_secs(5));
    keep_running.store(false, Ordering::Relaxed);

    for result in threads.into_iter().map(|t| t.join()) {
        assert!(result.is_ok());
    }

    assert_eq!(map.len(), 0);
}
