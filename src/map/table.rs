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

//! The bucket array, its stripe locks, and the growth engine.
//!
//! Locking discipline, from outermost to innermost:
//!
//! 1. Every access to the bucket array happens between [`Gate::enter`] and
//!    the matching exit, with one exception: the thread that closed the
//!    gate (and is therefore the sole in-flight thread) may replace the
//!    array wholesale.
//! 2. An individual bucket's chain is read or written only while holding
//!    that bucket's stripe lock, selected by masking the bucket index.
//!    During redistribution the grower's workers hold stripe locks for the
//!    buckets of the *new* array they link into; the old array needs no
//!    locks because its segments are disjoint exclusive borrows.
//!
//! The gate's mutex also orders the array swap itself: a batch reads the
//! array pointer only after entering the gate, and the grower publishes the
//! new array before reopening it.

use super::{
    capacity::Cursor,
    chain::{Chain, Node},
    gate::Gate,
};

use std::{
    borrow::Borrow,
    cell::UnsafeCell,
    mem,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

/// A merge function applied to `(existing, incoming)` values on key
/// collision, in place of overwriting.
pub(crate) type MergeFn<V> = dyn Fn(&mut V, V) + Send + Sync;

pub(crate) struct RawTable<K, V> {
    /// Replaced wholesale only by a thread holding the gate closed; read by
    /// any in-flight batch.
    buckets: UnsafeCell<BucketArray<K, V>>,
    /// Bucket-range mutexes; a bucket's stripe is `index & stripe_mask`.
    stripes: Box<[CachePadded<Mutex<()>>]>,
    stripe_mask: usize,
    gate: Gate,
    len: AtomicUsize,
    max_load: f64,
    rehash_workers: usize,
}

struct BucketArray<K, V> {
    chains: Box<[UnsafeCell<Chain<K, V>>]>,
    cursor: Cursor,
}

// Chains are only touched under the discipline documented above, so the
// table is as thread-safe as moving its entries between threads is.
unsafe impl<K: Send, V: Send> Send for RawTable<K, V> {}
unsafe impl<K: Send, V: Send> Sync for RawTable<K, V> {}

impl<K, V> BucketArray<K, V> {
    fn with_cursor(cursor: Cursor) -> Self {
        let count = cursor.capacity();
        let mut chains = Vec::new();
        chains.resize_with(count, || UnsafeCell::new(Chain::new()));

        BucketArray {
            chains: chains.into_boxed_slice(),
            cursor,
        }
    }
}

impl<K, V> RawTable<K, V> {
    pub(crate) fn new(
        min_occupancy: usize,
        num_stripes: usize,
        rehash_workers: usize,
        max_load: f64,
    ) -> Self {
        assert!(num_stripes.is_power_of_two());
        assert!(rehash_workers >= 1);
        assert!(max_load > 0.0 && max_load.is_finite());

        let cursor = Cursor::for_occupancy(min_occupancy, max_load);
        let stripes = (0..num_stripes)
            .map(|_| CachePadded::new(Mutex::new(())))
            .collect();

        RawTable {
            buckets: UnsafeCell::new(BucketArray::with_cursor(cursor)),
            stripes,
            stripe_mask: num_stripes - 1,
            gate: Gate::new(),
            len: AtomicUsize::new(0),
            max_load,
            rehash_workers,
        }
    }

    /// The number of entries confirmed by completed batches.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn max_load(&self) -> f64 {
        self.max_load
    }

    /// Passes the gate and begins a batch of key operations.
    pub(crate) fn begin(&self) -> Batch<'_, K, V> {
        self.gate.enter();

        Batch {
            table: self,
            inserted: 0,
            removed: 0,
        }
    }

    /// Whether the load factor is exceeded and the capacity planner can
    /// still advance. Must be called from an in-flight thread.
    fn should_grow(&self) -> bool {
        // Safety: in flight, so the array cannot be concurrently replaced.
        let buckets = unsafe { &*self.buckets.get() };

        self.len() as f64 / buckets.chains.len() as f64 > self.max_load
            && buckets.cursor.advance().is_some()
    }

    /// Exclusive-borrow accessor for tests: a `&mut` receiver proves no
    /// batch is in flight, so the chains may be inspected directly.
    #[cfg(test)]
    pub(crate) fn chains_are_empty(&mut self) -> bool {
        self.buckets
            .get_mut()
            .chains
            .iter_mut()
            .all(|cell| cell.get_mut().is_empty())
    }
}

impl<K: Send, V: Send> RawTable<K, V> {
    /// Replaces the bucket array with the next planned capacity and
    /// redistributes every chain node into it.
    ///
    /// Must only be called by the thread that closed the gate. Returns
    /// without changes if the planner cannot reach the target load factor
    /// at all (sequence exhausted), leaving the table pinned at its
    /// current size.
    fn grow(&self) {
        let len = self.len();

        let old = {
            // Safety: the caller holds the gate closed and is the sole
            // in-flight thread, so this is the only reference to the
            // array; the borrow ends before redistribution re-reads it.
            let buckets = unsafe { &mut *self.buckets.get() };

            let mut cursor = buckets.cursor;
            let mut advanced = false;

            while len as f64 / cursor.capacity() as f64 > self.max_load {
                match cursor.advance() {
                    Some(next) => {
                        cursor = next;
                        advanced = true;
                    }
                    None => break,
                }
            }

            if !advanced {
                return;
            }

            mem::replace(buckets, BucketArray::with_cursor(cursor))
        };

        self.redistribute(old);
    }

    /// Fans the old array's buckets out over the rehash workers and links
    /// every node into the new array. Node boxes are reused; only their
    /// links change.
    fn redistribute(&self, mut old: BucketArray<K, V>) {
        // Safety: gate exclusivity; workers mutate chains of the new array
        // only under its stripe locks.
        let new = unsafe { &*self.buckets.get() };
        let target = StripedChains {
            chains: &new.chains,
        };

        let num_buckets = old.chains.len();
        let num_workers = self.rehash_workers.min(num_buckets).max(1);
        let base = num_buckets / num_workers;
        let extra = num_buckets % num_workers;

        thread::scope(|scope| {
            let mut rest = &mut old.chains[..];

            for worker in 0..num_workers {
                // Leading segments absorb the remainder.
                let size = base + usize::from(worker < extra);
                let (segment, tail) = rest.split_at_mut(size);
                rest = tail;

                if worker == num_workers - 1 {
                    self.drain_into(segment, target);
                } else {
                    scope.spawn(move || self.drain_into(segment, target));
                }
            }
        });
    }

    fn drain_into(&self, segment: &mut [UnsafeCell<Chain<K, V>>], target: StripedChains<'_, K, V>) {
        let new_count = target.chains.len() as u64;

        for cell in segment {
            let chain = cell.get_mut();

            while let Some(node) = chain.pop() {
                let index = (node.hash % new_count) as usize;
                let _guard = self.stripes[index & self.stripe_mask].lock();

                // Safety: the stripe lock makes this worker the only one
                // touching this chain of the new array; no batch can be in
                // flight while the gate is closed.
                let target_chain = unsafe { &mut *target.chains[index].get() };
                target_chain.push(node);
            }
        }
    }
}

/// A shared view of the new bucket array for redistribution workers.
struct StripedChains<'a, K, V> {
    chains: &'a [UnsafeCell<Chain<K, V>>],
}

impl<K, V> Clone for StripedChains<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for StripedChains<'_, K, V> {}

// Safety: workers only mutate a chain while holding its bucket's stripe
// lock.
unsafe impl<K: Send, V: Send> Sync for StripedChains<'_, K, V> {}
unsafe impl<K: Send, V: Send> Send for StripedChains<'_, K, V> {}

/// An in-flight batch of key operations.
///
/// Holding a `Batch` means the owning thread has passed the gate; dropping
/// it applies the accumulated length delta and leaves the gate, so a batch
/// abandoned by a panicking caller closure still keeps the live count
/// consistent with the entries it committed. [`Batch::commit`] additionally
/// gives growth its opportunity to run.
pub(crate) struct Batch<'a, K, V> {
    table: &'a RawTable<K, V>,
    inserted: usize,
    removed: usize,
}

impl<K, V> Batch<'_, K, V> {
    /// Runs `f` on the chain of `hash`'s bucket while holding the bucket's
    /// stripe lock.
    fn with_chain<R>(&self, hash: u64, f: impl FnOnce(&mut Chain<K, V>) -> R) -> R {
        // Safety: in flight, so the array cannot be concurrently replaced.
        let buckets = unsafe { &*self.table.buckets.get() };
        let index = (hash % buckets.chains.len() as u64) as usize;

        let _guard = self.table.stripes[index & self.table.stripe_mask].lock();

        // Safety: the stripe lock grants exclusive access to this chain.
        f(unsafe { &mut *buckets.chains[index].get() })
    }

    /// Inserts or merges one entry. Returns true if the key was newly
    /// added.
    pub(crate) fn insert(
        &mut self,
        hash: u64,
        key: K,
        value: V,
        merge: Option<&MergeFn<V>>,
    ) -> bool
    where
        K: Eq,
    {
        let added = self.with_chain(hash, |chain| match chain.find_mut(&key) {
            Some(node) => {
                match merge {
                    Some(merge) => merge(&mut node.value, value),
                    // Dropping the old value here is the overwrite path.
                    None => node.value = value,
                }

                false
            }
            None => {
                chain.push(Node::new(hash, key, value));

                true
            }
        });

        if added {
            self.inserted += 1;
        }

        added
    }

    /// Unlinks one entry and moves its value out without dropping it.
    pub(crate) fn remove<Q>(&mut self, hash: u64, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let node = self.with_chain(hash, |chain| chain.unlink(key))?;
        self.removed += 1;

        Some(node.into_value())
    }

    /// Invokes `with_entry` on the entry for `key`, if present.
    pub(crate) fn get<Q, F, T>(&self, hash: u64, key: &Q, with_entry: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        F: FnOnce(&K, &V) -> T,
    {
        self.with_chain(hash, |chain| {
            chain.find(key).map(|node| with_entry(&node.key, &node.value))
        })
    }

    /// The current bucket count.
    pub(crate) fn num_buckets(&self) -> usize {
        // Safety: in flight, so the array cannot be concurrently replaced.
        unsafe { &*self.table.buckets.get() }.chains.len()
    }

    fn flush_len(&mut self) {
        if self.inserted > 0 {
            self.table.len.fetch_add(self.inserted, Ordering::Relaxed);
            self.inserted = 0;
        }

        if self.removed > 0 {
            self.table.len.fetch_sub(self.removed, Ordering::Relaxed);
            self.removed = 0;
        }
    }
}

impl<K: Send, V: Send> Batch<'_, K, V> {
    /// Ends the batch: applies the length delta, then gives growth its
    /// opportunity before leaving the gate.
    ///
    /// If the load factor is exceeded and no other thread already holds the
    /// gate closed, this thread closes it, waits out every other in-flight
    /// batch, and performs the growth itself; otherwise it simply leaves,
    /// which is what a waiting grower is blocked on.
    pub(crate) fn commit(mut self) {
        self.flush_len();

        let table = self.table;
        mem::forget(self);

        if table.should_grow() && table.gate.try_close() {
            table.grow();
            table.gate.reopen();
        } else {
            table.gate.exit();
        }
    }
}

impl<K, V> Drop for Batch<'_, K, V> {
    fn drop(&mut self) {
        self.flush_len();
        self.table.gate.exit();
    }
}
