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

//! A concurrent hash map implemented with separate chaining, per-bucket
//! lock striping, and gated multi-threaded growth.

mod capacity;
mod chain;
mod gate;
mod table;

#[cfg(test)]
mod tests;

use table::{MergeFn, RawTable};

use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash, Hasher},
    iter,
    marker::PhantomData,
};

/// Default hasher for `HashMap`.
///
/// This is currently [aHash], a hashing algorithm designed around
/// acceleration by the [AES-NI] instruction set on x86 processors. aHash is
/// not cryptographically secure, but is fast and resistant to DoS attacks.
///
/// [aHash]: https://docs.rs/ahash
/// [AES-NI]: https://en.wikipedia.org/wiki/AES_instruction_set
pub type DefaultHashBuilder = ahash::RandomState;

/// A concurrent hash map implemented with separate chaining, per-bucket
/// lock striping, and gated multi-threaded growth.
///
/// Colliding entries are kept in per-bucket linked chains, and each bucket
/// is guarded by one of a power-of-two number of stripe locks, so key-level
/// operations on different buckets rarely contend. Mutating operations are
/// batch-oriented: a batch passes the table's gate once, performs its
/// per-key work under stripe locks, and on completion may trigger a growth
/// of the bucket array. Growth takes the next bucket count from a fixed
/// doubling prime sequence, drains all other in-flight batches, and
/// redistributes every entry into the new array using multiple worker
/// threads; entry storage is relinked, never copied. Once the prime
/// sequence is exhausted (or its next entry would not fit in `usize`), the
/// table keeps operating above its target load factor.
///
/// The hashing algorithm defaults to [aHash] and can be chosen on a
/// per-`HashMap` basis using the [`with_hasher`] and
/// [`with_capacity_and_hasher`] methods.
///
/// Key types must implement [`Hash`] and [`Eq`]. Mutating operations
/// additionally require `K: Send` and `V: Send`, as growth moves entries
/// across its worker threads. Values are returned by move from [`remove`];
/// operations that merely observe an entry borrow it through a closure or
/// require [`Clone`].
///
/// [aHash]: https://docs.rs/ahash
/// [`with_hasher`]: #method.with_hasher
/// [`with_capacity_and_hasher`]: #method.with_capacity_and_hasher
/// [`remove`]: #method.remove
/// [`Hash`]: https://doc.rust-lang.org/std/hash/trait.Hash.html
/// [`Eq`]: https://doc.rust-lang.org/std/cmp/trait.Eq.html
/// [`Clone`]: https://doc.rust-lang.org/std/clone/trait.Clone.html
pub struct HashMap<K, V, S = DefaultHashBuilder> {
    raw: RawTable<K, V>,
    build_hasher: S,
    merge: Option<Box<MergeFn<V>>>,
}

impl<K, V> HashMap<K, V, DefaultHashBuilder> {
    /// Creates an empty `HashMap` with the smallest planned bucket count
    /// and default striping and growth parallelism.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates an empty `HashMap` sized to hold at least `capacity`
    /// entries without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::builder().min_occupancy(capacity).build()
    }

    /// Returns a [`Builder`] for configuring striping, growth parallelism,
    /// the target load factor, and the merge function.
    ///
    /// [`Builder`]: struct.Builder.html
    pub fn builder() -> Builder<K, V> {
        Builder::default()
    }
}

impl<K, V, S: BuildHasher> HashMap<K, V, S> {
    /// Creates an empty `HashMap` that will use `build_hasher` to hash
    /// keys.
    pub fn with_hasher(build_hasher: S) -> Self {
        Builder::default().build_with_hasher(build_hasher)
    }

    /// Creates an empty `HashMap` that will use `build_hasher` to hash
    /// keys, sized to hold at least `capacity` entries without growing.
    pub fn with_capacity_and_hasher(capacity: usize, build_hasher: S) -> Self {
        Builder::default()
            .min_occupancy(capacity)
            .build_with_hasher(build_hasher)
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Returns the number of entries that are confirmed to have been
    /// inserted by completed batches.
    ///
    /// Because `HashMap` can be updated concurrently, this function
    /// reflects batches that have returned to their callers; in-progress
    /// batches are not counted.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns true if this `HashMap` contains no confirmed entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of entries this `HashMap` can hold without
    /// growing its bucket array, i.e. the bucket count scaled by the
    /// target load factor.
    ///
    /// If batches are in flight, a growth may complete immediately after
    /// this function returns.
    pub fn capacity(&self) -> usize {
        let batch = self.raw.begin();
        let num_buckets = batch.num_buckets();
        drop(batch);

        (num_buckets as f64 * self.raw.max_load()) as usize
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> HashMap<K, V, S> {
    /// Returns a copy of the value corresponding to `key`.
    ///
    /// `Q` can be any borrowed form of `K`, but [`Hash`] and [`Eq`] on `Q`
    /// *must* match that of `K`. `V` must implement [`Clone`], as the
    /// entry remains owned by the map; if it does not, use [`get_and`]
    /// instead.
    ///
    /// [`Hash`]: https://doc.rust-lang.org/std/hash/trait.Hash.html
    /// [`Eq`]: https://doc.rust-lang.org/std/cmp/trait.Eq.html
    /// [`Clone`]: https://doc.rust-lang.org/std/clone/trait.Clone.html
    /// [`get_and`]: #method.get_and
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get_and(key, V::clone)
    }

    /// Invokes `with_value` with a reference to the value corresponding to
    /// `key`, if there is one.
    ///
    /// The closure runs while holding the entry's stripe lock: it must not
    /// touch this map, or it will deadlock.
    pub fn get_and<Q, F, T>(&self, key: &Q, with_value: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> T,
    {
        self.get_key_value_and(key, move |_, value| with_value(value))
    }

    /// Invokes `with_entry` with references to the key and value
    /// corresponding to `key`, if there is an entry.
    ///
    /// The same locking caveat as [`get_and`](#method.get_and) applies.
    pub fn get_key_value_and<Q, F, T>(&self, key: &Q, with_entry: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&K, &V) -> T,
    {
        let hash = hash(&self.build_hasher, key);

        let batch = self.raw.begin();
        let result = batch.get(hash, key, with_entry);
        drop(batch);

        result
    }

    /// Returns true if there is an entry for `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_and(key, |_| ()).is_some()
    }
}

impl<K: Hash + Eq + Send, V: Send, S: BuildHasher> HashMap<K, V, S> {
    /// Inserts every `(key, value)` pair in `entries` as one batch,
    /// returning the number of keys that were newly added.
    ///
    /// For a key already present, the configured merge function (see
    /// [`Builder::merge`]) is applied to the existing value and the new
    /// one; with no merge function the old value is dropped and replaced.
    /// Among concurrent batches inserting the same key with no merge
    /// function the last writer wins, with no guarantee of which batch
    /// that is.
    ///
    /// The whole batch passes the table's gate once, so inserting many
    /// entries per call is considerably cheaper than many calls. After the
    /// batch, this call may grow the table; it then blocks until every
    /// other in-flight batch has finished.
    ///
    /// [`Builder::merge`]: struct.Builder.html#method.merge
    pub fn insert_many<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut batch = self.raw.begin();
        let mut added = 0;

        for (key, value) in entries {
            let hash = hash(&self.build_hasher, &key);

            if batch.insert(hash, key, value, self.merge.as_deref()) {
                added += 1;
            }
        }

        batch.commit();

        added
    }

    /// Inserts one `(key, value)` pair, returning true if the key was
    /// newly added.
    ///
    /// This is a single-entry batch; see
    /// [`insert_many`](#method.insert_many).
    pub fn insert(&self, key: K, value: V) -> bool {
        self.insert_many(iter::once((key, value))) == 1
    }

    /// Removes the entry for every key in `keys` as one batch, returning
    /// each key's value in order.
    ///
    /// Removed values are moved out to the caller, which becomes
    /// responsible for whatever they own; the map does not drop them.
    pub fn remove_many<'q, Q, I>(&self, keys: I) -> Vec<Option<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'q,
        I: IntoIterator<Item = &'q Q>,
    {
        let mut batch = self.raw.begin();

        let values = keys
            .into_iter()
            .map(|key| batch.remove(hash(&self.build_hasher, key), key))
            .collect();

        batch.commit();

        values
    }

    /// Removes the entry for `key`, if any, and returns its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_many(iter::once(key)).pop().flatten()
    }

    /// Removes and drops the entry for every key in `keys` as one batch,
    /// returning the number of entries that were present.
    ///
    /// Unlike [`remove_many`](#method.remove_many), the values are dropped
    /// rather than returned.
    pub fn discard_many<'q, Q, I>(&self, keys: I) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'q,
        I: IntoIterator<Item = &'q Q>,
    {
        let mut batch = self.raw.begin();

        let discarded = keys
            .into_iter()
            .filter(|key| batch.remove(hash(&self.build_hasher, key), *key).is_some())
            .count();

        batch.commit();

        discarded
    }

    /// Removes and drops the entry for `key`, returning true if it was
    /// present.
    pub fn discard<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.discard_many(iter::once(key)) == 1
    }
}

impl<K, V, S: BuildHasher + Default> Default for HashMap<K, V, S> {
    fn default() -> Self {
        Builder::default().build_with_hasher(S::default())
    }
}

/// Builds a [`HashMap`] with non-default striping, growth parallelism,
/// load factor, or merge behavior.
///
/// [`HashMap`]: struct.HashMap.html
#[must_use]
pub struct Builder<K, V> {
    min_occupancy: usize,
    lock_stripes: Option<usize>,
    rehash_workers: Option<usize>,
    max_load: f64,
    merge: Option<Box<MergeFn<V>>>,
    marker: PhantomData<fn() -> K>,
}

impl<K, V> Default for Builder<K, V> {
    fn default() -> Self {
        Builder {
            min_occupancy: 0,
            lock_stripes: None,
            rehash_workers: None,
            max_load: 1.0,
            merge: None,
            marker: PhantomData,
        }
    }
}

impl<K, V> Builder<K, V> {
    /// The number of entries the map must hold without growing. The
    /// initial bucket count is the smallest planned capacity that keeps
    /// this occupancy within the target load factor.
    pub fn min_occupancy(mut self, min_occupancy: usize) -> Self {
        self.min_occupancy = min_occupancy;
        self
    }

    /// The number of stripe locks guarding the buckets. Defaults to the
    /// number of CPUs, rounded up to a power of two.
    ///
    /// # Panics
    ///
    /// Panics if `lock_stripes` is not a power of two.
    pub fn lock_stripes(mut self, lock_stripes: usize) -> Self {
        assert!(lock_stripes.is_power_of_two());

        self.lock_stripes = Some(lock_stripes);
        self
    }

    /// The number of threads (including the growing thread itself) that
    /// redistribute entries during growth. Defaults to the number of CPUs.
    ///
    /// # Panics
    ///
    /// Panics if `rehash_workers` is zero.
    pub fn rehash_workers(mut self, rehash_workers: usize) -> Self {
        assert!(rehash_workers >= 1);

        self.rehash_workers = Some(rehash_workers);
        self
    }

    /// The target load factor: growth is triggered when the ratio of
    /// entries to buckets exceeds it. Defaults to 1.0.
    ///
    /// This is a trigger, not a hard cap; once the capacity planner's
    /// prime sequence is exhausted the table operates above it.
    ///
    /// # Panics
    ///
    /// Panics if `max_load` is not a positive, finite number.
    pub fn max_load(mut self, max_load: f64) -> Self {
        assert!(max_load > 0.0 && max_load.is_finite());

        self.max_load = max_load;
        self
    }

    /// A merge function applied when an inserted key is already present:
    /// it receives the existing value in place and the incoming value by
    /// move, in place of the default drop-and-overwrite.
    ///
    /// The merge function runs while holding the entry's stripe lock and
    /// must not touch the map it is configured on.
    pub fn merge(mut self, merge: impl Fn(&mut V, V) + Send + Sync + 'static) -> Self {
        self.merge = Some(Box::new(merge));
        self
    }

    /// Builds a `HashMap` using the default hasher.
    pub fn build(self) -> HashMap<K, V, DefaultHashBuilder> {
        self.build_with_hasher(DefaultHashBuilder::default())
    }

    /// Builds a `HashMap` that will use `build_hasher` to hash keys.
    pub fn build_with_hasher<S: BuildHasher>(self, build_hasher: S) -> HashMap<K, V, S> {
        let lock_stripes = self
            .lock_stripes
            .unwrap_or_else(|| num_cpus::get().max(1).next_power_of_two());
        let rehash_workers = self.rehash_workers.unwrap_or_else(|| num_cpus::get().max(1));

        HashMap {
            raw: RawTable::new(
                self.min_occupancy,
                lock_stripes,
                rehash_workers,
                self.max_load,
            ),
            build_hasher,
            merge: self.merge,
        }
    }
}

pub(crate) fn hash<S, Q>(build_hasher: &S, key: &Q) -> u64
where
    S: BuildHasher,
    Q: Hash + ?Sized,
{
    let mut hasher = build_hasher.build_hasher();
    key.hash(&mut hasher);

    hasher.finish()
}
