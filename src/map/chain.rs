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

//! Per-bucket collision chains.

use std::borrow::Borrow;

/// The head of one bucket's collision chain.
///
/// Nodes are individually heap allocated and singly linked. Moving a node
/// between bucket arrays during a rehash moves its box; the key and value
/// it holds are never copied or reallocated. Chain order is unspecified.
pub(crate) struct Chain<K, V> {
    head: Option<Box<Node<K, V>>>,
}

/// One entry: a key, its cached 64-bit hash, and the associated value.
///
/// The hash is cached so that redistributing nodes into a larger bucket
/// array only reduces it by the new modulus instead of re-hashing the key.
pub(crate) struct Node<K, V> {
    pub(crate) hash: u64,
    pub(crate) key: K,
    pub(crate) value: V,
    next: Option<Box<Node<K, V>>>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(hash: u64, key: K, value: V) -> Box<Self> {
        Box::new(Node {
            hash,
            key,
            value,
            next: None,
        })
    }

    pub(crate) fn into_value(self: Box<Self>) -> V {
        self.value
    }
}

impl<K, V> Chain<K, V> {
    pub(crate) const fn new() -> Self {
        Chain { head: None }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Links `node` in at the head of the chain.
    pub(crate) fn push(&mut self, mut node: Box<Node<K, V>>) {
        node.next = self.head.take();
        self.head = Some(node);
    }

    /// Unlinks and returns the head node, if any.
    pub(crate) fn pop(&mut self) -> Option<Box<Node<K, V>>> {
        let mut node = self.head.take()?;
        self.head = node.next.take();

        Some(node)
    }

    pub(crate) fn find<Q>(&self, key: &Q) -> Option<&Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut current = self.head.as_deref();

        while let Some(node) = current {
            if node.key.borrow() == key {
                return Some(node);
            }

            current = node.next.as_deref();
        }

        None
    }

    pub(crate) fn find_mut<Q>(&mut self, key: &Q) -> Option<&mut Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut current = self.head.as_deref_mut();

        while let Some(node) = current {
            if node.key.borrow() == key {
                return Some(node);
            }

            current = node.next.as_deref_mut();
        }

        None
    }

    /// Unlinks and returns the node associated with `key`, if present.
    pub(crate) fn unlink<Q>(&mut self, key: &Q) -> Option<Box<Node<K, V>>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut cursor = &mut self.head;

        loop {
            let matches = match cursor.as_ref() {
                Some(node) => node.key.borrow() == key,
                None => return None,
            };

            if matches {
                let mut node = cursor.take().unwrap();
                *cursor = node.next.take();

                return Some(node);
            }

            cursor = &mut cursor.as_mut().unwrap().next;
        }
    }
}

impl<K, V> Drop for Chain<K, V> {
    fn drop(&mut self) {
        // The derived drop would recurse once per node and overflow the
        // stack on a sufficiently long chain.
        let mut head = self.head.take();

        while let Some(mut node) = head {
            head = node.next.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(keys: &[i32]) -> Chain<i32, i32> {
        let mut chain = Chain::new();

        for &key in keys {
            chain.push(Node::new(key as u64, key, key * 10));
        }

        chain
    }

    #[test]
    fn find_hits_and_misses() {
        let chain = chain_of(&[1, 2, 3]);

        assert_eq!(chain.find(&1).map(|n| n.value), Some(10));
        assert_eq!(chain.find(&2).map(|n| n.value), Some(20));
        assert_eq!(chain.find(&3).map(|n| n.value), Some(30));
        assert!(chain.find(&4).is_none());
        assert!(Chain::<i32, i32>::new().find(&1).is_none());
    }

    #[test]
    fn unlink_head_interior_and_tail() {
        let mut chain = chain_of(&[1, 2, 3]);

        // 3 is the head, 1 the tail.
        assert_eq!(chain.unlink(&2).map(Node::into_value), Some(20));
        assert_eq!(chain.unlink(&3).map(Node::into_value), Some(30));
        assert_eq!(chain.unlink(&1).map(Node::into_value), Some(10));
        assert!(chain.unlink(&1).is_none());
        assert!(chain.is_empty());
    }

    #[test]
    fn pop_drains_in_some_order() {
        let mut chain = chain_of(&[1, 2, 3]);
        let mut keys = Vec::new();

        while let Some(node) = chain.pop() {
            keys.push(node.key);
        }

        keys.sort_unstable();
        assert_eq!(keys, [1, 2, 3]);
    }

    #[test]
    fn dropping_a_long_chain_does_not_overflow_the_stack() {
        let mut chain = Chain::new();

        for key in 0..1_000_000_u64 {
            chain.push(Node::new(key, key, ()));
        }

        drop(chain);
    }
}
