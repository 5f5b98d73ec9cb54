// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Copy-on-write interval tree of latches.
//!
//! A persistent AVL tree ordered by `(span start, latch id)` and augmented
//! with the maximum span end of each subtree. Nodes are immutable once
//! built; mutation copies the root-to-leaf path and shares every untouched
//! subtree, so `clone` is O(1) and a clone is a stable snapshot that never
//! observes later mutations. Readers iterate without locks.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use super::Latch;
use super::spanset::Span;

struct Node {
    latch: Arc<Latch>,
    left: Option<Arc<Node>>,
    right: Option<Arc<Node>>,
    height: u32,
    /// Maximum effective span end over this subtree, for overlap pruning.
    max_end: Bytes,
}

fn height(node: &Option<Arc<Node>>) -> u32 {
    node.as_ref().map(|n| n.height).unwrap_or(0)
}

fn new_node(latch: Arc<Latch>, left: Option<Arc<Node>>, right: Option<Arc<Node>>) -> Arc<Node> {
    let mut max_end = latch.end().clone();
    if let Some(l) = &left {
        if l.max_end > max_end {
            max_end = l.max_end.clone();
        }
    }
    if let Some(r) = &right {
        if r.max_end > max_end {
            max_end = r.max_end.clone();
        }
    }
    Arc::new(Node {
        height: 1 + height(&left).max(height(&right)),
        latch,
        left,
        right,
        max_end,
    })
}

fn cmp_latch(a: &Latch, b: &Latch) -> Ordering {
    a.span()
        .key
        .cmp(&b.span().key)
        .then(a.id().cmp(&b.id()))
}

/// Rebuild a node from its parts, restoring the AVL balance invariant. The
/// inputs differ from a balanced tree by at most one level, the postcondition
/// of a single insert or delete.
fn rebuild(latch: Arc<Latch>, left: Option<Arc<Node>>, right: Option<Arc<Node>>) -> Arc<Node> {
    let lh = height(&left);
    let rh = height(&right);
    if lh > rh + 1 {
        let Some(l) = left else {
            return new_node(latch, None, right);
        };
        if height(&l.left) >= height(&l.right) {
            let new_right = new_node(latch, l.right.clone(), right);
            return new_node(l.latch.clone(), l.left.clone(), Some(new_right));
        }
        if let Some(lr) = &l.right {
            let new_left = new_node(l.latch.clone(), l.left.clone(), lr.left.clone());
            let new_right = new_node(latch, lr.right.clone(), right);
            return new_node(lr.latch.clone(), Some(new_left), Some(new_right));
        }
        return new_node(latch, Some(l), right);
    }
    if rh > lh + 1 {
        let Some(r) = right else {
            return new_node(latch, left, None);
        };
        if height(&r.right) >= height(&r.left) {
            let new_left = new_node(latch, left, r.left.clone());
            return new_node(r.latch.clone(), Some(new_left), r.right.clone());
        }
        if let Some(rl) = &r.left {
            let new_left = new_node(latch, left, rl.left.clone());
            let new_right = new_node(r.latch.clone(), rl.right.clone(), r.right.clone());
            return new_node(rl.latch.clone(), Some(new_left), Some(new_right));
        }
        return new_node(latch, left, Some(r));
    }
    new_node(latch, left, right)
}

fn insert_node(node: Option<&Arc<Node>>, latch: Arc<Latch>) -> Arc<Node> {
    let Some(node) = node else {
        return new_node(latch, None, None);
    };
    match cmp_latch(&latch, &node.latch) {
        Ordering::Less => {
            let new_left = insert_node(node.left.as_ref(), latch);
            rebuild(node.latch.clone(), Some(new_left), node.right.clone())
        }
        _ => {
            let new_right = insert_node(node.right.as_ref(), latch);
            rebuild(node.latch.clone(), node.left.clone(), Some(new_right))
        }
    }
}

/// Remove and return the minimum latch of the subtree.
fn take_min(node: &Arc<Node>) -> (Option<Arc<Node>>, Arc<Latch>) {
    match &node.left {
        None => (node.right.clone(), node.latch.clone()),
        Some(left) => {
            let (new_left, min) = take_min(left);
            (
                Some(rebuild(node.latch.clone(), new_left, node.right.clone())),
                min,
            )
        }
    }
}

fn delete_node(node: Option<&Arc<Node>>, latch: &Latch) -> (Option<Arc<Node>>, bool) {
    let Some(node) = node else {
        return (None, false);
    };
    match cmp_latch(latch, &node.latch) {
        Ordering::Less => {
            let (new_left, removed) = delete_node(node.left.as_ref(), latch);
            if !removed {
                return (Some(Arc::clone(node)), false);
            }
            (
                Some(rebuild(node.latch.clone(), new_left, node.right.clone())),
                true,
            )
        }
        Ordering::Greater => {
            let (new_right, removed) = delete_node(node.right.as_ref(), latch);
            if !removed {
                return (Some(Arc::clone(node)), false);
            }
            (
                Some(rebuild(node.latch.clone(), node.left.clone(), new_right)),
                true,
            )
        }
        Ordering::Equal => match (&node.left, &node.right) {
            (None, right) => (right.clone(), true),
            (left, None) => (left.clone(), true),
            (Some(left), Some(right)) => {
                let (new_right, successor) = take_min(right);
                (
                    Some(rebuild(successor, Some(Arc::clone(left)), new_right)),
                    true,
                )
            }
        },
    }
}

/// Ordered latch tree with O(1) copy-on-write clone and overlap iteration.
#[derive(Clone, Default)]
pub(crate) struct IntervalTree {
    root: Option<Arc<Node>>,
    len: usize,
}

impl IntervalTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn insert(&mut self, latch: Arc<Latch>) {
        self.root = Some(insert_node(self.root.as_ref(), latch));
        self.len += 1;
    }

    /// Remove the latch with the same span start and id. Returns whether the
    /// latch was present.
    pub(crate) fn delete(&mut self, latch: &Latch) -> bool {
        let (new_root, removed) = delete_node(self.root.as_ref(), latch);
        if removed {
            self.root = new_root;
            self.len -= 1;
        }
        removed
    }

    /// Iterate over all latches whose span overlaps `span`, in no particular
    /// order.
    pub(crate) fn overlaps(&self, span: &Span) -> Overlaps<'_> {
        let mut stack = Vec::new();
        if let Some(root) = &self.root {
            stack.push(root.as_ref());
        }
        Overlaps {
            stack,
            start: span.key.clone(),
            end: span.effective_end(),
        }
    }
}

pub(crate) struct Overlaps<'a> {
    stack: Vec<&'a Node>,
    start: Bytes,
    end: Bytes,
}

impl<'a> Iterator for Overlaps<'a> {
    type Item = &'a Arc<Latch>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if node.max_end <= self.start {
                // Every span in this subtree ends at or before the query
                // start.
                continue;
            }
            if let Some(left) = &node.left {
                self.stack.push(left.as_ref());
            }
            let starts_before_end = node.latch.span().key < self.end;
            if starts_before_end {
                if let Some(right) = &node.right {
                    self.stack.push(right.as_ref());
                }
                if *node.latch.end() > self.start {
                    return Some(&node.latch);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::signal::Signal;
    use super::*;
    use crate::common::hlc::Timestamp;

    fn latch(start: &[u8], end: &[u8], id: u64) -> Arc<Latch> {
        let span = if end.is_empty() {
            Span::point(start.to_vec())
        } else {
            Span::range(start.to_vec(), end.to_vec())
        };
        let latch = Latch::new(span, Timestamp::EMPTY, Arc::new(Signal::new()));
        latch.set_id(id);
        Arc::new(latch)
    }

    fn overlap_ids(tree: &IntervalTree, span: &Span) -> Vec<u64> {
        let mut ids: Vec<u64> = tree.overlaps(span).map(|l| l.id()).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn overlap_iteration_finds_exactly_the_overlaps() {
        let mut tree = IntervalTree::new();
        tree.insert(latch(b"a", b"c", 1));
        tree.insert(latch(b"b", b"f", 2));
        tree.insert(latch(b"d", b"", 3));
        tree.insert(latch(b"x", b"z", 4));

        assert_eq!(overlap_ids(&tree, &Span::range(&b"b"[..], &b"e"[..])), vec![1, 2, 3]);
        assert_eq!(overlap_ids(&tree, &Span::point(&b"a"[..])), vec![1]);
        assert_eq!(overlap_ids(&tree, &Span::point(&b"c"[..])), vec![2]);
        assert_eq!(overlap_ids(&tree, &Span::range(&b"y"[..], &b"}"[..])), vec![4]);
        assert!(overlap_ids(&tree, &Span::point(&b"w"[..])).is_empty());
    }

    #[test]
    fn delete_removes_only_the_identified_latch() {
        let mut tree = IntervalTree::new();
        let kept = latch(b"a", b"c", 1);
        let removed = latch(b"a", b"c", 2);
        tree.insert(Arc::clone(&kept));
        tree.insert(Arc::clone(&removed));
        assert_eq!(tree.len(), 2);

        assert!(tree.delete(&removed));
        assert!(!tree.delete(&removed));
        assert_eq!(tree.len(), 1);
        assert_eq!(overlap_ids(&tree, &Span::point(&b"b"[..])), vec![1]);
    }

    #[test]
    fn clone_is_a_stable_snapshot() {
        let mut tree = IntervalTree::new();
        for i in 0..64u64 {
            tree.insert(latch(&[i as u8], b"", i));
        }
        let snapshot = tree.clone();

        for i in 0..32u64 {
            let doomed = latch(&[i as u8], b"", i);
            assert!(tree.delete(&doomed));
        }
        tree.insert(latch(b"zz", b"", 1000));

        assert_eq!(snapshot.len(), 64);
        for i in 0..64u64 {
            assert_eq!(
                overlap_ids(&snapshot, &Span::point(vec![i as u8])),
                vec![i],
                "snapshot lost key {i}"
            );
        }
        assert!(overlap_ids(&snapshot, &Span::point(&b"zz"[..])).is_empty());
        assert_eq!(tree.len(), 33);
    }

    #[test]
    fn large_insert_delete_mix_stays_balanced() {
        let mut tree = IntervalTree::new();
        let n = 512u64;
        for i in 0..n {
            tree.insert(latch(format!("{i:04}").as_bytes(), b"", i));
        }
        // Delete every other entry.
        for i in (0..n).step_by(2) {
            assert!(tree.delete(&latch(format!("{i:04}").as_bytes(), b"", i)));
        }
        assert_eq!(tree.len(), n as usize / 2);
        for i in 0..n {
            let found = overlap_ids(&tree, &Span::point(format!("{i:04}").into_bytes()));
            if i % 2 == 0 {
                assert!(found.is_empty());
            } else {
                assert_eq!(found, vec![i]);
            }
        }
    }
}
