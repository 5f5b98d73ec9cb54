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
//! Span latch manager.
//!
//! A [`LatchManager`] maintains per-scope interval trees of key-span latches.
//! Acquiring latches waits for all already-acquired, overlapping, interfering
//! latches to be released.
//!
//! Concurrent access is made efficient with a copy-on-write technique:
//! mutual exclusion is limited to updating the trees and grabbing immutable
//! snapshots, so the work performed under the mutex is linear in the number
//! of spans an acquisition declares, NOT in the number of other in-flight
//! acquisitions it will wait on. Scanning for and waiting on prerequisite
//! latches happens entirely outside the mutex, against the snapshot.
//!
//! Reads are kept out of the read tree until a later writer forces a
//! snapshot: read-vs-read never interferes, so read-only workloads skip tree
//! maintenance entirely.

mod interval_tree;
pub mod signal;
pub mod spanset;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use thiserror::Error;

use crate::basalt_logging::trace;
use interval_tree::IntervalTree;
use signal::Signal;
use spanset::{NUM_SPAN_ACCESS, NUM_SPAN_SCOPE};

pub use crate::common::hlc::Timestamp;
pub use signal::{CancelHandle, CancelToken, cancel_pair};
pub use spanset::{Span, SpanAccess, SpanScope, SpanSet};

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum LatchError {
    /// The cancellation token fired while waiting for conflicting latches.
    #[error("latch acquisition canceled")]
    Canceled,
}

/// The latching of a single key span. Stored in the manager's trees and in
/// snapshots as `Arc<Latch>`; owned by exactly one [`LatchGuard`] for its
/// lifetime.
#[derive(Debug)]
pub(crate) struct Latch {
    /// Assigned under the manager mutex, monotonically increasing across all
    /// inserts.
    id: AtomicU64,
    span: Span,
    end: Bytes,
    ts: Timestamp,
    done: Arc<Signal>,
}

impl Latch {
    pub(crate) fn new(span: Span, ts: Timestamp, done: Arc<Signal>) -> Self {
        let end = span.effective_end();
        Self {
            id: AtomicU64::new(0),
            span,
            end,
            ts,
            done,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_id(&self, id: u64) {
        self.id.store(id, Ordering::Relaxed);
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Cached exclusive end key of the span.
    pub(crate) fn end(&self) -> &Bytes {
        &self.end
    }
}

/// A handle to a set of acquired latches: the latches bucketed by scope and
/// access, plus the single completion signal they all share. Returned by
/// [`LatchManager::acquire`] and consumed by [`LatchManager::release`].
#[derive(Debug)]
pub struct LatchGuard {
    done: Arc<Signal>,
    // Most acquisitions declare a handful of spans; the inline capacity keeps
    // them off the heap.
    latches: [[SmallVec<[Arc<Latch>; 2]>; NUM_SPAN_ACCESS]; NUM_SPAN_SCOPE],
}

impl LatchGuard {
    fn new(spans: &SpanSet, ts: Timestamp) -> Self {
        let done = Arc::new(Signal::new());
        let mut latches: [[SmallVec<[Arc<Latch>; 2]>; NUM_SPAN_ACCESS]; NUM_SPAN_SCOPE] =
            std::array::from_fn(|_| std::array::from_fn(|_| SmallVec::new()));
        for scope in SpanScope::ALL {
            for access in SpanAccess::ALL {
                for span in spans.get(access, scope) {
                    latches[scope as usize][access as usize].push(Arc::new(Latch::new(
                        span.clone(),
                        if_global(ts, scope),
                        Arc::clone(&done),
                    )));
                }
            }
        }
        Self { done, latches }
    }

    fn latches(&self, scope: SpanScope, access: SpanAccess) -> &[Arc<Latch>] {
        &self.latches[scope as usize][access as usize]
    }
}

/// A latch manager scoped to either global or local keys.
struct ScopedManager {
    /// Read latches not yet flushed into the read tree, keyed by latch id.
    /// They only enter the tree when a later writer captures a snapshot.
    read_set: HashMap<u64, Arc<Latch>>,
    trees: [IntervalTree; NUM_SPAN_ACCESS],
}

impl Default for ScopedManager {
    fn default() -> Self {
        Self {
            read_set: HashMap::new(),
            trees: std::array::from_fn(|_| IntervalTree::new()),
        }
    }
}

impl ScopedManager {
    fn flush_read_set(&mut self) {
        for (_, latch) in self.read_set.drain() {
            self.trees[SpanAccess::ReadOnly as usize].insert(latch);
        }
    }
}

/// Immutable view into the manager's trees, captured under the mutex and
/// discarded after waiting. Cloned trees are stable: releases that happen
/// after the capture are still observed through each latch's signal, never
/// through tree mutation.
struct LatchSnapshot {
    trees: [[IntervalTree; NUM_SPAN_ACCESS]; NUM_SPAN_SCOPE],
}

impl Default for LatchSnapshot {
    fn default() -> Self {
        Self {
            trees: std::array::from_fn(|_| std::array::from_fn(|_| IntervalTree::new())),
        }
    }
}

struct ManagerInner {
    id_alloc: u64,
    scopes: [ScopedManager; NUM_SPAN_SCOPE],
}

impl Default for ManagerInner {
    fn default() -> Self {
        Self {
            id_alloc: 0,
            scopes: std::array::from_fn(|_| ScopedManager::default()),
        }
    }
}

impl ManagerInner {
    /// Capture the trees a caller with these spans must wait against. A
    /// writer forces the scope's read set into the read tree first so the
    /// clone sees every outstanding read.
    fn snapshot(&mut self, spans: &SpanSet) -> LatchSnapshot {
        let mut snap = LatchSnapshot::default();
        for scope in SpanScope::ALL {
            let s = scope as usize;
            let reading = !spans.get(SpanAccess::ReadOnly, scope).is_empty();
            let writing = !spans.get(SpanAccess::ReadWrite, scope).is_empty();
            let sm = &mut self.scopes[s];
            if writing {
                sm.flush_read_set();
                snap.trees[s][SpanAccess::ReadOnly as usize] =
                    sm.trees[SpanAccess::ReadOnly as usize].clone();
            }
            if writing || reading {
                snap.trees[s][SpanAccess::ReadWrite as usize] =
                    sm.trees[SpanAccess::ReadWrite as usize].clone();
            }
        }
        snap
    }

    fn insert(&mut self, guard: &LatchGuard) {
        for scope in SpanScope::ALL {
            let sm = &mut self.scopes[scope as usize];
            for access in SpanAccess::ALL {
                for latch in guard.latches(scope, access) {
                    self.id_alloc += 1;
                    latch.set_id(self.id_alloc);
                    match access {
                        SpanAccess::ReadOnly => {
                            // Reads stay in the cheap read set until a writer
                            // needs them in tree form.
                            sm.read_set.insert(latch.id(), Arc::clone(latch));
                        }
                        SpanAccess::ReadWrite => {
                            sm.trees[SpanAccess::ReadWrite as usize].insert(Arc::clone(latch));
                        }
                    }
                }
            }
        }
    }

    fn remove(&mut self, guard: &LatchGuard) {
        for scope in SpanScope::ALL {
            let sm = &mut self.scopes[scope as usize];
            for access in SpanAccess::ALL {
                for latch in guard.latches(scope, access) {
                    match access {
                        SpanAccess::ReadOnly => {
                            // The read either still sits in the read set or a
                            // writer flushed it into the read tree.
                            if sm.read_set.remove(&latch.id()).is_none() {
                                sm.trees[SpanAccess::ReadOnly as usize].delete(latch);
                            }
                        }
                        SpanAccess::ReadWrite => {
                            sm.trees[SpanAccess::ReadWrite as usize].delete(latch);
                        }
                    }
                }
            }
        }
    }
}

/// Maintains an interval tree of key-span latches per scope and access
/// level. Safe for concurrent use; the zero value is ready to use.
#[derive(Default)]
pub struct LatchManager {
    mu: Mutex<ManagerInner>,
}

impl LatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire latches for each of the provided spans at the given
    /// timestamp, waiting until no earlier interfering latch is held. If
    /// `cancel` fires while waiting, every latch inserted by this call is
    /// released and [`LatchError::Canceled`] is returned.
    pub fn acquire(
        &self,
        spans: &SpanSet,
        ts: Timestamp,
        cancel: &CancelToken,
    ) -> Result<LatchGuard, LatchError> {
        let (guard, snap) = self.sequence(spans, ts);
        let res = wait(&guard, ts, &snap, cancel);
        drop(snap);
        match res {
            Ok(()) => Ok(guard),
            Err(err) => {
                self.release(guard);
                Err(err)
            }
        }
    }

    /// Lock, capture a snapshot, insert the new latches, unlock. This is the
    /// linearization point ordering concurrent acquisitions: a latch
    /// sequenced earlier never sees a later latch in its snapshot, and a
    /// later latch always sees the earlier one.
    fn sequence(&self, spans: &SpanSet, ts: Timestamp) -> (LatchGuard, LatchSnapshot) {
        let guard = LatchGuard::new(spans, ts);
        let mut inner = self.mu.lock();
        let snap = inner.snapshot(spans);
        inner.insert(&guard);
        (guard, snap)
    }

    /// Release the latches held by `guard`, waking all dependent
    /// acquisitions.
    pub fn release(&self, guard: LatchGuard) {
        guard.done.signal();
        let mut inner = self.mu.lock();
        inner.remove(&guard);
    }
}

/// Timestamps only filter interference for global keys; all local latches
/// interfere regardless of timestamp.
fn if_global(ts: Timestamp, scope: SpanScope) -> Timestamp {
    match scope {
        SpanScope::Global => ts,
        SpanScope::Local => Timestamp::EMPTY,
    }
}

/// Interference filter given the acquiring timestamp and a held latch's
/// timestamp. An empty timestamp on either side interferes with everything.
type IgnoreFn = fn(Timestamp, Timestamp) -> bool;

/// A reader skips writers at strictly later timestamps: it cannot see their
/// effect.
fn ignore_later(ts: Timestamp, other: Timestamp) -> bool {
    !ts.is_empty() && ts.less(other)
}

/// A writer skips readers at strictly earlier timestamps: they cannot see
/// its effect.
fn ignore_earlier(ts: Timestamp, other: Timestamp) -> bool {
    !other.is_empty() && other.less(ts)
}

fn ignore_nothing(_ts: Timestamp, _other: Timestamp) -> bool {
    false
}

/// Wait for all interfering latches in the snapshot to be released.
fn wait(
    guard: &LatchGuard,
    ts: Timestamp,
    snap: &LatchSnapshot,
    cancel: &CancelToken,
) -> Result<(), LatchError> {
    for scope in SpanScope::ALL {
        let trees = &snap.trees[scope as usize];
        for access in SpanAccess::ALL {
            for latch in guard.latches(scope, access) {
                match access {
                    SpanAccess::ReadOnly => {
                        // Wait for writes at equal or lower timestamps.
                        iter_and_wait(
                            &trees[SpanAccess::ReadWrite as usize],
                            latch,
                            ts,
                            ignore_later,
                            cancel,
                        )?;
                    }
                    SpanAccess::ReadWrite => {
                        // Wait for all other writes first: writes are held
                        // longer than reads, and waiting on an
                        // already-released latch is cheaper than an
                        // unreleased one.
                        iter_and_wait(
                            &trees[SpanAccess::ReadWrite as usize],
                            latch,
                            ts,
                            ignore_nothing,
                            cancel,
                        )?;
                        // Then for reads at equal or higher timestamps.
                        iter_and_wait(
                            &trees[SpanAccess::ReadOnly as usize],
                            latch,
                            ts,
                            ignore_earlier,
                            cancel,
                        )?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Wait on every latch overlapping `search` that the timestamp filter does
/// not rule out.
fn iter_and_wait(
    tree: &IntervalTree,
    search: &Latch,
    ts: Timestamp,
    ignore: IgnoreFn,
    cancel: &CancelToken,
) -> Result<(), LatchError> {
    for other in tree.overlaps(search.span()) {
        if other.done.signaled() {
            continue;
        }
        if ignore(ts, other.ts) {
            continue;
        }
        wait_on(other, cancel)?;
    }
    Ok(())
}

fn wait_on(latch: &Latch, cancel: &CancelToken) -> Result<(), LatchError> {
    trace!(
        "blocked on conflicting latch: id={} span={}",
        latch.id(),
        latch.span()
    );
    let done = latch.done.wait_channel();
    let Some(cancel_rx) = cancel.wait_channel() else {
        // No cancellation requested; the channel disconnects on release.
        let _ = done.recv();
        return Ok(());
    };
    let mut sel = crossbeam_channel::Select::new();
    let done_op = sel.recv(done);
    let cancel_op = sel.recv(cancel_rx);
    let op = sel.select();
    let index = op.index();
    if index == done_op {
        let _ = op.recv(done);
        Ok(())
    } else {
        debug_assert_eq!(index, cancel_op);
        let _ = op.recv(cancel_rx);
        Err(LatchError::Canceled)
    }
}
