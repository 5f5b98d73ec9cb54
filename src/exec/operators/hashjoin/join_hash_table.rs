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
//! Bucket-chained hash table for the equality hash join.
//!
//! Responsibilities:
//! - Accumulates build-side rows and threads them into per-bucket chains
//!   addressed by 1-based key ids (0 is the "no match" sentinel).
//! - Runs the batched probe loops: bucket lookup, vectorized key equality,
//!   chain advancement, and lazy construction of the identical-key list for
//!   non-distinct build sides.
//!
//! Key exported interfaces:
//! - Types: `JoinHashTable`.
//!
//! Current limitations:
//! - Key ids are confined to chains of fully non-null key tuples; null-keyed
//!   build rows are retained for outer-join emission only.

use std::mem;
use std::sync::Arc;

use arrow::compute::concat_batches;

use crate::basalt_logging::debug;
use crate::exec::chunk::Chunk;
use crate::runtime::mem_tracker::MemTracker;

use super::key_view::{KeyArrayView, build_key_views, hash_key_row, row_has_null_key, supports_key_type};
use arrow::datatypes::SchemaRef;

/// Columnar bucket-chained hash index over the build side's equality columns,
/// plus the retained build-side payload rows.
pub(super) struct JoinHashTable {
    build_schema: SchemaRef,
    eq_cols: Vec<usize>,
    bucket_mask: u64,
    chunk_size: usize,

    // Build-side accumulation. `pending` holds drained chunks until
    // `finalize_build` concatenates them into `vals`.
    pending: Vec<Chunk>,
    row_count: usize,
    vals: Option<Chunk>,

    // Chain state. `first` is indexed by bucket, `next`/`same`/`visited` by
    // key id; slot 0 of the key-id arrays is the wasted sentinel row.
    first: Vec<u64>,
    pub(super) next: Vec<u64>,
    pub(super) same: Vec<u64>,
    visited: Vec<bool>,

    // Probe scratch, sized once to the vector chunk size.
    buckets: Vec<u64>,
    pub(super) group_id: Vec<u64>,
    pub(super) head_id: Vec<u64>,
    to_check: Vec<u16>,
    differs: Vec<bool>,

    mem_tracker: Option<Arc<MemTracker>>,
    accounted_bytes: i64,
}

impl JoinHashTable {
    pub(super) fn try_new(
        build_schema: SchemaRef,
        eq_cols: Vec<usize>,
        bucket_count: usize,
        chunk_size: usize,
    ) -> Result<Self, String> {
        if eq_cols.is_empty() {
            return Err("join hash table requires join keys".to_string());
        }
        if !bucket_count.is_power_of_two() {
            return Err(format!(
                "join hash table bucket count {bucket_count} must be a power of two"
            ));
        }
        if chunk_size == 0 || chunk_size > u16::MAX as usize {
            return Err(format!(
                "join hash table chunk size {chunk_size} outside the 16-bit row index range"
            ));
        }
        for &col in &eq_cols {
            let field = build_schema.fields().get(col).ok_or_else(|| {
                format!(
                    "join key column index {col} out of bounds ({} columns)",
                    build_schema.fields().len()
                )
            })?;
            if !supports_key_type(field.data_type()) {
                return Err(format!(
                    "unsupported join key type {} for column {}",
                    field.data_type(),
                    field.name()
                ));
            }
        }
        Ok(Self {
            build_schema,
            eq_cols,
            bucket_mask: bucket_count as u64 - 1,
            chunk_size,
            pending: Vec::new(),
            row_count: 0,
            vals: None,
            first: Vec::new(),
            next: Vec::new(),
            same: Vec::new(),
            visited: Vec::new(),
            buckets: vec![0; chunk_size],
            group_id: vec![0; chunk_size],
            head_id: vec![0; chunk_size],
            to_check: vec![0; chunk_size],
            differs: vec![false; chunk_size],
            mem_tracker: None,
            accounted_bytes: 0,
        })
    }

    pub(super) fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        if let Some(current) = self.mem_tracker.as_ref() {
            if Arc::ptr_eq(current, &tracker) {
                return;
            }
            current.release(self.accounted_bytes);
        }
        let bytes = self.tracked_bytes();
        tracker.consume(bytes);
        self.mem_tracker = Some(tracker);
        self.accounted_bytes = bytes;
    }

    pub(super) fn row_count(&self) -> usize {
        self.row_count
    }

    pub(super) fn vals(&self) -> Result<&Chunk, String> {
        self.vals
            .as_ref()
            .ok_or_else(|| "join hash table used before build finalized".to_string())
    }

    pub(super) fn append_build_chunk(&mut self, chunk: Chunk) -> Result<(), String> {
        if self.vals.is_some() {
            return Err("join hash table already finalized".to_string());
        }
        for (array, field) in chunk.columns().iter().zip(self.build_schema.fields()) {
            if array.data_type() != field.data_type() {
                return Err(format!(
                    "join build chunk column type {} does not match schema type {}",
                    array.data_type(),
                    field.data_type()
                ));
            }
        }
        self.row_count += chunk.len();
        self.pending.push(chunk);
        Ok(())
    }

    /// Concatenate the accumulated build rows and thread the bucket chains.
    pub(super) fn finalize_build(&mut self) -> Result<(), String> {
        if self.vals.is_some() {
            return Err("join hash table already finalized".to_string());
        }
        let batches: Vec<_> = self.pending.drain(..).map(|c| c.batch).collect();
        let batch = concat_batches(&self.build_schema, batches.iter())
            .map_err(|e| format!("concat join build chunks: {e}"))?;
        let rows = batch.num_rows();
        let vals = Chunk::new(batch);

        self.first = vec![0; self.bucket_mask as usize + 1];
        self.next = vec![0; rows + 1];
        {
            let views = build_key_views(vals.columns(), &self.eq_cols)?;
            for row in 0..rows {
                if row_has_null_key(&views, row) {
                    // Null keys never match; the row stays reachable through
                    // `vals` for unmatched emission only.
                    continue;
                }
                let bucket = (hash_key_row(&views, row) & self.bucket_mask) as usize;
                let key_id = row as u64 + 1;
                self.next[key_id as usize] = self.first[bucket];
                self.first[bucket] = key_id;
            }
        }
        self.vals = Some(vals);
        self.refresh_accounting();
        debug!(
            "join hash table built: rows={} buckets={}",
            rows,
            self.bucket_mask + 1
        );
        Ok(())
    }

    /// Allocate the lazily-threaded identical-key list. Required before
    /// probing a non-distinct build side.
    pub(super) fn allocate_same_and_visited(&mut self) {
        self.same = vec![0; self.row_count + 1];
        self.visited = vec![false; self.row_count + 1];
        self.refresh_accounting();
    }

    /// Fill `buckets` for the first `len` probe rows.
    pub(super) fn compute_buckets(&mut self, probe_keys: &[KeyArrayView<'_>], len: usize) {
        for i in 0..len {
            self.buckets[i] = hash_key_row(probe_keys, i) & self.bucket_mask;
        }
    }

    /// Seed `group_id` from the bucket heads and collect the rows that need
    /// chain walking into `to_check`. `head_id` is cleared for the whole
    /// batch so stale matches from the previous batch cannot leak into
    /// collection. Returns the number of rows to check.
    pub(super) fn lookup_initial(&mut self, probe_keys: &[KeyArrayView<'_>], len: usize) -> u16 {
        debug_assert!(len <= self.chunk_size);
        let mut n_to_check = 0u16;
        for i in 0..len {
            self.head_id[i] = 0;
            if row_has_null_key(probe_keys, i) {
                self.group_id[i] = 0;
                continue;
            }
            let first = self.first[self.buckets[i] as usize];
            self.group_id[i] = first;
            if first != 0 {
                self.to_check[n_to_check as usize] = i as u16;
                n_to_check += 1;
            }
        }
        n_to_check
    }

    /// Distinct-build equality pass: rows whose key matches the build tuple
    /// at their current `group_id` record the match in `head_id` and drop out
    /// of `to_check`; the rest stay for chain advancement.
    pub(super) fn distinct_check(
        &mut self,
        probe_keys: &[KeyArrayView<'_>],
        n_to_check: u16,
    ) -> Result<u16, String> {
        let vals = self
            .vals
            .as_ref()
            .ok_or_else(|| "join hash table used before build finalized".to_string())?;
        let build_keys = build_key_views(vals.columns(), &self.eq_cols)?;
        let n = n_to_check as usize;
        for idx in 0..n {
            let i = self.to_check[idx] as usize;
            self.differs[i] = false;
        }
        for (probe_col, build_col) in probe_keys.iter().zip(build_keys.iter()) {
            for idx in 0..n {
                let i = self.to_check[idx] as usize;
                if self.differs[i] {
                    continue;
                }
                let row = self.group_id[i] as usize - 1;
                if !probe_col.eq_rows(i, build_col, row) {
                    self.differs[i] = true;
                }
            }
        }
        let mut n_differs = 0u16;
        for idx in 0..n {
            let i = self.to_check[idx] as usize;
            if self.differs[i] {
                self.to_check[n_differs as usize] = i as u16;
                n_differs += 1;
            } else {
                self.head_id[i] = self.group_id[i];
            }
        }
        Ok(n_differs)
    }

    /// General equality pass for non-distinct build sides. A match lazily
    /// threads the `same` list of identical build keys and marks the key id
    /// visited; the probing row keeps walking its bucket chain until every
    /// duplicate has been threaded.
    pub(super) fn check(
        &mut self,
        probe_keys: &[KeyArrayView<'_>],
        n_to_check: u16,
    ) -> Result<u16, String> {
        let vals = self
            .vals
            .as_ref()
            .ok_or_else(|| "join hash table used before build finalized".to_string())?;
        let build_keys = build_key_views(vals.columns(), &self.eq_cols)?;
        let n = n_to_check as usize;
        for idx in 0..n {
            let i = self.to_check[idx] as usize;
            self.differs[i] = false;
        }
        for (probe_col, build_col) in probe_keys.iter().zip(build_keys.iter()) {
            for idx in 0..n {
                let i = self.to_check[idx] as usize;
                if self.differs[i] {
                    continue;
                }
                let row = self.group_id[i] as usize - 1;
                if !probe_col.eq_rows(i, build_col, row) {
                    self.differs[i] = true;
                }
            }
        }
        let mut n_differs = 0u16;
        for idx in 0..n {
            let i = self.to_check[idx] as usize;
            if !self.differs[i] {
                let key_id = self.group_id[i];
                if self.head_id[i] == 0 {
                    self.head_id[i] = key_id;
                }
                let first_id = self.head_id[i];
                if !self.visited[key_id as usize] {
                    self.visited[key_id as usize] = true;
                    // Keep probing this chain: other build rows with the same
                    // key may still be unthreaded.
                    self.differs[i] = true;
                    if first_id != key_id {
                        let link = self.same[first_id as usize];
                        self.same[key_id as usize] = link;
                        self.same[first_id as usize] = key_id;
                    }
                }
            }
            if self.differs[i] {
                self.differs[i] = false;
                self.to_check[n_differs as usize] = i as u16;
                n_differs += 1;
            }
        }
        Ok(n_differs)
    }

    /// Advance every undecided row to the next entry of its bucket chain,
    /// dropping rows whose chain is exhausted.
    pub(super) fn find_next(&mut self, n_to_check: u16) -> u16 {
        let mut n_kept = 0u16;
        for idx in 0..n_to_check as usize {
            let i = self.to_check[idx] as usize;
            let next_id = self.next[self.group_id[i] as usize];
            self.group_id[i] = next_id;
            if next_id != 0 {
                self.to_check[n_kept as usize] = i as u16;
                n_kept += 1;
            }
        }
        n_kept
    }

    fn refresh_accounting(&mut self) {
        let Some(tracker) = self.mem_tracker.as_ref() else {
            return;
        };
        let bytes = self.tracked_bytes();
        let delta = bytes - self.accounted_bytes;
        if delta > 0 {
            tracker.consume(delta);
        } else if delta < 0 {
            tracker.release(-delta);
        }
        self.accounted_bytes = bytes;
    }

    fn tracked_bytes(&self) -> i64 {
        fn vec_bytes<T>(v: &Vec<T>) -> i64 {
            let bytes = v.capacity().saturating_mul(mem::size_of::<T>());
            i64::try_from(bytes).unwrap_or(i64::MAX)
        }

        let vals_bytes = self
            .vals
            .as_ref()
            .map(|c| i64::try_from(c.estimated_bytes()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        vals_bytes
            .saturating_add(vec_bytes(&self.first))
            .saturating_add(vec_bytes(&self.next))
            .saturating_add(vec_bytes(&self.same))
            .saturating_add(vec_bytes(&self.visited))
            .saturating_add(vec_bytes(&self.buckets))
            .saturating_add(vec_bytes(&self.group_id))
            .saturating_add(vec_bytes(&self.head_id))
            .saturating_add(vec_bytes(&self.to_check))
            .saturating_add(vec_bytes(&self.differs))
    }
}

impl Drop for JoinHashTable {
    fn drop(&mut self) {
        if let Some(tracker) = self.mem_tracker.as_ref() {
            tracker.release(self.accounted_bytes);
        }
    }
}
