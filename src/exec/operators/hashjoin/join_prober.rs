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
//! Per-batch probe driver for the equality hash join.
//!
//! Responsibilities:
//! - Pulls probe chunks, resolves matches through the hash table's check
//!   loops, and collects `(probe row, build row)` index pairs.
//! - Assembles output chunks by index gather and resumes collection across
//!   calls when one probe chunk produces more matches than the output chunk
//!   bound permits.

use std::sync::Arc;

use arrow::array::{ArrayRef, UInt16Array, UInt64Array, new_null_array};
use arrow::compute::take;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::exec::chunk::Chunk;
use crate::exec::operators::ChunkSource;

use super::JoinType;
use super::join_hash_table::JoinHashTable;
use super::key_view::build_key_views;

/// Probe-phase state: match index pairs, outer-join bookkeeping, and the
/// split-resumption cursor.
pub(super) struct JoinProber {
    join_type: JoinType,
    right_distinct: bool,
    left_outer: bool,
    right_outer: bool,
    left_eq_cols: Vec<usize>,
    left_out_cols: Vec<usize>,
    right_out_cols: Vec<usize>,
    output_schema: SchemaRef,
    chunk_size: usize,
    output_batch_size: usize,

    // Matching row index pairs used to stitch the output together. Probe
    // indices address the current chunk and fit in 16 bits; build indices
    // address the whole build side and need 64.
    build_idx: Vec<u64>,
    probe_idx: Vec<u16>,

    // Left-outer: marks output slots whose build columns must be null.
    probe_row_unmatched: Vec<bool>,
    // Right-outer: marks build rows that matched at least once; the rest are
    // emitted after the probe stream ends.
    pub(super) build_row_matched: Vec<bool>,

    // A probe chunk whose match list overflowed the output bound, and the
    // probe row to resume collection from.
    prev_chunk: Option<Chunk>,
    prev_resume_idx: usize,
}

impl JoinProber {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        join_type: JoinType,
        right_distinct: bool,
        left_outer: bool,
        right_outer: bool,
        left_eq_cols: Vec<usize>,
        left_out_cols: Vec<usize>,
        right_out_cols: Vec<usize>,
        output_schema: SchemaRef,
        chunk_size: usize,
    ) -> Self {
        let capacity = chunk_size;
        Self {
            join_type,
            right_distinct,
            left_outer,
            right_outer,
            left_eq_cols,
            left_out_cols,
            right_out_cols,
            output_schema,
            chunk_size,
            output_batch_size: chunk_size,
            build_idx: vec![0; capacity],
            probe_idx: vec![0; capacity],
            probe_row_unmatched: if left_outer {
                vec![false; capacity]
            } else {
                Vec::new()
            },
            build_row_matched: Vec::new(),
            prev_chunk: None,
            prev_resume_idx: 0,
        }
    }

    pub(super) fn output_batch_size(&self) -> usize {
        self.output_batch_size
    }

    /// Bounds the multiple-match collection path and unmatched-build
    /// emission. The single-match paths emit at most one row per probe row
    /// and are bounded by the input chunk length instead.
    pub(super) fn set_output_batch_size(&mut self, n: usize) {
        self.output_batch_size = n.clamp(1, self.chunk_size);
    }

    pub(super) fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    pub(super) fn right_out_cols(&self) -> &[usize] {
        &self.right_out_cols
    }

    pub(super) fn build_idx_mut(&mut self) -> &mut [u64] {
        &mut self.build_idx
    }

    pub(super) fn build_idx(&self) -> &[u64] {
        &self.build_idx
    }

    /// Produce the next output chunk for the probe phase. An empty chunk
    /// means the probe source is exhausted.
    pub(super) fn exec(
        &mut self,
        ht: &mut JoinHashTable,
        left: &mut dyn ChunkSource,
    ) -> Result<Chunk, String> {
        if let Some(chunk) = self.prev_chunk.take() {
            // The previous probe chunk produced more matches than one output
            // chunk could hold; keep draining it before pulling new input.
            let n_results = self.collect(ht, &chunk)?;
            return self.congregate(ht, n_results, &chunk);
        }

        loop {
            let chunk = left.next_chunk()?;
            if chunk.is_empty() {
                return Ok(Chunk::empty(self.output_schema.clone()));
            }
            let batch_size = chunk.len();
            if batch_size > self.chunk_size {
                return Err(format!(
                    "probe chunk of {batch_size} rows exceeds the vector chunk size {}",
                    self.chunk_size
                ));
            }

            {
                let probe_keys = build_key_views(chunk.columns(), &self.left_eq_cols)?;
                ht.compute_buckets(&probe_keys, batch_size);
                let mut n_to_check = ht.lookup_initial(&probe_keys, batch_size);

                if self.right_distinct {
                    while n_to_check > 0 {
                        n_to_check = ht.distinct_check(&probe_keys, n_to_check)?;
                        n_to_check = ht.find_next(n_to_check);
                    }
                } else {
                    while n_to_check > 0 {
                        n_to_check = ht.check(&probe_keys, n_to_check)?;
                        n_to_check = ht.find_next(n_to_check);
                    }
                }
            }

            let n_results = match self.join_type {
                JoinType::LeftAnti => self.anti_collect(ht, &chunk),
                _ if self.right_distinct => self.distinct_collect(ht, &chunk),
                _ => {
                    // Fresh chunk: restart the collection cursor.
                    self.prev_resume_idx = 0;
                    self.collect(ht, &chunk)?
                }
            };

            let out = self.congregate(ht, n_results, &chunk)?;
            if !out.is_empty() {
                return Ok(out);
            }
        }
    }

    /// Collect every match for a non-distinct build side, walking each probe
    /// row's identical-key list. `head_id` is advanced as pairs are emitted
    /// so an overflow resumes mid-list without duplication.
    fn collect(&mut self, ht: &mut JoinHashTable, chunk: &Chunk) -> Result<usize, String> {
        let batch_size = chunk.len();
        let start = self.prev_resume_idx;
        let mut n_results = 0usize;

        if self.left_outer {
            for i in start..batch_size {
                let mut current_id = ht.head_id[i];
                if current_id == 0 {
                    if n_results >= self.output_batch_size {
                        self.save_split(chunk, i);
                        return Ok(n_results);
                    }
                    self.probe_row_unmatched[n_results] = true;
                    self.build_idx[n_results] = 0;
                    self.probe_idx[n_results] = i as u16;
                    n_results += 1;
                    continue;
                }
                while current_id != 0 {
                    if n_results >= self.output_batch_size {
                        self.save_split(chunk, i);
                        return Ok(n_results);
                    }
                    self.probe_row_unmatched[n_results] = false;
                    self.build_idx[n_results] = current_id - 1;
                    self.probe_idx[n_results] = i as u16;
                    current_id = ht.same[current_id as usize];
                    ht.head_id[i] = current_id;
                    n_results += 1;
                }
            }
        } else {
            for i in start..batch_size {
                let mut current_id = ht.head_id[i];
                while current_id != 0 {
                    if n_results >= self.output_batch_size {
                        self.save_split(chunk, i);
                        return Ok(n_results);
                    }
                    self.build_idx[n_results] = current_id - 1;
                    self.probe_idx[n_results] = i as u16;
                    current_id = ht.same[current_id as usize];
                    ht.head_id[i] = current_id;
                    n_results += 1;
                }
            }
        }
        Ok(n_results)
    }

    fn save_split(&mut self, chunk: &Chunk, resume_idx: usize) {
        self.prev_chunk = Some(chunk.clone());
        self.prev_resume_idx = resume_idx;
    }

    /// Collect at most one match per probe row for a distinct build side.
    fn distinct_collect(&mut self, ht: &JoinHashTable, chunk: &Chunk) -> usize {
        let batch_size = chunk.len();
        if self.left_outer {
            for i in 0..batch_size {
                let unmatched = ht.group_id[i] == 0;
                self.probe_row_unmatched[i] = unmatched;
                // Unmatched slots gather build row 0; the null index mask in
                // congregate overrides whatever lands there.
                self.build_idx[i] = if unmatched { 0 } else { ht.group_id[i] - 1 };
                self.probe_idx[i] = i as u16;
            }
            batch_size
        } else {
            let mut n_results = 0usize;
            for i in 0..batch_size {
                let group_id = ht.group_id[i];
                if group_id != 0 {
                    self.build_idx[n_results] = group_id - 1;
                    self.probe_idx[n_results] = i as u16;
                    n_results += 1;
                }
            }
            n_results
        }
    }

    /// Collect the probe rows with no match at all after chain traversal.
    fn anti_collect(&mut self, ht: &JoinHashTable, chunk: &Chunk) -> usize {
        let batch_size = chunk.len();
        let mut n_results = 0usize;
        for i in 0..batch_size {
            if ht.head_id[i] == 0 {
                self.build_idx[n_results] = 0;
                self.probe_idx[n_results] = i as u16;
                n_results += 1;
            }
        }
        n_results
    }

    /// Stitch the collected index pairs into one output chunk: left output
    /// columns gathered from the probe chunk with the 16-bit selection, right
    /// output columns gathered from the build side with the 64-bit selection.
    fn congregate(
        &mut self,
        ht: &JoinHashTable,
        n_results: usize,
        chunk: &Chunk,
    ) -> Result<Chunk, String> {
        if n_results == 0 {
            return Ok(Chunk::empty(self.output_schema.clone()));
        }

        let mut columns: Vec<ArrayRef> =
            Vec::with_capacity(self.left_out_cols.len() + self.right_out_cols.len());

        let probe_idx_arr: ArrayRef =
            Arc::new(UInt16Array::from(self.probe_idx[..n_results].to_vec()));
        for &col in &self.left_out_cols {
            let taken = take(chunk.column(col).as_ref(), &probe_idx_arr, None)
                .map_err(|e| format!("gather probe column {col}: {e}"))?;
            columns.push(taken);
        }

        if !self.right_out_cols.is_empty() {
            let vals = ht.vals()?;
            if vals.is_empty() {
                // Nothing to gather from an empty build side; every slot is a
                // left-outer null extension.
                for &col in &self.right_out_cols {
                    columns.push(new_null_array(
                        vals.schema().field(col).data_type(),
                        n_results,
                    ));
                }
            } else {
                let build_idx_arr: ArrayRef = if self.left_outer {
                    Arc::new(UInt64Array::from_iter((0..n_results).map(|i| {
                        if self.probe_row_unmatched[i] {
                            None
                        } else {
                            Some(self.build_idx[i])
                        }
                    })))
                } else {
                    Arc::new(UInt64Array::from(self.build_idx[..n_results].to_vec()))
                };
                for &col in &self.right_out_cols {
                    let taken = take(vals.column(col).as_ref(), &build_idx_arr, None)
                        .map_err(|e| format!("gather build column {col}: {e}"))?;
                    columns.push(taken);
                }
            }
        }

        if self.right_outer {
            if self.left_outer {
                for i in 0..n_results {
                    if !self.probe_row_unmatched[i] {
                        self.build_row_matched[self.build_idx[i] as usize] = true;
                    }
                }
            } else {
                for i in 0..n_results {
                    self.build_row_matched[self.build_idx[i] as usize] = true;
                }
            }
        }

        let batch = RecordBatch::try_new(self.output_schema.clone(), columns)
            .map_err(|e| format!("assemble join output chunk: {e}"))?;
        Ok(Chunk::new(batch))
    }
}
