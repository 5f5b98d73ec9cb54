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
//! Equality hash join operator.
//!
//! Responsibilities:
//! - Drives the build / probe / emit-unmatched state machine over the two
//!   input sources and returns one output chunk per `next_chunk` call.
//! - Derives the operator configuration (outer sides, output columns,
//!   distinct-build shortcut) from the requested join type.

use std::sync::Arc;

use arrow::array::{ArrayRef, UInt64Array, new_null_array};
use arrow::compute::take;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::basalt_config;
use crate::basalt_logging::debug;
use crate::exec::chunk::Chunk;
use crate::exec::operators::ChunkSource;
use crate::runtime::mem_tracker::MemTracker;

use super::join_hash_table::JoinHashTable;
use super::join_prober::JoinProber;
use super::{JoinType, join_type_str};

/// State of the hash join operator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum HashJoinerState {
    /// Draining the build side and constructing the hash table.
    Building,
    /// Probing the hash table batch-at-a-time with the left side.
    Probing,
    /// Emitting never-matched build rows after the probe stream ended. Only
    /// reached for right/full outer joins.
    EmittingUnmatched,
}

/// Vectorized equality hash join operator. The hash table is built on the
/// right source; the left source probes it. Output columns are the left
/// source columns followed by the right source columns, except for semi and
/// anti joins which project the left side only. Within one output chunk there
/// is no cross-row ordering contract.
pub struct EqHashJoiner {
    left: Box<dyn ChunkSource>,
    right: Box<dyn ChunkSource>,

    join_type: JoinType,
    right_distinct: bool,
    right_outer: bool,
    left_schema: SchemaRef,
    left_out_cols: Vec<usize>,

    ht: JoinHashTable,
    prober: JoinProber,
    state: HashJoinerState,

    /// Build-side cursor for the emit-unmatched phase, preserved across
    /// calls.
    emitting_unmatched_row_idx: usize,
}

impl std::fmt::Debug for EqHashJoiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EqHashJoiner")
            .field("join_type", &self.join_type)
            .field("right_distinct", &self.right_distinct)
            .field("right_outer", &self.right_outer)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl EqHashJoiner {
    /// Create an equality hash join over the two sources. `left_eq_cols` and
    /// `right_eq_cols` pair up positionally and must have matching types.
    /// `right_distinct` declares that the build-side key tuples are unique,
    /// which enables the single-match probe path; it is forced for semi
    /// joins.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        left: Box<dyn ChunkSource>,
        right: Box<dyn ChunkSource>,
        left_eq_cols: Vec<usize>,
        right_eq_cols: Vec<usize>,
        left_schema: SchemaRef,
        right_schema: SchemaRef,
        right_distinct: bool,
        join_type: JoinType,
    ) -> Result<Self, String> {
        let mut left_outer = false;
        let mut right_outer = false;
        let mut right_distinct = right_distinct;
        let left_out_cols: Vec<usize> = (0..left_schema.fields().len()).collect();
        let mut right_out_cols: Vec<usize> = (0..right_schema.fields().len()).collect();
        match join_type {
            JoinType::Inner => {}
            JoinType::LeftOuter => left_outer = true,
            JoinType::RightOuter => right_outer = true,
            JoinType::FullOuter => {
                left_outer = true;
                right_outer = true;
            }
            JoinType::LeftSemi => {
                // One match per build key is all a semi join can use, so the
                // distinct probe path is always safe here.
                right_distinct = true;
                right_out_cols.clear();
            }
            JoinType::LeftAnti => {
                right_out_cols.clear();
            }
            JoinType::RightSemi | JoinType::RightAnti | JoinType::NullAwareLeftAnti => {
                return Err(format!(
                    "hash join of type {} not supported",
                    join_type_str(join_type)
                ));
            }
        }

        if left_eq_cols.is_empty() || left_eq_cols.len() != right_eq_cols.len() {
            return Err(format!(
                "hash join key arity mismatch: left={} right={}",
                left_eq_cols.len(),
                right_eq_cols.len()
            ));
        }
        for (&l, &r) in left_eq_cols.iter().zip(right_eq_cols.iter()) {
            let left_field = left_schema
                .fields()
                .get(l)
                .ok_or_else(|| format!("left join key column {l} out of bounds"))?;
            let right_field = right_schema
                .fields()
                .get(r)
                .ok_or_else(|| format!("right join key column {r} out of bounds"))?;
            if left_field.data_type() != right_field.data_type() {
                return Err(format!(
                    "join key type mismatch: {} vs {}",
                    left_field.data_type(),
                    right_field.data_type()
                ));
            }
        }

        let cfg = basalt_config::init_from_env_or_default()
            .map_err(|e| format!("load exec config: {e:#}"))?;
        let chunk_size = cfg.exec.chunk_size;
        let bucket_count = cfg.exec.hash_join_bucket_count;

        let ht = JoinHashTable::try_new(
            Arc::clone(&right_schema),
            right_eq_cols,
            bucket_count,
            chunk_size,
        )?;

        let mut fields = Vec::with_capacity(left_out_cols.len() + right_out_cols.len());
        for &col in &left_out_cols {
            let field = left_schema.field(col).clone();
            // The null-extended side of an outer join must admit nulls even
            // if the source column does not.
            fields.push(if right_outer {
                field.with_nullable(true)
            } else {
                field
            });
        }
        for &col in &right_out_cols {
            let field = right_schema.field(col).clone();
            fields.push(if left_outer {
                field.with_nullable(true)
            } else {
                field
            });
        }
        let output_schema = Arc::new(Schema::new(fields));

        let prober = JoinProber::new(
            join_type,
            right_distinct,
            left_outer,
            right_outer,
            left_eq_cols,
            left_out_cols.clone(),
            right_out_cols,
            output_schema,
            chunk_size,
        );

        Ok(Self {
            left,
            right,
            join_type,
            right_distinct,
            right_outer,
            left_schema,
            left_out_cols,
            ht,
            prober,
            state: HashJoinerState::Building,
            emitting_unmatched_row_idx: 0,
        })
    }

    pub fn output_schema(&self) -> SchemaRef {
        self.prober.output_schema()
    }

    /// Bound the number of rows per output chunk. Defaults to the configured
    /// vector chunk size.
    pub fn set_output_batch_size(&mut self, n: usize) {
        self.prober.set_output_batch_size(n);
    }

    /// Account the hash table's memory against `tracker`.
    pub fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.ht.set_mem_tracker(tracker);
    }

    pub fn open(&mut self) -> Result<(), String> {
        self.left.open()?;
        self.right.open()
    }

    /// Return the next output chunk. An empty chunk signals end-of-stream.
    pub fn next_chunk(&mut self) -> Result<Chunk, String> {
        loop {
            match self.state {
                HashJoinerState::Building => {
                    self.build()?;
                }
                HashJoinerState::Probing => {
                    let out = self.prober.exec(&mut self.ht, self.left.as_mut())?;
                    if out.is_empty() && self.right_outer {
                        debug!(
                            "hash join probe exhausted, emitting unmatched build rows: rows={}",
                            self.ht.row_count()
                        );
                        self.state = HashJoinerState::EmittingUnmatched;
                        continue;
                    }
                    return Ok(out);
                }
                HashJoinerState::EmittingUnmatched => {
                    return self.emit_unmatched();
                }
            }
        }
    }

    fn build(&mut self) -> Result<(), String> {
        loop {
            let chunk = self.right.next_chunk()?;
            if chunk.is_empty() {
                break;
            }
            self.ht.append_build_chunk(chunk)?;
        }
        self.ht.finalize_build()?;
        if !self.right_distinct {
            self.ht.allocate_same_and_visited();
        }
        if self.right_outer {
            self.prober.build_row_matched = vec![false; self.ht.row_count()];
        }
        debug!(
            "hash join build complete: join_type={} rows={}",
            join_type_str(self.join_type),
            self.ht.row_count()
        );
        self.state = HashJoinerState::Probing;
        Ok(())
    }

    /// Emit build rows that never matched, null-extending the probe columns.
    /// The cursor survives across calls so each chunk picks up where the
    /// previous one stopped.
    fn emit_unmatched(&mut self) -> Result<Chunk, String> {
        let row_count = self.ht.row_count();
        let limit = self.prober.output_batch_size();
        let mut n_results = 0usize;
        while n_results < limit && self.emitting_unmatched_row_idx < row_count {
            if !self.prober.build_row_matched[self.emitting_unmatched_row_idx] {
                self.prober.build_idx_mut()[n_results] = self.emitting_unmatched_row_idx as u64;
                n_results += 1;
            }
            self.emitting_unmatched_row_idx += 1;
        }
        if n_results == 0 {
            return Ok(Chunk::empty(self.prober.output_schema()));
        }

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(
            self.left_out_cols.len() + self.prober.right_out_cols().len(),
        );
        for &col in &self.left_out_cols {
            columns.push(new_null_array(
                self.left_schema.field(col).data_type(),
                n_results,
            ));
        }
        let vals = self.ht.vals()?;
        let build_idx_arr: ArrayRef = Arc::new(UInt64Array::from(
            self.prober.build_idx()[..n_results].to_vec(),
        ));
        for &col in self.prober.right_out_cols() {
            let taken = take(vals.column(col).as_ref(), &build_idx_arr, None)
                .map_err(|e| format!("gather unmatched build column {col}: {e}"))?;
            columns.push(taken);
        }

        let batch = RecordBatch::try_new(self.prober.output_schema(), columns)
            .map_err(|e| format!("assemble unmatched build chunk: {e}"))?;
        Ok(Chunk::new(batch))
    }
}
