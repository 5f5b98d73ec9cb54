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
//! VALUES source operator.
//!
//! Responsibilities:
//! - Produces literal rows as source chunks with deterministic order.
//! - Acts as the finite source behind VALUES plan nodes and operator tests.

use std::collections::VecDeque;

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::operators::ChunkSource;

/// A finite source that emits a fixed sequence of chunks, then empty chunks.
pub struct ValuesSource {
    schema: SchemaRef,
    chunks: VecDeque<Chunk>,
    opened: bool,
}

impl ValuesSource {
    pub fn new(schema: SchemaRef, chunks: Vec<Chunk>) -> Self {
        Self {
            schema,
            chunks: chunks.into(),
            opened: false,
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl ChunkSource for ValuesSource {
    fn open(&mut self) -> Result<(), String> {
        self.opened = true;
        Ok(())
    }

    fn next_chunk(&mut self) -> Result<Chunk, String> {
        if !self.opened {
            return Err("values source used before open".to_string());
        }
        match self.chunks.pop_front() {
            Some(chunk) => Ok(chunk),
            None => Ok(Chunk::empty(self.schema.clone())),
        }
    }
}
