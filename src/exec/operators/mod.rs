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
//! Execution operator module exports.
//!
//! Responsibilities:
//! - Defines the pull-based `ChunkSource` interface connecting operators.
//! - Registers the operator implementations wired by the execution layer.
//!
//! Current limitations:
//! - Unsupported states should be surfaced as explicit runtime errors instead
//!   of fallback behavior.

pub(crate) mod hashjoin;
mod values_source;

pub use hashjoin::{EqHashJoiner, JoinType};
pub use values_source::ValuesSource;

use crate::exec::chunk::Chunk;

/// A pull-based source of chunks. `next_chunk` returning an empty chunk
/// signals that the source is exhausted; callers must not pull past that
/// point.
pub trait ChunkSource: Send {
    fn open(&mut self) -> Result<(), String>;

    fn next_chunk(&mut self) -> Result<Chunk, String>;
}
