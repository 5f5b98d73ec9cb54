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
//! Vectorized equality hash join.
//!
//! Responsibilities:
//! - Builds a bucket-chained hash table over the right (build) input and
//!   probes it batch-at-a-time with the left input.
//! - Implements inner, left/right/full outer, left semi, and left anti join
//!   modes over a shared probe engine.
//!
//! Key exported interfaces:
//! - Types: `EqHashJoiner`, `JoinType`.
//!
//! Current limitations:
//! - Right semi, right anti, and null-aware anti joins are rejected at
//!   construction; they are planned through other operators.

mod eq_join_op;
mod join_hash_table;
mod join_prober;
mod key_view;

pub use eq_join_op::EqHashJoiner;

/// Logical join mode requested by the planner.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftSemi,
    RightSemi,
    LeftAnti,
    RightAnti,
    NullAwareLeftAnti,
}

pub(crate) fn join_type_str(join_type: JoinType) -> &'static str {
    match join_type {
        JoinType::Inner => "INNER",
        JoinType::LeftOuter => "LEFT OUTER",
        JoinType::RightOuter => "RIGHT OUTER",
        JoinType::FullOuter => "FULL OUTER",
        JoinType::LeftSemi => "LEFT SEMI",
        JoinType::RightSemi => "RIGHT SEMI",
        JoinType::LeftAnti => "LEFT ANTI",
        JoinType::RightAnti => "RIGHT ANTI",
        JoinType::NullAwareLeftAnti => "NULL AWARE LEFT ANTI",
    }
}
