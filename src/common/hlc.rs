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
//! Hybrid-logical clock timestamps.
//!
//! A timestamp orders events by wall time with a logical component breaking
//! ties among events in the same wall tick. The zero value is reserved: it
//! marks a non-MVCC operation that affects all timestamps, and callers must
//! check `is_empty` before applying timestamp-based filtering.

use std::fmt;

/// A hybrid-logical clock reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Nanoseconds since the Unix epoch.
    pub wall_time: i64,
    /// Tie-breaker among events sharing `wall_time`.
    pub logical: i32,
}

impl Timestamp {
    /// The reserved "affects all timestamps" value.
    pub const EMPTY: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };

    pub fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn less(&self, other: Timestamp) -> bool {
        *self < other
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.wall_time, self.logical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_wall_then_logical() {
        let a = Timestamp::new(1, 5);
        let b = Timestamp::new(2, 0);
        let c = Timestamp::new(2, 1);
        assert!(a.less(b));
        assert!(b.less(c));
        assert!(!c.less(a));
    }

    #[test]
    fn empty_is_the_zero_value() {
        assert!(Timestamp::default().is_empty());
        assert!(!Timestamp::new(0, 1).is_empty());
    }
}
