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
//! Key spans and the per-scope, per-access span collection declared by an
//! operation before latching.

use std::fmt;

use bytes::Bytes;

/// Number of span scopes. Global and local keys never interfere.
pub const NUM_SPAN_SCOPE: usize = 2;
/// Number of access levels.
pub const NUM_SPAN_ACCESS: usize = 2;

/// Address namespace of a span. Latches in different scopes never block each
/// other.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SpanScope {
    Global = 0,
    Local = 1,
}

impl SpanScope {
    pub const ALL: [SpanScope; NUM_SPAN_SCOPE] = [SpanScope::Global, SpanScope::Local];
}

/// Declared access level of a span.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SpanAccess {
    ReadOnly = 0,
    ReadWrite = 1,
}

impl SpanAccess {
    pub const ALL: [SpanAccess; NUM_SPAN_ACCESS] = [SpanAccess::ReadOnly, SpanAccess::ReadWrite];
}

/// A key interval `[key, end_key)`. An empty `end_key` denotes the span of
/// the single key `key`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Span {
    pub key: Bytes,
    pub end_key: Bytes,
}

impl Span {
    /// Span covering exactly one key.
    pub fn point(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            end_key: Bytes::new(),
        }
    }

    /// Span covering `[start, end)`.
    pub fn range(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            key: start.into(),
            end_key: end.into(),
        }
    }

    /// Exclusive end of the span. A point span ends just past its key.
    pub(crate) fn effective_end(&self) -> Bytes {
        if self.end_key.is_empty() {
            let mut next = Vec::with_capacity(self.key.len() + 1);
            next.extend_from_slice(&self.key);
            next.push(0);
            Bytes::from(next)
        } else {
            self.end_key.clone()
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.end_key.is_empty() {
            write!(f, "[{:?}]", self.key)
        } else {
            write!(f, "[{:?},{:?})", self.key, self.end_key)
        }
    }
}

/// The set of spans an operation declares before acquiring latches, bucketed
/// by access level and scope.
#[derive(Clone, Debug, Default)]
pub struct SpanSet {
    spans: [[Vec<Span>; NUM_SPAN_SCOPE]; NUM_SPAN_ACCESS],
}

impl SpanSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, access: SpanAccess, scope: SpanScope, span: Span) {
        self.spans[access as usize][scope as usize].push(span);
    }

    pub fn get(&self, access: SpanAccess, scope: SpanScope) -> &[Span] {
        &self.spans[access as usize][scope as usize]
    }

    pub fn len(&self) -> usize {
        self.spans.iter().flatten().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_span_effective_end_is_key_successor() {
        let span = Span::point(&b"abc"[..]);
        assert_eq!(span.effective_end().as_ref(), b"abc\0");
    }

    #[test]
    fn range_span_keeps_declared_end() {
        let span = Span::range(&b"a"[..], &b"m"[..]);
        assert_eq!(span.effective_end().as_ref(), b"m");
    }

    #[test]
    fn span_set_buckets_by_access_and_scope() {
        let mut spans = SpanSet::new();
        spans.add(SpanAccess::ReadOnly, SpanScope::Global, Span::point(&b"a"[..]));
        spans.add(SpanAccess::ReadWrite, SpanScope::Local, Span::point(&b"b"[..]));
        assert_eq!(spans.get(SpanAccess::ReadOnly, SpanScope::Global).len(), 1);
        assert_eq!(spans.get(SpanAccess::ReadWrite, SpanScope::Local).len(), 1);
        assert_eq!(spans.get(SpanAccess::ReadWrite, SpanScope::Global).len(), 0);
        assert_eq!(spans.len(), 2);
    }
}
