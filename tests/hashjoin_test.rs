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
//! End-to-end tests for the equality hash join operator.

use std::sync::Arc;

use arrow::array::{Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use basalt::exec::chunk::Chunk;
use basalt::exec::operators::{ChunkSource, EqHashJoiner, JoinType, ValuesSource};

fn kv_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, true),
        Field::new("v", DataType::Utf8, true),
    ]))
}

fn k_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("k", DataType::Int64, true)]))
}

fn kv_chunk(keys: Vec<Option<i64>>, vals: Vec<Option<&str>>) -> Chunk {
    let batch = RecordBatch::try_new(
        kv_schema(),
        vec![
            Arc::new(Int64Array::from(keys)),
            Arc::new(StringArray::from(vals)),
        ],
    )
    .expect("record batch");
    Chunk::new(batch)
}

fn k_chunk(keys: Vec<Option<i64>>) -> Chunk {
    let batch = RecordBatch::try_new(k_schema(), vec![Arc::new(Int64Array::from(keys))])
        .expect("record batch");
    Chunk::new(batch)
}

fn kv_source(chunks: Vec<Chunk>) -> Box<dyn ChunkSource> {
    Box::new(ValuesSource::new(kv_schema(), chunks))
}

fn k_source(chunks: Vec<Chunk>) -> Box<dyn ChunkSource> {
    Box::new(ValuesSource::new(k_schema(), chunks))
}

fn kv_joiner(
    left: Vec<Chunk>,
    right: Vec<Chunk>,
    right_distinct: bool,
    join_type: JoinType,
) -> EqHashJoiner {
    EqHashJoiner::try_new(
        kv_source(left),
        kv_source(right),
        vec![0],
        vec![0],
        kv_schema(),
        kv_schema(),
        right_distinct,
        join_type,
    )
    .expect("join construction")
}

fn drain(joiner: &mut EqHashJoiner) -> Vec<Chunk> {
    joiner.open().expect("open");
    let mut out = Vec::new();
    loop {
        let chunk = joiner.next_chunk().expect("next chunk");
        if chunk.is_empty() {
            return out;
        }
        assert!(chunk.len() <= 1024, "output chunk exceeds the batch bound");
        out.push(chunk);
    }
}

fn col_i64(chunk: &Chunk, idx: usize) -> Vec<Option<i64>> {
    let array = chunk
        .column(idx)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("int64 column");
    (0..array.len())
        .map(|i| (!array.is_null(i)).then(|| array.value(i)))
        .collect()
}

fn col_utf8(chunk: &Chunk, idx: usize) -> Vec<Option<String>> {
    let array = chunk
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("utf8 column");
    (0..array.len())
        .map(|i| (!array.is_null(i)).then(|| array.value(i).to_string()))
        .collect()
}

type WideRow = (Option<i64>, Option<String>, Option<i64>, Option<String>);

/// Flatten 4-column (k, v, k, v) output chunks into a sorted row multiset.
fn wide_rows(chunks: &[Chunk]) -> Vec<WideRow> {
    let mut rows = Vec::new();
    for chunk in chunks {
        let k1 = col_i64(chunk, 0);
        let v1 = col_utf8(chunk, 1);
        let k2 = col_i64(chunk, 2);
        let v2 = col_utf8(chunk, 3);
        for i in 0..chunk.len() {
            rows.push((k1[i], v1[i].clone(), k2[i], v2[i].clone()));
        }
    }
    rows.sort();
    rows
}

/// Flatten 2-column (k, v) output chunks into a sorted row multiset.
fn narrow_rows(chunks: &[Chunk]) -> Vec<(Option<i64>, Option<String>)> {
    let mut rows = Vec::new();
    for chunk in chunks {
        let k = col_i64(chunk, 0);
        let v = col_utf8(chunk, 1);
        for i in 0..chunk.len() {
            rows.push((k[i], v[i].clone()));
        }
    }
    rows.sort();
    rows
}

fn owned(s: &str) -> Option<String> {
    Some(s.to_string())
}

#[test]
fn s1_inner_join() {
    let left = vec![kv_chunk(
        vec![Some(1), Some(2), Some(2)],
        vec![Some("a"), Some("b"), Some("c")],
    )];
    let right = vec![kv_chunk(vec![Some(2), Some(3)], vec![Some("x"), Some("y")])];
    let mut joiner = kv_joiner(left, right, true, JoinType::Inner);
    let out = drain(&mut joiner);
    assert_eq!(
        wide_rows(&out),
        vec![
            (Some(2), owned("b"), Some(2), owned("x")),
            (Some(2), owned("c"), Some(2), owned("x")),
        ]
    );
}

#[test]
fn s2_left_outer_join() {
    let left = vec![kv_chunk(
        vec![Some(1), Some(2)],
        vec![Some("a"), Some("b")],
    )];
    let right = vec![kv_chunk(vec![Some(2)], vec![Some("x")])];
    let mut joiner = kv_joiner(left, right, true, JoinType::LeftOuter);
    let out = drain(&mut joiner);
    assert_eq!(
        wide_rows(&out),
        vec![
            (Some(1), owned("a"), None, None),
            (Some(2), owned("b"), Some(2), owned("x")),
        ]
    );
}

#[test]
fn s3_right_outer_join_non_distinct_build() {
    let left = vec![kv_chunk(vec![Some(1)], vec![Some("a")])];
    let right = vec![kv_chunk(
        vec![Some(1), Some(1), Some(2)],
        vec![Some("x"), Some("y"), Some("z")],
    )];
    let mut joiner = kv_joiner(left, right, false, JoinType::RightOuter);
    let out = drain(&mut joiner);
    assert_eq!(
        wide_rows(&out),
        vec![
            (None, None, Some(2), owned("z")),
            (Some(1), owned("a"), Some(1), owned("x")),
            (Some(1), owned("a"), Some(1), owned("y")),
        ]
    );
}

#[test]
fn s4_batch_split_resumes_across_calls() {
    let left = vec![kv_chunk(vec![Some(1)], vec![Some("a")])];
    let right = vec![kv_chunk(
        vec![Some(1), Some(1), Some(1)],
        vec![Some("x"), Some("y"), Some("z")],
    )];
    let mut joiner = kv_joiner(left, right, false, JoinType::Inner);
    joiner.set_output_batch_size(2);
    joiner.open().expect("open");

    let first = joiner.next_chunk().expect("first");
    assert_eq!(first.len(), 2);
    let second = joiner.next_chunk().expect("second");
    assert_eq!(second.len(), 1);
    let third = joiner.next_chunk().expect("third");
    assert!(third.is_empty());

    let rows = wide_rows(&[first, second]);
    assert_eq!(
        rows,
        vec![
            (Some(1), owned("a"), Some(1), owned("x")),
            (Some(1), owned("a"), Some(1), owned("y")),
            (Some(1), owned("a"), Some(1), owned("z")),
        ]
    );
}

#[test]
fn s5_left_anti_join() {
    let left = vec![k_chunk(vec![Some(1), Some(2), Some(3)])];
    let right = vec![k_chunk(vec![Some(2)])];
    let mut joiner = EqHashJoiner::try_new(
        k_source(left),
        k_source(right),
        vec![0],
        vec![0],
        k_schema(),
        k_schema(),
        false,
        JoinType::LeftAnti,
    )
    .expect("join construction");
    let out = drain(&mut joiner);
    let mut keys = Vec::new();
    for chunk in &out {
        keys.extend(col_i64(chunk, 0));
    }
    keys.sort();
    assert_eq!(keys, vec![Some(1), Some(3)]);
}

#[test]
fn s6_empty_build_with_left_outer() {
    let left = vec![kv_chunk(vec![Some(1)], vec![Some("a")])];
    let mut joiner = kv_joiner(left, vec![], true, JoinType::LeftOuter);
    let out = drain(&mut joiner);
    assert_eq!(wide_rows(&out), vec![(Some(1), owned("a"), None, None)]);
}

#[test]
fn full_outer_join_preserves_both_sides() {
    let left = vec![kv_chunk(
        vec![Some(1), Some(2)],
        vec![Some("a"), Some("b")],
    )];
    let right = vec![kv_chunk(vec![Some(2), Some(3)], vec![Some("x"), Some("y")])];
    let mut joiner = kv_joiner(left, right, false, JoinType::FullOuter);
    let out = drain(&mut joiner);
    assert_eq!(
        wide_rows(&out),
        vec![
            (None, None, Some(3), owned("y")),
            (Some(1), owned("a"), None, None),
            (Some(2), owned("b"), Some(2), owned("x")),
        ]
    );
}

#[test]
fn left_semi_emits_each_matching_row_once() {
    let left = vec![kv_chunk(
        vec![Some(1), Some(2), Some(2)],
        vec![Some("a"), Some("b"), Some("c")],
    )];
    // Duplicate build keys must not duplicate semi output rows.
    let right = vec![kv_chunk(vec![Some(2), Some(2)], vec![Some("x"), Some("y")])];
    let mut joiner = kv_joiner(left, right, false, JoinType::LeftSemi);
    let out = drain(&mut joiner);
    for chunk in &out {
        assert_eq!(chunk.columns().len(), 2, "semi join must not project right columns");
    }
    assert_eq!(
        narrow_rows(&out),
        vec![(Some(2), owned("b")), (Some(2), owned("c"))]
    );
}

#[test]
fn null_keys_never_match() {
    let left = vec![kv_chunk(vec![None, Some(1)], vec![Some("ln"), Some("l1")])];
    let right = vec![kv_chunk(vec![None, Some(1)], vec![Some("rn"), Some("r1")])];
    let mut joiner = kv_joiner(left, right, false, JoinType::Inner);
    let out = drain(&mut joiner);
    assert_eq!(
        wide_rows(&out),
        vec![(Some(1), owned("l1"), Some(1), owned("r1"))]
    );
}

#[test]
fn null_keys_surface_as_unmatched_in_outer_joins() {
    let left = vec![kv_chunk(vec![None], vec![Some("ln")])];
    let right = vec![kv_chunk(vec![None], vec![Some("rn")])];
    let mut joiner = kv_joiner(left, right, false, JoinType::FullOuter);
    let out = drain(&mut joiner);
    assert_eq!(
        wide_rows(&out),
        vec![
            (None, None, None, owned("rn")),
            (None, owned("ln"), None, None),
        ]
    );
}

#[test]
fn distinct_and_general_probe_paths_agree() {
    // Build side with unique keys so both probe paths are legal.
    let build_keys: Vec<Option<i64>> = (0..50).map(Some).collect();
    let build_vals: Vec<Option<String>> = (0..50).map(|i| Some(format!("b{i}"))).collect();
    let build_chunk = |keys: &[Option<i64>], vals: &[Option<String>]| {
        let batch = RecordBatch::try_new(
            kv_schema(),
            vec![
                Arc::new(Int64Array::from(keys.to_vec())),
                Arc::new(StringArray::from_iter(vals.iter().cloned())),
            ],
        )
        .expect("record batch");
        Chunk::new(batch)
    };
    let right = vec![
        build_chunk(&build_keys[..20], &build_vals[..20]),
        build_chunk(&build_keys[20..], &build_vals[20..]),
    ];

    let probe_keys: Vec<Option<i64>> = (0..100).map(|i| Some((i * 7) % 80)).collect();
    let probe_vals: Vec<Option<String>> = (0..100).map(|i| Some(format!("p{i}"))).collect();
    let left = vec![
        build_chunk(&probe_keys[..40], &probe_vals[..40]),
        build_chunk(&probe_keys[40..], &probe_vals[40..]),
    ];

    let mut outputs = Vec::new();
    for right_distinct in [true, false] {
        let mut joiner = kv_joiner(left.clone(), right.clone(), right_distinct, JoinType::LeftOuter);
        let out = drain(&mut joiner);
        outputs.push(wide_rows(&out));
    }
    assert_eq!(outputs[0], outputs[1]);
    // Left-outer preservation: all 100 probe rows appear exactly once here
    // because the build keys are unique.
    assert_eq!(outputs[0].len(), 100);
}

#[test]
fn inner_join_matches_naive_reference_across_chunks() {
    let left_keys: Vec<Option<i64>> = (0..120)
        .map(|i| if i % 11 == 0 { None } else { Some(i % 7) })
        .collect();
    let right_keys: Vec<Option<i64>> = (0..60)
        .map(|i| if i % 9 == 0 { None } else { Some(i % 10) })
        .collect();

    let left_chunks: Vec<Chunk> = left_keys
        .chunks(50)
        .map(|keys| k_chunk(keys.to_vec()))
        .collect();
    let right_chunks: Vec<Chunk> = right_keys
        .chunks(25)
        .map(|keys| k_chunk(keys.to_vec()))
        .collect();

    let mut joiner = EqHashJoiner::try_new(
        k_source(left_chunks),
        k_source(right_chunks),
        vec![0],
        vec![0],
        k_schema(),
        k_schema(),
        false,
        JoinType::Inner,
    )
    .expect("join construction");
    let out = drain(&mut joiner);

    let mut got = Vec::new();
    for chunk in &out {
        let l = col_i64(chunk, 0);
        let r = col_i64(chunk, 1);
        for i in 0..chunk.len() {
            got.push((l[i], r[i]));
        }
    }
    got.sort();

    let mut expected = Vec::new();
    for l in left_keys.iter().flatten() {
        for r in right_keys.iter().flatten() {
            if l == r {
                expected.push((Some(*l), Some(*r)));
            }
        }
    }
    expected.sort();
    assert_eq!(got, expected);
}

#[test]
fn rejects_unsupported_join_types_and_key_mismatches() {
    for join_type in [
        JoinType::RightSemi,
        JoinType::RightAnti,
        JoinType::NullAwareLeftAnti,
    ] {
        let err = EqHashJoiner::try_new(
            kv_source(vec![]),
            kv_source(vec![]),
            vec![0],
            vec![0],
            kv_schema(),
            kv_schema(),
            false,
            join_type,
        )
        .expect_err("unsupported join type");
        assert!(err.contains("not supported"), "err={err}");
    }

    // Key columns of different types must be rejected up front.
    let err = EqHashJoiner::try_new(
        kv_source(vec![]),
        kv_source(vec![]),
        vec![0],
        vec![1],
        kv_schema(),
        kv_schema(),
        false,
        JoinType::Inner,
    )
    .expect_err("key type mismatch");
    assert!(err.contains("type mismatch"), "err={err}");

    // Arity mismatch.
    let err = EqHashJoiner::try_new(
        kv_source(vec![]),
        kv_source(vec![]),
        vec![0, 1],
        vec![0],
        kv_schema(),
        kv_schema(),
        false,
        JoinType::Inner,
    )
    .expect_err("arity mismatch");
    assert!(err.contains("arity"), "err={err}");
}

#[test]
fn multi_column_keys_join_on_the_full_tuple() {
    // Join on (k, v) pairs: only exact tuple matches survive.
    let left = vec![kv_chunk(
        vec![Some(1), Some(1), Some(2)],
        vec![Some("a"), Some("b"), Some("a")],
    )];
    let right = vec![kv_chunk(
        vec![Some(1), Some(2)],
        vec![Some("a"), Some("b")],
    )];
    let mut joiner = EqHashJoiner::try_new(
        kv_source(left),
        kv_source(right),
        vec![0, 1],
        vec![0, 1],
        kv_schema(),
        kv_schema(),
        true,
        JoinType::Inner,
    )
    .expect("join construction");
    let out = drain(&mut joiner);
    assert_eq!(
        wide_rows(&out),
        vec![(Some(1), owned("a"), Some(1), owned("a"))]
    );
}
