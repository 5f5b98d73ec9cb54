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
//! Typed views over join key arrays.
//!
//! Responsibilities:
//! - Dispatches per-row hashing and equality over the supported key types
//!   without per-row downcasts.
//! - Provides the deterministic, null-rejecting key hash used to assign
//!   build and probe rows to hash buckets.

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Date64Array, Decimal128Array,
    Float32Array, Float64Array, Int8Array, Int16Array, Int32Array, Int64Array, LargeStringArray,
    StringArray, TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray, UInt8Array, UInt16Array, UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, TimeUnit};

const KEY_HASH_SEED: u64 = 0x51ab_c04d_9e3c_fa11;

fn mix64(mut value: u64) -> u64 {
    value = value.wrapping_add(0x9e3779b97f4a7c15);
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d049bb133111eb);
    value ^ (value >> 31)
}

fn hash_u64(seed: u64, value: u64) -> u64 {
    mix64(seed ^ value)
}

fn hash_i128(seed: u64, value: i128) -> u64 {
    let value = value as u128;
    let low = hash_u64(seed, value as u64);
    let high = hash_u64(seed, (value >> 64) as u64);
    combine_hash(low, high)
}

fn hash_bytes(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub(super) fn combine_hash(acc: u64, value_hash: u64) -> u64 {
    mix64(acc.rotate_left(27) ^ value_hash)
}

fn canonical_f32_bits(value: f32) -> u32 {
    if value.is_nan() {
        f32::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

fn canonical_f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

fn float32_key_equal(left: f32, right: f32) -> bool {
    (left.is_nan() && right.is_nan()) || left == right
}

fn float64_key_equal(left: f64, right: f64) -> bool {
    (left.is_nan() && right.is_nan()) || left == right
}

/// Borrowed, type-dispatched view over one join key column.
pub(super) enum KeyArrayView<'a> {
    Int8(&'a Int8Array),
    Int16(&'a Int16Array),
    Int32(&'a Int32Array),
    Int64(&'a Int64Array),
    UInt8(&'a UInt8Array),
    UInt16(&'a UInt16Array),
    UInt32(&'a UInt32Array),
    UInt64(&'a UInt64Array),
    Float32(&'a Float32Array),
    Float64(&'a Float64Array),
    Boolean(&'a BooleanArray),
    Utf8(&'a StringArray),
    LargeUtf8(&'a LargeStringArray),
    Binary(&'a BinaryArray),
    Date32(&'a Date32Array),
    Date64(&'a Date64Array),
    TimestampSecond(&'a TimestampSecondArray),
    TimestampMillisecond(&'a TimestampMillisecondArray),
    TimestampMicrosecond(&'a TimestampMicrosecondArray),
    TimestampNanosecond(&'a TimestampNanosecondArray),
    Decimal128(&'a Decimal128Array),
}

fn downcast<'a, T: 'static>(array: &'a dyn Array) -> Result<&'a T, String> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| format!("join key array does not match its declared type {}", array.data_type()))
}

/// Whether `data_type` can serve as a join equality key.
pub(super) fn supports_key_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Boolean
            | DataType::Utf8
            | DataType::LargeUtf8
            | DataType::Binary
            | DataType::Date32
            | DataType::Date64
            | DataType::Timestamp(_, _)
            | DataType::Decimal128(_, _)
    )
}

impl<'a> KeyArrayView<'a> {
    pub(super) fn try_new(array: &'a dyn Array) -> Result<Self, String> {
        match array.data_type() {
            DataType::Int8 => Ok(Self::Int8(downcast(array)?)),
            DataType::Int16 => Ok(Self::Int16(downcast(array)?)),
            DataType::Int32 => Ok(Self::Int32(downcast(array)?)),
            DataType::Int64 => Ok(Self::Int64(downcast(array)?)),
            DataType::UInt8 => Ok(Self::UInt8(downcast(array)?)),
            DataType::UInt16 => Ok(Self::UInt16(downcast(array)?)),
            DataType::UInt32 => Ok(Self::UInt32(downcast(array)?)),
            DataType::UInt64 => Ok(Self::UInt64(downcast(array)?)),
            DataType::Float32 => Ok(Self::Float32(downcast(array)?)),
            DataType::Float64 => Ok(Self::Float64(downcast(array)?)),
            DataType::Boolean => Ok(Self::Boolean(downcast(array)?)),
            DataType::Utf8 => Ok(Self::Utf8(downcast(array)?)),
            DataType::LargeUtf8 => Ok(Self::LargeUtf8(downcast(array)?)),
            DataType::Binary => Ok(Self::Binary(downcast(array)?)),
            DataType::Date32 => Ok(Self::Date32(downcast(array)?)),
            DataType::Date64 => Ok(Self::Date64(downcast(array)?)),
            DataType::Timestamp(TimeUnit::Second, _) => {
                Ok(Self::TimestampSecond(downcast(array)?))
            }
            DataType::Timestamp(TimeUnit::Millisecond, _) => {
                Ok(Self::TimestampMillisecond(downcast(array)?))
            }
            DataType::Timestamp(TimeUnit::Microsecond, _) => {
                Ok(Self::TimestampMicrosecond(downcast(array)?))
            }
            DataType::Timestamp(TimeUnit::Nanosecond, _) => {
                Ok(Self::TimestampNanosecond(downcast(array)?))
            }
            DataType::Decimal128(_, _) => Ok(Self::Decimal128(downcast(array)?)),
            other => Err(format!("unsupported join key type {other}")),
        }
    }

    pub(super) fn is_null(&self, row: usize) -> bool {
        match self {
            Self::Int8(a) => a.is_null(row),
            Self::Int16(a) => a.is_null(row),
            Self::Int32(a) => a.is_null(row),
            Self::Int64(a) => a.is_null(row),
            Self::UInt8(a) => a.is_null(row),
            Self::UInt16(a) => a.is_null(row),
            Self::UInt32(a) => a.is_null(row),
            Self::UInt64(a) => a.is_null(row),
            Self::Float32(a) => a.is_null(row),
            Self::Float64(a) => a.is_null(row),
            Self::Boolean(a) => a.is_null(row),
            Self::Utf8(a) => a.is_null(row),
            Self::LargeUtf8(a) => a.is_null(row),
            Self::Binary(a) => a.is_null(row),
            Self::Date32(a) => a.is_null(row),
            Self::Date64(a) => a.is_null(row),
            Self::TimestampSecond(a) => a.is_null(row),
            Self::TimestampMillisecond(a) => a.is_null(row),
            Self::TimestampMicrosecond(a) => a.is_null(row),
            Self::TimestampNanosecond(a) => a.is_null(row),
            Self::Decimal128(a) => a.is_null(row),
        }
    }

    /// Hash the value at `row`. The caller must have excluded null rows.
    fn hash_row(&self, seed: u64, row: usize) -> u64 {
        match self {
            Self::Int8(a) => hash_u64(seed, a.value(row) as i64 as u64),
            Self::Int16(a) => hash_u64(seed, a.value(row) as i64 as u64),
            Self::Int32(a) => hash_u64(seed, a.value(row) as i64 as u64),
            Self::Int64(a) => hash_u64(seed, a.value(row) as u64),
            Self::UInt8(a) => hash_u64(seed, a.value(row) as u64),
            Self::UInt16(a) => hash_u64(seed, a.value(row) as u64),
            Self::UInt32(a) => hash_u64(seed, a.value(row) as u64),
            Self::UInt64(a) => hash_u64(seed, a.value(row)),
            Self::Float32(a) => hash_u64(seed, canonical_f32_bits(a.value(row)) as u64),
            Self::Float64(a) => hash_u64(seed, canonical_f64_bits(a.value(row))),
            Self::Boolean(a) => hash_u64(seed, a.value(row) as u64),
            Self::Utf8(a) => hash_bytes(seed, a.value(row).as_bytes()),
            Self::LargeUtf8(a) => hash_bytes(seed, a.value(row).as_bytes()),
            Self::Binary(a) => hash_bytes(seed, a.value(row)),
            Self::Date32(a) => hash_u64(seed, a.value(row) as i64 as u64),
            Self::Date64(a) => hash_u64(seed, a.value(row) as u64),
            Self::TimestampSecond(a) => hash_u64(seed, a.value(row) as u64),
            Self::TimestampMillisecond(a) => hash_u64(seed, a.value(row) as u64),
            Self::TimestampMicrosecond(a) => hash_u64(seed, a.value(row) as u64),
            Self::TimestampNanosecond(a) => hash_u64(seed, a.value(row) as u64),
            Self::Decimal128(a) => hash_i128(seed, a.value(row)),
        }
    }

    /// Compare the value at `row` against `other` at `other_row`. Both views
    /// must carry the same type; a mismatched pairing never compares equal.
    /// The caller must have excluded null rows.
    pub(super) fn eq_rows(&self, row: usize, other: &KeyArrayView<'a>, other_row: usize) -> bool {
        match (self, other) {
            (Self::Int8(a), Self::Int8(b)) => a.value(row) == b.value(other_row),
            (Self::Int16(a), Self::Int16(b)) => a.value(row) == b.value(other_row),
            (Self::Int32(a), Self::Int32(b)) => a.value(row) == b.value(other_row),
            (Self::Int64(a), Self::Int64(b)) => a.value(row) == b.value(other_row),
            (Self::UInt8(a), Self::UInt8(b)) => a.value(row) == b.value(other_row),
            (Self::UInt16(a), Self::UInt16(b)) => a.value(row) == b.value(other_row),
            (Self::UInt32(a), Self::UInt32(b)) => a.value(row) == b.value(other_row),
            (Self::UInt64(a), Self::UInt64(b)) => a.value(row) == b.value(other_row),
            (Self::Float32(a), Self::Float32(b)) => {
                float32_key_equal(a.value(row), b.value(other_row))
            }
            (Self::Float64(a), Self::Float64(b)) => {
                float64_key_equal(a.value(row), b.value(other_row))
            }
            (Self::Boolean(a), Self::Boolean(b)) => a.value(row) == b.value(other_row),
            (Self::Utf8(a), Self::Utf8(b)) => a.value(row) == b.value(other_row),
            (Self::LargeUtf8(a), Self::LargeUtf8(b)) => a.value(row) == b.value(other_row),
            (Self::Binary(a), Self::Binary(b)) => a.value(row) == b.value(other_row),
            (Self::Date32(a), Self::Date32(b)) => a.value(row) == b.value(other_row),
            (Self::Date64(a), Self::Date64(b)) => a.value(row) == b.value(other_row),
            (Self::TimestampSecond(a), Self::TimestampSecond(b)) => {
                a.value(row) == b.value(other_row)
            }
            (Self::TimestampMillisecond(a), Self::TimestampMillisecond(b)) => {
                a.value(row) == b.value(other_row)
            }
            (Self::TimestampMicrosecond(a), Self::TimestampMicrosecond(b)) => {
                a.value(row) == b.value(other_row)
            }
            (Self::TimestampNanosecond(a), Self::TimestampNanosecond(b)) => {
                a.value(row) == b.value(other_row)
            }
            (Self::Decimal128(a), Self::Decimal128(b)) => a.value(row) == b.value(other_row),
            _ => false,
        }
    }
}

/// Build views over the key columns selected by `eq_cols`.
pub(super) fn build_key_views<'a>(
    columns: &'a [ArrayRef],
    eq_cols: &[usize],
) -> Result<Vec<KeyArrayView<'a>>, String> {
    let mut views = Vec::with_capacity(eq_cols.len());
    for &idx in eq_cols {
        let array = columns.get(idx).ok_or_else(|| {
            format!(
                "join key column index {idx} out of bounds ({} columns)",
                columns.len()
            )
        })?;
        views.push(KeyArrayView::try_new(array.as_ref())?);
    }
    Ok(views)
}

/// Whether the key tuple at `row` contains a null in any column. Null keys
/// never participate in equality matching.
pub(super) fn row_has_null_key(views: &[KeyArrayView<'_>], row: usize) -> bool {
    views.iter().any(|v| v.is_null(row))
}

/// Combined hash of the key tuple at `row`, deterministic per key schema.
pub(super) fn hash_key_row(views: &[KeyArrayView<'_>], row: usize) -> u64 {
    let mut acc = KEY_HASH_SEED;
    for view in views {
        acc = combine_hash(acc, view.hash_row(KEY_HASH_SEED, row));
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use std::sync::Arc;

    #[test]
    fn hash_is_deterministic_per_tuple() {
        let keys: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![7, 7, 8])),
            Arc::new(StringArray::from(vec!["a", "a", "a"])),
        ];
        let views = build_key_views(&keys, &[0, 1]).expect("views");
        assert_eq!(hash_key_row(&views, 0), hash_key_row(&views, 1));
        assert_ne!(hash_key_row(&views, 0), hash_key_row(&views, 2));
    }

    #[test]
    fn null_detection_spans_all_key_columns() {
        let keys: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![Some(1), Some(2)])),
            Arc::new(StringArray::from(vec![None, Some("b")])),
        ];
        let views = build_key_views(&keys, &[0, 1]).expect("views");
        assert!(row_has_null_key(&views, 0));
        assert!(!row_has_null_key(&views, 1));
    }

    #[test]
    fn nan_keys_compare_equal_to_themselves() {
        let a: ArrayRef = Arc::new(Float64Array::from(vec![f64::NAN, 1.0]));
        let arrays = [a];
        let views = build_key_views(&arrays, &[0]).expect("views");
        assert!(views[0].eq_rows(0, &views[0], 0));
        assert!(!views[0].eq_rows(0, &views[0], 1));
    }

    #[test]
    fn rejects_unsupported_key_type() {
        use arrow::array::ListArray;
        use arrow::datatypes::Int32Type;
        let list: ArrayRef = Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1)]),
        ]));
        assert!(KeyArrayView::try_new(list.as_ref()).is_err());
        assert!(!supports_key_type(list.data_type()));
    }
}
