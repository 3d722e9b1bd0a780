//! Proptest strategies over fixture rows and stream inputs.

use proptest::prelude::*;

use crate::fixtures::{ColumnValue, FixtureRow};

/// Strategy over non-null column values.
pub fn non_null_column_value() -> impl Strategy<Value = ColumnValue> {
    prop_oneof![
        any::<i64>().prop_map(ColumnValue::BigInt),
        any::<f64>().prop_map(ColumnValue::Double),
        "[a-z0-9]{0,24}".prop_map(ColumnValue::VarChar),
        proptest::collection::vec(any::<u8>(), 0..32).prop_map(ColumnValue::VarBinary),
    ]
}

/// Strategy over column values including NULL.
pub fn column_value() -> impl Strategy<Value = ColumnValue> {
    prop_oneof![
        1 => Just(ColumnValue::Null),
        4 => non_null_column_value(),
    ]
}

/// Strategy over rows of a replicated table.
pub fn replicated_row(max_columns: usize) -> impl Strategy<Value = FixtureRow> {
    proptest::collection::vec(column_value(), 1..=max_columns).prop_map(FixtureRow::replicated)
}

/// Strategy over rows of a partitioned table. The partition column is
/// always non-null.
pub fn partitioned_row(max_columns: usize) -> impl Strategy<Value = FixtureRow> {
    (
        non_null_column_value(),
        proptest::collection::vec(column_value(), 0..max_columns),
    )
        .prop_map(|(key, mut rest)| {
            rest.insert(0, key);
            FixtureRow::partitioned(rest, 0)
        })
}

/// Strategy over any fixture row.
pub fn any_row(max_columns: usize) -> impl Strategy<Value = FixtureRow> {
    prop_oneof![replicated_row(max_columns), partitioned_row(max_columns)]
}
