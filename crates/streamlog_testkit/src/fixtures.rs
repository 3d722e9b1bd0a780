//! Typed row fixtures implementing the stream tuple contract.

use streamlog_codec::{CodecResult, ReservedSlot, Writer};
use streamlog_core::StreamTuple;

/// A typed column value of a fixture row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// SQL NULL, recorded in the row's null bitmap.
    Null,
    /// 64-bit integer.
    BigInt(i64),
    /// 64-bit float.
    Double(f64),
    /// Length-prefixed UTF-8 string.
    VarChar(String),
    /// Length-prefixed binary.
    VarBinary(Vec<u8>),
}

impl ColumnValue {
    fn serialized_size(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::BigInt(_) | Self::Double(_) => 8,
            Self::VarChar(s) => 4 + s.len(),
            Self::VarBinary(b) => 4 + b.len(),
        }
    }

    fn key_bytes(&self) -> Vec<u8> {
        match self {
            Self::Null => Vec::new(),
            Self::BigInt(v) => v.to_be_bytes().to_vec(),
            Self::Double(v) => v.to_bits().to_be_bytes().to_vec(),
            Self::VarChar(s) => s.as_bytes().to_vec(),
            Self::VarBinary(b) => b.clone(),
        }
    }

    fn write(&self, w: &mut Writer<'_>) -> CodecResult<()> {
        match self {
            Self::Null => Ok(()),
            Self::BigInt(v) => w.write_i64(*v),
            Self::Double(v) => w.write_f64(*v),
            Self::VarChar(s) => w.write_string(s),
            Self::VarBinary(b) => w.write_var_bytes(b),
        }
    }
}

/// A row of typed columns usable with both stream protocols.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureRow {
    columns: Vec<ColumnValue>,
    partition_column: Option<u32>,
    partition_key: Option<Vec<u8>>,
}

impl FixtureRow {
    /// A row of a replicated table: no partition affinity.
    #[must_use]
    pub fn replicated(columns: Vec<ColumnValue>) -> Self {
        Self {
            columns,
            partition_column: None,
            partition_key: None,
        }
    }

    /// A row of a partitioned table, keyed on `partition_column`.
    ///
    /// # Panics
    ///
    /// Panics when the index is out of range; fixtures fail loudly.
    #[must_use]
    pub fn partitioned(columns: Vec<ColumnValue>, partition_column: u32) -> Self {
        let key = columns[partition_column as usize].key_bytes();
        Self {
            columns,
            partition_column: Some(partition_column),
            partition_key: Some(key),
        }
    }

    /// The row's columns.
    #[must_use]
    pub fn columns(&self) -> &[ColumnValue] {
        &self.columns
    }
}

impl StreamTuple for FixtureRow {
    fn visible_column_count(&self) -> usize {
        self.columns.len()
    }

    fn max_serialized_size(&self) -> usize {
        self.columns.iter().map(ColumnValue::serialized_size).sum()
    }

    fn serialize_to_dr(
        &self,
        w: &mut Writer<'_>,
        bitmap: ReservedSlot,
        first_column_bit: usize,
    ) -> CodecResult<()> {
        for (i, column) in self.columns.iter().enumerate() {
            if matches!(column, ColumnValue::Null) {
                w.patch_bit(bitmap, first_column_bit + i)?;
            } else {
                column.write(w)?;
            }
        }
        Ok(())
    }

    fn serialize_to_export(
        &self,
        w: &mut Writer<'_>,
        bitmap: ReservedSlot,
        first_column_bit: usize,
    ) -> CodecResult<()> {
        // Fixture columns encode identically on both wires.
        self.serialize_to_dr(w, bitmap, first_column_bit)
    }

    fn partition_column_index(&self) -> Option<u32> {
        self.partition_column
    }

    fn partition_key(&self) -> Option<&[u8]> {
        self.partition_key.as_deref()
    }
}
