//! Arrow boundary for [`Dataset`]: load RecordBatches and emit the annotated
//! dataset as a single batch.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Int32Array, Int64Array, LargeStringArray, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use tracing::debug;

use crate::{CoreError, Dataset, RowId};

/// Name of the row identifier column in emitted batches.
pub const ROW_ID_COLUMN: &str = "row_id";

/// Output schema: `row_id` followed by one nullable Utf8 field per text column.
pub fn dataset_schema<'a>(text_columns: impl IntoIterator<Item = &'a str>) -> Schema {
    let mut fields = vec![Field::new(ROW_ID_COLUMN, DataType::UInt64, false)];
    fields.extend(
        text_columns
            .into_iter()
            .map(|name| Field::new(name, DataType::Utf8, true)),
    );
    Schema::new(fields)
}

impl Dataset {
    /// Build a dataset from Arrow batches.
    ///
    /// `Utf8` and `LargeUtf8` columns become text columns; every other column
    /// is carried through unchanged. Row ids come from `id_column`, or from a
    /// `row_id` column written by an earlier save, and must be unique
    /// non-negative integers. Without either, rows are numbered by load
    /// position.
    pub fn from_record_batches(
        batches: &[RecordBatch],
        id_column: Option<&str>,
    ) -> Result<Self, CoreError> {
        let Some(first) = batches.first() else {
            return Ok(Dataset::default());
        };
        let schema = first.schema();
        let id_column = id_column.or_else(|| {
            schema
                .column_with_name(ROW_ID_COLUMN)
                .map(|_| ROW_ID_COLUMN)
        });

        let mut text_names = Vec::new();
        let mut passthrough: Vec<FieldRef> = Vec::new();
        for field in schema.fields() {
            let name = field.name().as_str();
            if name == ROW_ID_COLUMN {
                continue;
            }
            match field.data_type() {
                DataType::Utf8 | DataType::LargeUtf8 if Some(name) != id_column => {
                    text_names.push(name.to_string())
                }
                other => {
                    debug!(column = name, data_type = %other, "carrying column through");
                    passthrough.push(Arc::clone(field));
                }
            }
        }
        if let Some(id_name) = id_column {
            debug!(column = id_name, "row ids from column");
        }

        let mut ids = Vec::new();
        let mut texts: Vec<Vec<Option<String>>> = vec![Vec::new(); text_names.len()];
        let mut offset = 0usize;

        for batch in batches {
            if let Some(id_name) = id_column {
                let col = batch
                    .column_by_name(id_name)
                    .ok_or_else(|| CoreError::MissingColumn(id_name.to_string()))?;
                for row in 0..batch.num_rows() {
                    let id = get_row_id(col.as_ref(), row, id_name)?.ok_or_else(|| {
                        CoreError::InvalidRowId {
                            column: id_name.to_string(),
                            row: offset + row,
                        }
                    })?;
                    ids.push(id);
                }
            } else {
                ids.extend((offset..offset + batch.num_rows()).map(|i| RowId(i as u64)));
            }

            for (name, values) in text_names.iter().zip(texts.iter_mut()) {
                let col = batch
                    .column_by_name(name)
                    .ok_or_else(|| CoreError::MissingColumn(name.clone()))?;
                values.extend((0..batch.num_rows()).map(|row| get_string(col.as_ref(), row)));
            }

            offset += batch.num_rows();
        }

        let mut dataset = Dataset::new(ids)?;
        for (name, values) in text_names.iter().zip(texts) {
            dataset.add_column(name, values)?;
        }
        for field in passthrough {
            let parts = batches
                .iter()
                .map(|batch| {
                    batch
                        .column_by_name(field.name())
                        .map(|col| col.as_ref())
                        .ok_or_else(|| CoreError::MissingColumn(field.name().clone()))
                })
                .collect::<Result<Vec<&dyn Array>, CoreError>>()?;
            let values = arrow::compute::concat(&parts)?;
            dataset.add_passthrough(field, values)?;
        }
        Ok(dataset)
    }

    /// Emit the dataset as one batch: `row_id`, the passthrough columns, then
    /// the text columns as nullable Utf8.
    pub fn to_record_batch(&self) -> Result<RecordBatch, CoreError> {
        let names: Vec<&str> = self.column_names().collect();
        let text_schema = dataset_schema(names.iter().copied());

        let mut fields: Vec<FieldRef> =
            Vec::with_capacity(text_schema.fields().len() + self.passthrough().len());
        fields.push(Arc::clone(&text_schema.fields()[0]));
        fields.extend(self.passthrough().iter().map(|p| Arc::clone(&p.field)));
        fields.extend(text_schema.fields().iter().skip(1).cloned());

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
        columns.push(Arc::new(UInt64Array::from(
            self.row_ids().iter().map(|id| id.0).collect::<Vec<_>>(),
        )));
        columns.extend(self.passthrough().iter().map(|p| Arc::clone(&p.values)));
        for name in &names {
            let values: Vec<Option<&str>> = self.column(name)?.into_iter().map(|(_, v)| v).collect();
            columns.push(Arc::new(StringArray::from(values)));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

// ── Arrow extraction helpers ──

/// Extract a string value from an Arrow array (handles Utf8 and LargeUtf8).
fn get_string(col: &dyn Array, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    col.as_any()
        .downcast_ref::<StringArray>()
        .map(|arr| arr.value(row).to_string())
        .or_else(|| {
            col.as_any()
                .downcast_ref::<LargeStringArray>()
                .map(|arr| arr.value(row).to_string())
        })
}

/// Extract a row id from an integer column. `Ok(None)` for null or negative values.
fn get_row_id(col: &dyn Array, row: usize, name: &str) -> Result<Option<RowId>, CoreError> {
    if col.is_null(row) {
        return Ok(None);
    }
    let any = col.as_any();
    let value = if let Some(arr) = any.downcast_ref::<UInt64Array>() {
        Some(arr.value(row))
    } else if let Some(arr) = any.downcast_ref::<UInt32Array>() {
        Some(u64::from(arr.value(row)))
    } else if let Some(arr) = any.downcast_ref::<Int64Array>() {
        u64::try_from(arr.value(row)).ok()
    } else if let Some(arr) = any.downcast_ref::<Int32Array>() {
        u64::try_from(arr.value(row)).ok()
    } else {
        return Err(CoreError::UnsupportedIdType {
            column: name.to_string(),
            data_type: col.data_type().to_string(),
        });
    };
    Ok(value.map(RowId))
}
