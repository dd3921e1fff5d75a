//! Row-addressable tabular dataset.
//!
//! Rows carry a stable [`RowId`] that survives every stage. Columns are text
//! (nullable) and are only ever added or overwritten whole: a stage writes
//! exactly one column across all rows before it returns. Non-text columns
//! loaded from Arrow are carried along untouched as passthrough arrays.

use std::collections::HashMap;
use std::fmt;

use arrow::array::{ArrayRef, BooleanArray};
use arrow::datatypes::FieldRef;
use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::schema::ROW_ID_COLUMN;

/// Stable unique identifier of a dataset row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of row-level work: the row it belongs to and its input text.
///
/// Stage parameters (prompt, labels, model settings) live in the transform
/// that consumes the item, so the item itself stays immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub row_id: RowId,
    pub input: String,
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    values: Vec<Option<String>>,
}

/// A column the dataset does not interpret, kept in row order.
#[derive(Debug, Clone)]
pub(crate) struct Passthrough {
    pub(crate) field: FieldRef,
    pub(crate) values: ArrayRef,
}

/// Ordered rows with named text columns, addressable by [`RowId`].
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    ids: Vec<RowId>,
    index: HashMap<RowId, usize>,
    columns: Vec<Column>,
    passthrough: Vec<Passthrough>,
}

impl Dataset {
    /// Create a dataset with the given row ids and no columns.
    pub fn new(ids: impl IntoIterator<Item = RowId>) -> Result<Self, CoreError> {
        let ids: Vec<RowId> = ids.into_iter().collect();
        let mut index = HashMap::with_capacity(ids.len());
        for (pos, id) in ids.iter().enumerate() {
            if index.insert(*id, pos).is_some() {
                return Err(CoreError::DuplicateRow(*id));
            }
        }
        Ok(Self {
            ids,
            index,
            columns: Vec::new(),
            passthrough: Vec::new(),
        })
    }

    /// Create a dataset of `len` rows with ids `0..len`.
    pub fn with_positional_ids(len: usize) -> Self {
        let ids: Vec<RowId> = (0..len as u64).map(RowId).collect();
        let index = ids.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
        Self {
            ids,
            index,
            columns: Vec::new(),
            passthrough: Vec::new(),
        }
    }

    /// Single-column dataset with positional ids.
    pub fn from_texts<I, S>(column: &str, texts: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<Option<String>> = texts.into_iter().map(|s| Some(s.into())).collect();
        let mut dataset = Self::with_positional_ids(values.len());
        dataset.add_column(column, values)?;
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row ids in dataset order.
    pub fn row_ids(&self) -> &[RowId] {
        &self.ids
    }

    pub fn contains_row(&self, id: RowId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Names of the non-text columns carried through unchanged.
    pub fn passthrough_names(&self) -> impl Iterator<Item = &str> {
        self.passthrough.iter().map(|p| p.field.name().as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_pos(name).is_some()
    }

    /// Fail fast when a stage's input column is absent.
    pub fn require_column(&self, name: &str) -> Result<(), CoreError> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(CoreError::MissingColumn(name.to_string()))
        }
    }

    /// Add (or replace) a column by position. `values` must have one entry per row.
    pub fn add_column(
        &mut self,
        name: &str,
        values: Vec<Option<String>>,
    ) -> Result<(), CoreError> {
        if name == ROW_ID_COLUMN {
            return Err(CoreError::ReservedColumn(name.to_string()));
        }
        if values.len() != self.ids.len() {
            return Err(CoreError::LengthMismatch {
                column: name.to_string(),
                expected: self.ids.len(),
                actual: values.len(),
            });
        }
        self.put_column(name, values);
        Ok(())
    }

    /// Write one column keyed by row id. Every row must receive exactly one value.
    pub fn write_column(
        &mut self,
        name: &str,
        mut values: HashMap<RowId, String>,
    ) -> Result<(), CoreError> {
        if name == ROW_ID_COLUMN {
            return Err(CoreError::ReservedColumn(name.to_string()));
        }
        if let Some(unknown) = values.keys().find(|id| !self.index.contains_key(*id)) {
            return Err(CoreError::UnknownRow(*unknown));
        }
        let missing = self
            .ids
            .iter()
            .filter(|id| !values.contains_key(*id))
            .count();
        if missing > 0 {
            return Err(CoreError::IncompleteColumn {
                column: name.to_string(),
                missing,
            });
        }

        let column: Vec<Option<String>> = self.ids.iter().map(|id| values.remove(id)).collect();
        self.put_column(name, column);
        Ok(())
    }

    /// Cell value for a row, `None` if the row, column, or value is absent.
    pub fn get(&self, row: RowId, column: &str) -> Option<&str> {
        let pos = *self.index.get(&row)?;
        let col = self.column_pos(column)?;
        self.columns[col].values[pos].as_deref()
    }

    /// `(row_id, value)` pairs of a column in dataset order.
    pub fn column(&self, name: &str) -> Result<Vec<(RowId, Option<&str>)>, CoreError> {
        let col = self
            .column_pos(name)
            .ok_or_else(|| CoreError::MissingColumn(name.to_string()))?;
        Ok(self
            .ids
            .iter()
            .zip(&self.columns[col].values)
            .map(|(id, v)| (*id, v.as_deref()))
            .collect())
    }

    /// Non-null values of a column in dataset order.
    pub fn texts(&self, name: &str) -> Result<Vec<&str>, CoreError> {
        Ok(self
            .column(name)?
            .into_iter()
            .filter_map(|(_, v)| v)
            .collect())
    }

    /// Rewrite the non-null values of a column in place.
    pub fn map_column(
        &mut self,
        name: &str,
        mut f: impl FnMut(&str) -> String,
    ) -> Result<(), CoreError> {
        let col = self
            .column_pos(name)
            .ok_or_else(|| CoreError::MissingColumn(name.to_string()))?;
        for value in self.columns[col].values.iter_mut().flatten() {
            let next = f(value.as_str());
            *value = next;
        }
        Ok(())
    }

    /// New dataset holding only the rows for which `keep` returns true.
    pub fn retain_rows(
        &self,
        mut keep: impl FnMut(RowId) -> bool,
    ) -> Result<Dataset, CoreError> {
        let mask: Vec<bool> = self.ids.iter().map(|id| keep(*id)).collect();
        let positions: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
        let ids: Vec<RowId> = positions.iter().map(|&i| self.ids[i]).collect();
        let index = ids.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: positions.iter().map(|&i| c.values[i].clone()).collect(),
            })
            .collect();

        let predicate = BooleanArray::from(mask);
        let passthrough = self
            .passthrough
            .iter()
            .map(|p| {
                Ok(Passthrough {
                    field: p.field.clone(),
                    values: arrow::compute::filter(p.values.as_ref(), &predicate)?,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Dataset {
            ids,
            index,
            columns,
            passthrough,
        })
    }

    pub(crate) fn passthrough(&self) -> &[Passthrough] {
        &self.passthrough
    }

    /// Carry a non-text column along. `values` must have one entry per row.
    pub(crate) fn add_passthrough(
        &mut self,
        field: FieldRef,
        values: ArrayRef,
    ) -> Result<(), CoreError> {
        if values.len() != self.ids.len() {
            return Err(CoreError::LengthMismatch {
                column: field.name().clone(),
                expected: self.ids.len(),
                actual: values.len(),
            });
        }
        self.passthrough.retain(|p| p.field.name() != field.name());
        self.passthrough.push(Passthrough { field, values });
        Ok(())
    }

    fn column_pos(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn put_column(&mut self, name: &str, values: Vec<Option<String>>) {
        // A stage writing over a loaded non-text column replaces it.
        self.passthrough.retain(|p| p.field.name() != name);
        match self.column_pos(name) {
            Some(pos) => self.columns[pos].values = values,
            None => self.columns.push(Column {
                name: name.to_string(),
                values,
            }),
        }
    }
}
