use std::collections::BTreeMap;

use crate::types::Cell;

/// A flat row keyed by column name.
///
/// Rows produced by the normalizer hold exactly the columns of the schema contract they were
/// produced against, absent source fields included as [`Cell::Null`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedRow {
    values: BTreeMap<String, Cell>,
}

impl NormalizedRow {
    pub fn new(values: BTreeMap<String, Cell>) -> Self {
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.values.get(column)
    }

    /// Returns the column names of the row in lexical order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.values.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the values of `columns` in order, [`Cell::Null`] for missing ones.
    pub fn key_of(&self, columns: &[String]) -> Vec<Cell> {
        columns
            .iter()
            .map(|column| self.values.get(column).cloned().unwrap_or(Cell::Null))
            .collect()
    }

    /// Renders the row as a JSON object.
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.values
            .iter()
            .map(|(name, cell)| (name.clone(), cell.to_json()))
            .collect()
    }

    pub fn into_values(self) -> BTreeMap<String, Cell> {
        self.values
    }
}

impl FromIterator<(String, Cell)> for NormalizedRow {
    fn from_iter<I: IntoIterator<Item = (String, Cell)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
