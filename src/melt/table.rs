//! Fixed-width tables built from flattened rows

use crate::types::FlatRow;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Ordered rows sharing one finalized column set
///
/// Rows keep only the cells they actually have; a column missing from a row
/// reads as absent rather than null.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<FlatRow>,
}

impl Table {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FlatRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// One entry per row, `None` where the row has no cell
    pub fn column(&self, column: &str) -> Vec<Option<&Value>> {
        self.rows.iter().map(|row| row.get(column)).collect()
    }

    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&FlatRow) -> bool,
    {
        self.rows.retain(keep);
    }

    /// Drop columns that no remaining row populates, cells included
    ///
    /// Only absent and null cells count as empty; an empty string is a value.
    pub fn prune_empty_columns(&mut self) {
        let rows = &self.rows;
        let (kept, pruned): (Vec<String>, Vec<String>) = self
            .columns
            .drain(..)
            .partition(|column| rows.iter().any(|row| is_populated(row.get(column))));
        self.columns = kept;

        if pruned.is_empty() {
            return;
        }
        for row in &mut self.rows {
            for column in &pruned {
                row.shift_remove(column);
            }
        }
    }

    pub fn into_rows(self) -> Vec<FlatRow> {
        self.rows
    }
}

fn is_populated(cell: Option<&Value>) -> bool {
    !matches!(cell, None | Some(Value::Null))
}

/// Merges flattened rows under outer-join column semantics
#[derive(Debug, Clone, Default)]
pub struct TabularAssembler {
    leading_columns: Vec<String>,
}

impl TabularAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns placed first, in this order, when some row has them
    pub fn with_leading_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.leading_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Union the rows' columns and keep row order
    ///
    /// Null cells are removed so that absence has one representation.
    pub fn assemble(&self, rows: Vec<FlatRow>) -> Table {
        let mut seen: HashSet<String> = HashSet::new();
        let mut discovered: Vec<String> = Vec::new();

        let rows: Vec<FlatRow> = rows
            .into_iter()
            .map(|mut row| {
                row.retain(|_, value| !value.is_null());
                for key in row.keys() {
                    if seen.insert(key.clone()) {
                        discovered.push(key.clone());
                    }
                }
                row
            })
            .collect();

        let mut columns: Vec<String> = self
            .leading_columns
            .iter()
            .filter(|c| seen.contains(c.as_str()))
            .cloned()
            .collect();
        let leading: HashSet<&str> = columns.iter().map(String::as_str).collect();
        let rest: Vec<String> = discovered
            .into_iter()
            .filter(|c| !leading.contains(c.as_str()))
            .collect();
        columns.extend(rest);

        Table { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> FlatRow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_union_in_first_appearance_order() {
        let table = TabularAssembler::new().assemble(vec![
            row(json!({"a": 1, "b": 2})),
            row(json!({"c": 3, "a": 4})),
            row(json!({})),
        ]);

        assert_eq!(table.columns(), &["a", "b", "c"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.cell(1, "b"), None);
        assert_eq!(table.cell(1, "c"), Some(&json!(3)));
        assert_eq!(table.column("a"), vec![Some(&json!(1)), Some(&json!(4)), None]);
    }

    #[test]
    fn test_leading_columns_come_first() {
        let table = TabularAssembler::new()
            .with_leading_columns(["URI", "Name", "type", "Irrigation"])
            .assemble(vec![
                row(json!({"germplasm_type_1": "species", "Name": "p1", "URI": "so1"})),
                row(json!({"Irrigation": "WW", "URI": "so2", "Name": "p2"})),
            ]);

        assert_eq!(
            table.columns(),
            &["URI", "Name", "Irrigation", "germplasm_type_1"]
        );
    }

    #[test]
    fn test_nulls_are_absent() {
        let table = TabularAssembler::new().assemble(vec![row(json!({"a": null, "b": ""}))]);

        assert_eq!(table.columns(), &["b"]);
        assert_eq!(table.cell(0, "a"), None);
        assert_eq!(table.cell(0, "b"), Some(&json!("")));
    }

    #[test]
    fn test_retain_and_prune() {
        let mut table = TabularAssembler::new().assemble(vec![
            row(json!({"URI": "so1", "Irrigation": "WW"})),
            row(json!({"URI": "so2", "Genotype": "G1"})),
        ]);

        table.retain(|r| r["URI"] == "so2");
        assert_eq!(table.columns(), &["URI", "Irrigation", "Genotype"]);

        table.prune_empty_columns();
        assert_eq!(table.columns(), &["URI", "Genotype"]);
        assert_eq!(table.into_rows().len(), 1);
    }

    #[test]
    fn test_prune_keeps_rows_in_step_with_columns() {
        let mut table = Table {
            columns: vec!["URI".into(), "Irrigation".into(), "Genotype".into()],
            rows: vec![row(json!({"URI": "so1", "Irrigation": "", "Genotype": null}))],
        };

        table.prune_empty_columns();

        assert_eq!(table.columns(), &["URI", "Irrigation"]);
        assert_eq!(table.cell(0, "Irrigation"), Some(&json!("")));
        let keys: Vec<&String> = table.rows()[0].keys().collect();
        assert_eq!(keys, vec!["URI", "Irrigation"]);
    }

    #[test]
    fn test_empty_input() {
        let table = TabularAssembler::new()
            .with_leading_columns(["URI"])
            .assemble(Vec::new());
        assert!(table.is_empty());
        assert!(table.columns().is_empty());
    }
}
