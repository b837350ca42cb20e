//! Measurements split into one table per variable
//!
//! Platform data comes back as a flat list of `{target, variable, value,
//! date}` records. Exports want one table per variable, named after it, so
//! [`SeriesSplitter`] groups the measurements and builds each table with a
//! caller-supplied row shape.

use crate::error::{ExplorerError, Result};
use crate::melt::table::{Table, TabularAssembler};
use crate::types::FlatRow;
use serde_json::Value;

/// The measurements of one variable
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSeries {
    pub variable: String,
    pub name: String,
    pub table: Table,
}

/// Groups measurements by variable, restricted to a catalog of known variables
#[derive(Debug, Clone, Default)]
pub struct SeriesSplitter {
    catalog: Vec<(String, String)>,
}

impl SeriesSplitter {
    /// `(uri, name)` pairs of the variables to keep
    pub fn new(catalog: Vec<(String, String)>) -> Self {
        SeriesSplitter { catalog }
    }

    /// Read the catalog from a variables table with `URI` and `Name` columns
    ///
    /// A row without a `Name` is named after the last path segment of its URI.
    pub fn from_table(variables: &Table) -> Self {
        let catalog = variables
            .rows()
            .iter()
            .filter_map(|row| {
                let uri = row.get("URI")?.as_str()?.to_string();
                let name = row
                    .get("Name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| local_name(&uri).to_string());
                Some((uri, name))
            })
            .collect();
        SeriesSplitter { catalog }
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn name_of(&self, variable: &str) -> Option<&str> {
        self.catalog
            .iter()
            .find(|(uri, _)| uri == variable)
            .map(|(_, name)| name.as_str())
    }

    /// Split `measurements` into one table per catalogued variable
    ///
    /// Series come in the order their variable first appears in the data.
    /// `row` builds the cells of one measurement given the variable's name;
    /// `columns` fixes the column order of every table given that name.
    pub fn split<R, C>(&self, resource: &str, measurements: &[Value], row: R, columns: C) -> Result<Vec<VariableSeries>>
    where
        R: Fn(&Value, &str) -> FlatRow,
        C: Fn(&str) -> Vec<String>,
    {
        let mut groups: Vec<(String, String, Vec<FlatRow>)> = Vec::new();

        for measurement in measurements {
            let variable = measurement
                .get("variable")
                .and_then(Value::as_str)
                .ok_or_else(|| ExplorerError::schema(resource, "measurement has no variable"))?;
            let Some(name) = self.name_of(variable) else {
                continue;
            };

            let cells = row(measurement, name);
            match groups.iter_mut().find(|(uri, _, _)| uri == variable) {
                Some((_, _, rows)) => rows.push(cells),
                None => groups.push((variable.to_string(), name.to_string(), vec![cells])),
            }
        }

        Ok(groups
            .into_iter()
            .map(|(variable, name, rows)| {
                let table = TabularAssembler::new()
                    .with_leading_columns(columns(&name))
                    .assemble(rows);
                VariableSeries { variable, name, table }
            })
            .collect())
    }
}

/// Last path segment of a URI
pub fn local_name(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}
