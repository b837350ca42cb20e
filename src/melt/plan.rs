//! Column plans for flattening scientific objects
//!
//! The factor columns of a table depend on every record in the result set,
//! so they are fixed by a discovery pass over all records before any row is
//! projected. This module holds that pass and the column naming scheme.

use crate::types::{GermplasmLevel, ScientificObject};
use std::collections::HashSet;

pub const URI_COLUMN: &str = "URI";
pub const NAME_COLUMN: &str = "Name";
pub const TYPE_COLUMN: &str = "type";

/// `germplasm_type_{i}`
pub fn germplasm_type_column(ordinal: usize) -> String {
    format!("germplasm_type_{}", ordinal)
}

/// `germplasm_name_{i}`
pub fn germplasm_name_column(ordinal: usize) -> String {
    format!("germplasm_name_{}", ordinal)
}

/// `Species_{i}`, `Variety_{i}`, `Accession_{i}`
pub fn ancestor_column(level: GermplasmLevel, ordinal: usize) -> String {
    format!("{}_{}", level.column_prefix(), ordinal)
}

/// Pre-computed column layout for one result set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenPlan {
    /// Distinct factor names, in order of first appearance
    factor_columns: Vec<String>,
}

impl FlattenPlan {
    /// Scan every object and collect the distinct factor names
    pub fn discover(objects: &[ScientificObject]) -> Self {
        let mut seen = HashSet::new();
        let mut factor_columns = Vec::new();

        for object in objects {
            for factor_level in &object.factor_levels {
                if seen.insert(factor_level.factor.as_str()) {
                    factor_columns.push(factor_level.factor.clone());
                }
            }
        }

        FlattenPlan { factor_columns }
    }

    pub fn with_factor_columns(factor_columns: Vec<String>) -> Self {
        FlattenPlan { factor_columns }
    }

    pub fn factor_columns(&self) -> &[String] {
        &self.factor_columns
    }

    /// Columns that lead the assembled table: base columns, then factors
    pub fn leading_columns(&self) -> Vec<String> {
        let mut columns = vec![
            URI_COLUMN.to_string(),
            NAME_COLUMN.to_string(),
            TYPE_COLUMN.to_string(),
        ];
        columns.extend(self.factor_columns.iter().cloned());
        columns
    }
}
