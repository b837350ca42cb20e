//! Plan-driven projection of scientific objects into flat rows
//!
//! This is the second pass of the flattening engine: with the factor columns
//! fixed by a [`FlattenPlan`], each object becomes one row with ordinal
//! germplasm columns.

use crate::melt::plan::{
    ancestor_column, germplasm_name_column, germplasm_type_column, FlattenPlan, NAME_COLUMN,
    TYPE_COLUMN, URI_COLUMN,
};
use crate::melt::table::{Table, TabularAssembler};
use crate::types::{FlatRow, ScientificObject};
use serde_json::Value;

/// Flattens scientific objects according to a pre-computed plan
pub struct HierarchyFlattener {
    plan: FlattenPlan,
}

impl HierarchyFlattener {
    pub fn new(plan: FlattenPlan) -> Self {
        HierarchyFlattener { plan }
    }

    /// Run the discovery pass over `objects` and keep its plan
    pub fn from_objects(objects: &[ScientificObject]) -> Self {
        Self::new(FlattenPlan::discover(objects))
    }

    pub fn plan(&self) -> &FlattenPlan {
        &self.plan
    }

    /// Project one object into a row
    ///
    /// Germplasm `i` (1-based, source order) contributes its type and name,
    /// plus one column per ancestor its level implies and the server resolved.
    pub fn flatten(&self, object: &ScientificObject) -> FlatRow {
        let mut row = FlatRow::new();

        row.insert(URI_COLUMN.to_string(), Value::String(object.uri.clone()));
        row.insert(NAME_COLUMN.to_string(), Value::String(object.name.clone()));
        if let Some(rdf_type) = &object.rdf_type {
            row.insert(TYPE_COLUMN.to_string(), Value::String(rdf_type.clone()));
        }

        for factor in self.plan.factor_columns() {
            if let Some(level) = object.level_for(factor) {
                row.insert(factor.clone(), Value::String(level.to_string()));
            }
        }

        for (idx, germplasm) in object.germplasm.iter().enumerate() {
            let ordinal = idx + 1;
            let level = germplasm.level();

            row.insert(
                germplasm_type_column(ordinal),
                Value::String(level.as_str().to_string()),
            );
            row.insert(
                germplasm_name_column(ordinal),
                Value::String(germplasm.name().to_string()),
            );

            for ancestor in level.ancestors() {
                if let Some(name) = germplasm.ancestor(*ancestor) {
                    row.insert(ancestor_column(*ancestor, ordinal), Value::String(name.to_string()));
                }
            }
        }

        row
    }

    pub fn flatten_all(&self, objects: &[ScientificObject]) -> Vec<FlatRow> {
        objects.iter().map(|object| self.flatten(object)).collect()
    }

    /// Both passes plus assembly, with base and factor columns leading
    pub fn tabulate(objects: &[ScientificObject]) -> Table {
        let flattener = Self::from_objects(objects);
        let rows = flattener.flatten_all(objects);
        TabularAssembler::new()
            .with_leading_columns(flattener.plan().leading_columns())
            .assemble(rows)
    }
}
