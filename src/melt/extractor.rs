use crate::types::{FlatRow, MeltConfig};
use serde_json::{Map, Value};

/// Flattens generic platform records (experiments, variables, devices...)
/// into one row each
///
/// Nested objects become prefixed columns (`entity` + `name` gives
/// `entity_name`). Lists of linked resources collapse into one cell holding
/// their labels. Anything nested deeper than `max_depth` is kept as JSON text.
pub struct RecordMelter {
    config: MeltConfig,
}

impl RecordMelter {
    pub fn new(config: MeltConfig) -> Self {
        RecordMelter { config }
    }

    pub fn config(&self) -> &MeltConfig {
        &self.config
    }

    /// Melt one record into a flat row
    pub fn melt(&self, record: Value) -> FlatRow {
        let mut row = FlatRow::new();

        match record {
            Value::Object(obj) => self.flatten_object(obj, None, 0, &mut row),
            Value::Null => {}
            other => {
                // Scalars and bare arrays get a single column
                self.insert_value(String::from("value"), other, 0, &mut row);
            }
        }

        let row = self.apply_renames(row);
        self.apply_select(row)
    }

    pub fn melt_all(&self, records: Vec<Value>) -> Vec<FlatRow> {
        records.into_iter().map(|record| self.melt(record)).collect()
    }

    fn flatten_object(&self, obj: Map<String, Value>, prefix: Option<&str>, depth: usize, row: &mut FlatRow) {
        for (key, value) in obj {
            let column = match prefix {
                Some(p) => format!("{}{}{}", p, self.config.separator, key),
                None => key,
            };
            self.insert_value(column, value, depth, row);
        }
    }

    fn insert_value(&self, column: String, value: Value, depth: usize, row: &mut FlatRow) {
        match value {
            Value::Null => {}
            Value::Object(obj) => {
                if depth + 1 >= self.config.max_depth {
                    row.insert(column, Value::String(Value::Object(obj).to_string()));
                } else {
                    self.flatten_object(obj, Some(&column), depth + 1, row);
                }
            }
            Value::Array(items) => {
                if let Some(cell) = self.collapse_array(items) {
                    row.insert(column, cell);
                }
            }
            scalar => {
                row.insert(column, scalar);
            }
        }
    }

    /// One cell for a list: labels of linked objects, or the scalars joined
    fn collapse_array(&self, items: Vec<Value>) -> Option<Value> {
        if items.is_empty() {
            return None;
        }

        if items.iter().all(Value::is_object) {
            for field in &self.config.label_fields {
                if items.iter().any(|item| item.get(field).is_some()) {
                    let labels: Vec<String> = items
                        .iter()
                        .filter_map(|item| item.get(field))
                        .filter_map(scalar_text)
                        .collect();
                    if labels.is_empty() {
                        return None;
                    }
                    return Some(Value::String(labels.join(&self.config.list_separator)));
                }
            }
            return Some(Value::String(Value::Array(items).to_string()));
        }

        if items.iter().all(|item| !item.is_object() && !item.is_array()) {
            let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
            if parts.is_empty() {
                return None;
            }
            if parts.len() == 1 && items.len() == 1 {
                return items.into_iter().next();
            }
            return Some(Value::String(parts.join(&self.config.list_separator)));
        }

        Some(Value::String(Value::Array(items).to_string()))
    }

    fn apply_renames(&self, row: FlatRow) -> FlatRow {
        if self.config.renames.is_empty() {
            return row;
        }
        row.into_iter()
            .map(|(key, value)| {
                let renamed = self
                    .config
                    .renames
                    .iter()
                    .find(|(from, _)| *from == key)
                    .map(|(_, to)| to.clone())
                    .unwrap_or(key);
                (renamed, value)
            })
            .collect()
    }

    fn apply_select(&self, mut row: FlatRow) -> FlatRow {
        match &self.config.select {
            None => row,
            Some(columns) => {
                let mut selected = FlatRow::new();
                for column in columns {
                    if let Some(value) = row.remove(column) {
                        selected.insert(column.clone(), value);
                    }
                }
                selected
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
