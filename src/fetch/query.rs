//! Filter composition
//!
//! A [`FilterSet`] holds two families of clauses. Server clauses travel with
//! the request (REST query parameters or the GraphQL `filter` variable).
//! Local clauses are predicates evaluated on the assembled table, for the
//! criteria the platform cannot filter on itself (name substrings, active
//! date, factor-level and germplasm name matching).

use crate::error::{ExplorerError, Result};
use crate::melt::plan::{ancestor_column, germplasm_name_column, germplasm_type_column};
use crate::melt::table::Table;
use crate::types::{FlatRow, GermplasmLevel};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

static ISO_DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap()
});

static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap()
});

/// A single filter criterion
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Server: field equals a value (string or list of strings)
    Equals { field: String, value: Value },
    /// Server: field within an inclusive date range
    DateRange {
        field: String,
        gte: Option<String>,
        lte: Option<String>,
    },
    /// Local: case-insensitive substring of a column
    Contains { column: String, needle: String },
    /// Local: `start_column <= date <= end_column`
    ActiveOn {
        start_column: String,
        end_column: String,
        date: NaiveDate,
    },
    /// Local: the factor column holds this level
    FactorLevel { factor: String, level: String },
    /// Local: some germplasm of the row has this level
    GermplasmType { level: GermplasmLevel },
    /// Local: some germplasm (or ancestor) of this level has this name
    GermplasmName { level: GermplasmLevel, name: String },
}

impl Clause {
    pub fn is_server_side(&self) -> bool {
        matches!(self, Clause::Equals { .. } | Clause::DateRange { .. })
    }

    /// Evaluate a local clause against one row; server clauses always pass
    pub fn matches(&self, row: &FlatRow) -> bool {
        match self {
            Clause::Equals { .. } | Clause::DateRange { .. } => true,
            Clause::Contains { column, needle } => cell_str(row, column)
                .map(|v| v.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Clause::ActiveOn {
                start_column,
                end_column,
                date,
            } => {
                let start = cell_str(row, start_column).and_then(parse_date);
                let end = cell_str(row, end_column).and_then(parse_date);
                match (start, end) {
                    (Some(start), Some(end)) => start <= *date && *date <= end,
                    _ => false,
                }
            }
            Clause::FactorLevel { factor, level } => cell_str(row, factor).map(str::trim) == Some(level.as_str()),
            Clause::GermplasmType { level } => germplasm_ordinals(row)
                .any(|i| cell_str(row, &germplasm_type_column(i)) == Some(level.as_str())),
            Clause::GermplasmName { level, name } => germplasm_ordinals(row).any(|i| {
                let own = cell_str(row, &germplasm_type_column(i)) == Some(level.as_str())
                    && cell_str(row, &germplasm_name_column(i)) == Some(name.as_str());
                own || cell_str(row, &ancestor_column(*level, i)) == Some(name.as_str())
            }),
        }
    }
}

/// The compiled filters of one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    clauses: Vec<Clause>,
}

impl FilterSet {
    pub fn new() -> Self {
        FilterSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn server_clauses(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter().filter(|c| c.is_server_side())
    }

    pub fn local_clauses(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter().filter(|c| !c.is_server_side())
    }

    /// Server clauses as REST query parameters; list values repeat the key
    pub fn to_rest_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        for clause in self.server_clauses() {
            match clause {
                Clause::Equals { field, value } => match value {
                    Value::Array(items) => {
                        for item in items {
                            params.push((field.clone(), scalar_text(item)));
                        }
                    }
                    other => params.push((field.clone(), scalar_text(other))),
                },
                Clause::DateRange { gte, lte, .. } => {
                    if let Some(gte) = gte {
                        params.push(("start_date".to_string(), gte.clone()));
                    }
                    if let Some(lte) = lte {
                        params.push(("end_date".to_string(), lte.clone()));
                    }
                }
                _ => {}
            }
        }
        params
    }

    /// Server clauses as a GraphQL `filter` object, `None` when there are none
    pub fn to_graphql_filter(&self) -> Option<Value> {
        let mut filter = Map::new();
        for clause in self.server_clauses() {
            match clause {
                Clause::Equals { field, value } => insert_path(&mut filter, field, value.clone()),
                Clause::DateRange { field, gte, lte } => {
                    let mut range = Map::new();
                    if let Some(gte) = gte {
                        range.insert("gte".to_string(), Value::String(gte.clone()));
                    }
                    if let Some(lte) = lte {
                        range.insert("lte".to_string(), Value::String(lte.clone()));
                    }
                    let operators = filter
                        .entry("_operators")
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(ops) = operators {
                        ops.insert(field.clone(), Value::Object(range));
                    }
                }
                _ => {}
            }
        }

        if filter.is_empty() {
            None
        } else {
            Some(Value::Object(filter))
        }
    }

    /// Does the row satisfy every local clause?
    pub fn matches(&self, row: &FlatRow) -> bool {
        self.local_clauses().all(|c| c.matches(row))
    }

    /// Drop the rows that fail a local clause
    ///
    /// A factor-level clause naming a factor the table has no column for is
    /// skipped with a warning rather than emptying the table.
    pub fn apply(&self, table: &mut Table) {
        let active: Vec<&Clause> = self
            .local_clauses()
            .filter(|clause| match clause {
                Clause::FactorLevel { factor, .. } if !table.has_column(factor) => {
                    warn!(factor = %factor, "factor not found in table columns, skipping filter");
                    false
                }
                _ => true,
            })
            .collect();

        if active.is_empty() {
            return;
        }
        table.retain(|row| active.iter().all(|c| c.matches(row)));
    }
}

/// Assembles a [`FilterSet`] from optional caller criteria
///
/// Absent or blank arguments add nothing. Invalid arguments are remembered
/// and reported by [`QueryBuilder::build`], so the whole request is rejected
/// before any network access.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    clauses: Vec<Clause>,
    errors: Vec<String>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        QueryBuilder::default()
    }

    pub fn equals(mut self, field: &str, value: Option<&str>) -> Self {
        if let Some(value) = non_blank(value) {
            self.clauses.push(Clause::Equals {
                field: field.to_string(),
                value: Value::String(value.to_string()),
            });
        }
        self
    }

    pub fn equals_any<S: AsRef<str>>(mut self, field: &str, values: &[S]) -> Self {
        let values: Vec<Value> = values
            .iter()
            .filter_map(|v| non_blank(Some(v.as_ref())))
            .map(|v| Value::String(v.to_string()))
            .collect();
        if !values.is_empty() {
            self.clauses.push(Clause::Equals {
                field: field.to_string(),
                value: Value::Array(values),
            });
        }
        self
    }

    pub fn contains(mut self, column: &str, needle: Option<&str>) -> Self {
        if let Some(needle) = non_blank(needle) {
            self.clauses.push(Clause::Contains {
                column: column.to_string(),
                needle: needle.to_string(),
            });
        }
        self
    }

    pub fn active_on(mut self, start_column: &str, end_column: &str, date: Option<&str>) -> Self {
        if let Some(raw) = non_blank(date) {
            match parse_date(raw) {
                Some(date) => self.clauses.push(Clause::ActiveOn {
                    start_column: start_column.to_string(),
                    end_column: end_column.to_string(),
                    date,
                }),
                None => self.errors.push(format!(
                    "active date '{}' is not a YYYY-MM-DD date",
                    raw
                )),
            }
        }
        self
    }

    pub fn date_range(mut self, field: &str, begin: Option<&str>, end: Option<&str>) -> Self {
        let begin = non_blank(begin);
        let end = non_blank(end);
        if begin.is_none() && end.is_none() {
            return self;
        }

        let mut bound = |raw: Option<&str>, label: &str| -> Option<NaiveDate> {
            let raw = raw?;
            let parsed = parse_date(raw);
            if parsed.is_none() {
                self.errors.push(format!("{} date '{}' is not a valid date", label, raw));
            }
            parsed
        };
        let begin_date = bound(begin, "begin");
        let end_date = bound(end, "end");

        if let (Some(b), Some(e)) = (begin_date, end_date) {
            if b > e {
                self.errors.push(format!(
                    "date range begins after it ends ({} > {})",
                    b, e
                ));
            }
        }
        if (begin.is_some() && begin_date.is_none()) || (end.is_some() && end_date.is_none()) {
            return self;
        }

        self.clauses.push(Clause::DateRange {
            field: field.to_string(),
            gte: begin.map(|b| expand_bound(b, "T00:00:00.000Z")),
            lte: end.map(|e| expand_bound(e, "T23:59:59.999Z")),
        });
        self
    }

    /// Factor-level criteria written as `Factor.Level`
    pub fn factor_levels<S: AsRef<str>>(mut self, pairs: &[S]) -> Self {
        for pair in pairs {
            let pair = pair.as_ref().trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('.') {
                Some((factor, level)) if !factor.trim().is_empty() && !level.trim().is_empty() => {
                    self.clauses.push(Clause::FactorLevel {
                        factor: factor.trim().to_string(),
                        level: level.trim().to_string(),
                    });
                }
                _ => self.errors.push(format!(
                    "factor level '{}' must be written as 'Factor.Level'",
                    pair
                )),
            }
        }
        self
    }

    /// Germplasm criteria; a name is only meaningful together with its type
    pub fn germplasm(mut self, germplasm_type: Option<&str>, name: Option<&str>) -> Self {
        let germplasm_type = non_blank(germplasm_type);
        let name = non_blank(name);

        let level = match germplasm_type {
            None => {
                if let Some(name) = name {
                    self.errors.push(format!(
                        "germplasm name '{}' requires a germplasm type",
                        name
                    ));
                }
                return self;
            }
            Some(raw) => match GermplasmLevel::parse(raw) {
                Some(level) => level,
                None => {
                    self.errors.push(format!("unknown germplasm type '{}'", raw));
                    return self;
                }
            },
        };

        match name {
            Some(name) => self.clauses.push(Clause::GermplasmName {
                level,
                name: name.to_string(),
            }),
            None => self.clauses.push(Clause::GermplasmType { level }),
        }
        self
    }

    pub fn build(self) -> Result<FilterSet> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(ExplorerError::validation(first));
        }
        Ok(FilterSet {
            clauses: self.clauses,
        })
    }
}

/// Parse `YYYY-MM-DD` or an ISO 8601 datetime down to its calendar date
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if ISO_DATE_REGEX.is_match(raw) {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
    }
    if ISO_DATETIME_REGEX.is_match(raw) {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.date_naive());
        }
        return NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|dt| dt.date());
    }
    None
}

fn expand_bound(raw: &str, time_suffix: &str) -> String {
    if raw.contains('T') {
        raw.to_string()
    } else {
        format!("{}{}", raw, time_suffix)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn cell_str<'a>(row: &'a FlatRow, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Ordinals 1.. for which the row carries a germplasm
fn germplasm_ordinals(row: &FlatRow) -> impl Iterator<Item = usize> + '_ {
    (1..).take_while(move |i| row.contains_key(&germplasm_name_column(*i)))
}

/// Insert `value` at a dotted path, creating intermediate objects
fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = target;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn row(value: Value) -> FlatRow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_unset_filters_produce_no_clauses() {
        let filters = QueryBuilder::new()
            .equals("hasSpecies", None)
            .equals("hasProject", Some("  "))
            .equals_any::<&str>("type", &[])
            .contains("hasSpecies", None)
            .active_on("startDate", "endDate", None)
            .date_range("date", None, None)
            .factor_levels::<&str>(&[])
            .germplasm(None, None)
            .build()
            .unwrap();

        assert!(filters.is_empty());
        assert!(filters.to_rest_params().is_empty());
        assert_eq!(filters.to_graphql_filter(), None);
    }

    #[test]
    fn test_server_clauses_render_for_graphql() {
        let filters = QueryBuilder::new()
            .equals("type", Some("vocabulary:Plant"))
            .equals("provenance.provWasAssociatedWith.uri", Some("dev:1"))
            .date_range("date", Some("2023-01-01"), Some("2023-01-31"))
            .build()
            .unwrap();

        assert_eq!(
            filters.to_graphql_filter().unwrap(),
            json!({
                "type": "vocabulary:Plant",
                "provenance": {"provWasAssociatedWith": {"uri": "dev:1"}},
                "_operators": {"date": {
                    "gte": "2023-01-01T00:00:00.000Z",
                    "lte": "2023-01-31T23:59:59.999Z"
                }}
            })
        );
    }

    #[test]
    fn test_server_clauses_render_for_rest() {
        let filters = QueryBuilder::new()
            .equals("facility", Some("fac:1"))
            .equals_any("experiments", &["exp:1", "exp:2"])
            .build()
            .unwrap();

        assert_eq!(
            filters.to_rest_params(),
            vec![
                ("facility".to_string(), "fac:1".to_string()),
                ("experiments".to_string(), "exp:1".to_string()),
                ("experiments".to_string(), "exp:2".to_string()),
            ]
        );
    }

    #[test]
    fn test_local_clauses_stay_out_of_requests() {
        let filters = QueryBuilder::new()
            .contains("hasSpecies", Some("maize"))
            .active_on("startDate", "endDate", Some("2023-06-01"))
            .build()
            .unwrap();

        assert_eq!(filters.len(), 2);
        assert_eq!(filters.to_graphql_filter(), None);
        assert!(filters.to_rest_params().is_empty());
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let filters = QueryBuilder::new()
            .contains("hasSpecies", Some("MAIZE"))
            .build()
            .unwrap();

        assert!(filters.matches(&row(json!({"hasSpecies": "Zea mays, maize"}))));
        assert!(!filters.matches(&row(json!({"hasSpecies": "wheat"}))));
        assert!(!filters.matches(&row(json!({"Name": "maize"}))));
    }

    #[test]
    fn test_active_on_is_inclusive() {
        let filters = QueryBuilder::new()
            .active_on("startDate", "endDate", Some("2023-06-01"))
            .build()
            .unwrap();

        assert!(filters.matches(&row(json!({"startDate": "2023-06-01", "endDate": "2023-06-01"}))));
        assert!(filters.matches(&row(json!({
            "startDate": "2023-01-01T00:00:00.000Z",
            "endDate": "2023-12-31T00:00:00Z"
        }))));
        assert!(!filters.matches(&row(json!({"startDate": "2023-07-01", "endDate": "2023-12-31"}))));
        assert!(!filters.matches(&row(json!({"startDate": "2023-01-01"}))));
    }

    #[test]
    fn test_germplasm_name_without_type_is_rejected() {
        let err = QueryBuilder::new()
            .germplasm(None, Some("B73"))
            .build()
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("requires a germplasm type"));
    }

    #[test]
    fn test_bad_inputs_are_rejected() {
        assert!(QueryBuilder::new().factor_levels(&["Irrigation"]).build().is_err());
        assert!(QueryBuilder::new().germplasm(Some("Plot"), None).build().is_err());
        assert!(QueryBuilder::new().active_on("s", "e", Some("01/06/2023")).build().is_err());
        assert!(QueryBuilder::new()
            .date_range("date", Some("2023-02-01"), Some("2023-01-01"))
            .build()
            .is_err());
    }

    #[test]
    fn test_datetime_bounds_pass_through() {
        let filters = QueryBuilder::new()
            .date_range("date", Some("2023-01-01T06:00:00Z"), None)
            .build()
            .unwrap();

        assert_eq!(
            filters.clauses()[0],
            Clause::DateRange {
                field: "date".to_string(),
                gte: Some("2023-01-01T06:00:00Z".to_string()),
                lte: None,
            }
        );
    }

    #[test]
    fn test_germplasm_clauses_match_ordinal_columns() {
        let r = row(json!({
            "germplasm_type_1": "species",
            "germplasm_name_1": "S1",
            "germplasm_type_2": "accession",
            "germplasm_name_2": "A1",
            "Variety_2": "V1",
            "Species_2": "Sp1"
        }));

        let by_type = QueryBuilder::new().germplasm(Some("Accession"), None).build().unwrap();
        assert!(by_type.matches(&r));

        let by_name = QueryBuilder::new().germplasm(Some("accession"), Some("A1")).build().unwrap();
        assert!(by_name.matches(&r));

        let by_ancestor = QueryBuilder::new().germplasm(Some("variety"), Some("V1")).build().unwrap();
        assert!(by_ancestor.matches(&r));

        let miss = QueryBuilder::new().germplasm(Some("seedlot"), None).build().unwrap();
        assert!(!miss.matches(&r));
    }

    #[test]
    fn test_factor_level_filter_on_table() {
        use crate::melt::table::TabularAssembler;

        let mut table = TabularAssembler::new().assemble(vec![
            row(json!({"URI": "so1", "Irrigation": "WW"})),
            row(json!({"URI": "so2", "Irrigation": "WD"})),
        ]);

        let filters = QueryBuilder::new()
            .factor_levels(&["Irrigation.WD", "Unknown.X"])
            .build()
            .unwrap();
        filters.apply(&mut table);

        assert_eq!(table.len(), 1);
        assert_eq!(table.cell(0, "URI"), Some(&json!("so2")));
    }

    #[test]
    fn test_factor_level_matches_whole_cell() {
        let filters = QueryBuilder::new().factor_levels(&["Irrigation.WD"]).build().unwrap();

        assert!(filters.matches(&row(json!({"Irrigation": " WD "}))));
        assert!(!filters.matches(&row(json!({"Irrigation": "WW, WD"}))));
        assert!(!filters.matches(&row(json!({"Nitrogen": "WD"}))));
    }
}
