//! Resource descriptions and response normalization
//!
//! A [`Resource`] says where a record array lives inside a page payload.
//! [`normalize`] pulls that array out and refuses anything else: a missing
//! field or a non-array value is a schema error, never an empty page.

use crate::error::{ExplorerError, Result};
use serde_json::{Map, Value};

/// How a resource is reached
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// `GET {url_rest}{route}`
    Rest { route: String },
    /// `POST {url_graphql}` with this query document
    GraphQl { query: String },
}

/// A fetchable resource and the location of its records in a payload
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    name: String,
    endpoint: Endpoint,
    array_path: Vec<String>,
    params: Vec<(String, String)>,
    variables: Map<String, Value>,
    paginated: bool,
}

impl Resource {
    /// A paginated REST collection whose records sit under `result`
    pub fn rest(name: impl Into<String>, route: impl Into<String>) -> Self {
        Resource {
            name: name.into(),
            endpoint: Endpoint::Rest {
                route: route.into(),
            },
            array_path: vec!["result".to_string()],
            params: Vec::new(),
            variables: Map::new(),
            paginated: true,
        }
    }

    /// A GraphQL query whose records sit under `data.<root>`; unpaginated
    /// unless [`Resource::paginated`] says otherwise
    pub fn graphql(root: impl Into<String>, query: impl Into<String>) -> Self {
        let root = root.into();
        Resource {
            array_path: vec!["data".to_string(), root.clone()],
            name: root,
            endpoint: Endpoint::GraphQl {
                query: query.into(),
            },
            params: Vec::new(),
            variables: Map::new(),
            paginated: false,
        }
    }

    pub fn with_array_path(mut self, path: &[&str]) -> Self {
        self.array_path = path.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Fixed REST query parameter sent with every page
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Fixed GraphQL variable sent with every page
    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn paginated(mut self, paginated: bool) -> Self {
        self.paginated = paginated;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn array_path(&self) -> &[String] {
        &self.array_path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn is_paginated(&self) -> bool {
        self.paginated
    }

    /// Short label used in error messages
    pub fn label(&self) -> String {
        match &self.endpoint {
            Endpoint::Rest { route } => route.clone(),
            Endpoint::GraphQl { .. } => format!("graphql:{}", self.name),
        }
    }
}

/// Pagination hints a server may attach to a page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub total_count: Option<u64>,
    pub total_pages: Option<u64>,
    pub has_next_page: Option<bool>,
}

impl PageMeta {
    /// Read `metadata.pagination` when present
    pub fn from_payload(payload: &Value) -> Self {
        let Some(pagination) = payload.pointer("/metadata/pagination") else {
            return PageMeta::default();
        };
        PageMeta {
            total_count: pagination.get("totalCount").and_then(Value::as_u64),
            total_pages: pagination.get("totalPages").and_then(Value::as_u64),
            has_next_page: pagination.get("hasNextPage").and_then(Value::as_bool),
        }
    }
}

/// Extract the resource's record array from a page payload
///
/// An array met before the end of the path is walked element by element and
/// the results concatenated in order, so `data.Experiment.usesFacility`
/// yields the facilities of every matched experiment.
pub fn normalize(payload: Value, resource: &Resource) -> Result<Vec<Value>> {
    let path = resource.array_path();
    let mut frontier = vec![payload];

    for (depth, segment) in path.iter().enumerate() {
        let mut next = Vec::with_capacity(frontier.len());
        for value in frontier {
            descend(value, segment, &mut next)
                .map_err(|found| shape_error(resource, &path[..=depth], &found))?;
        }
        frontier = next;
    }

    let mut records = Vec::new();
    for value in frontier {
        match value {
            Value::Array(items) => records.extend(items),
            other => {
                return Err(shape_error(
                    resource,
                    path,
                    &format!("{} instead of an array", kind_of(&other)),
                ))
            }
        }
    }
    Ok(records)
}

fn descend(value: Value, segment: &str, out: &mut Vec<Value>) -> std::result::Result<(), String> {
    match value {
        Value::Object(mut obj) => match obj.remove(segment) {
            Some(inner) => {
                out.push(inner);
                Ok(())
            }
            None => Err("missing field".to_string()),
        },
        Value::Array(items) => {
            for item in items {
                descend(item, segment, out)?;
            }
            Ok(())
        }
        other => Err(format!("{} where an object was expected", kind_of(&other))),
    }
}

fn shape_error(resource: &Resource, path: &[String], found: &str) -> ExplorerError {
    ExplorerError::schema(
        resource.label(),
        format!("'{}': {}", path.join("."), found),
    )
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_rest_records() {
        let resource = Resource::rest("devices", "/core/devices");
        let payload = json!({
            "metadata": {"pagination": {"totalCount": 3, "pageSize": 20}},
            "result": [{"uri": "d1"}, {"uri": "d2"}, {"uri": "d3"}]
        });

        assert_eq!(PageMeta::from_payload(&payload).total_count, Some(3));
        let records = normalize(payload, &resource).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["uri"], "d3");
    }

    #[test]
    fn test_graphql_records() {
        let resource = Resource::graphql("Experiment", "query { Experiment { _id } }");
        let payload = json!({"data": {"Experiment": [{"_id": "e1"}]}});

        let records = normalize(payload, &resource).unwrap();
        assert_eq!(records, vec![json!({"_id": "e1"})]);
    }

    #[test]
    fn test_nested_path_walks_arrays() {
        let resource = Resource::graphql("Experiment", "")
            .with_array_path(&["data", "Experiment", "usesFacility"]);
        let payload = json!({"data": {"Experiment": [
            {"usesFacility": [{"_id": "f1"}, {"_id": "f2"}]},
            {"usesFacility": [{"_id": "f3"}]}
        ]}});

        let records = normalize(payload, &resource).unwrap();
        let ids: Vec<&str> = records.iter().filter_map(|r| r["_id"].as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2", "f3"]);
    }

    #[test]
    fn test_missing_field_is_schema_error() {
        let resource = Resource::rest("devices", "/core/devices");
        let err = normalize(json!({"metadata": {}}), &resource).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("/core/devices"));
        assert!(err.to_string().contains("'result'"));
    }

    #[test]
    fn test_non_array_is_schema_error() {
        let resource = Resource::graphql("Experiment", "");
        let err = normalize(json!({"data": {"Experiment": {"_id": "e1"}}}), &resource).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let err = normalize(json!({"data": null}), &resource).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_empty_array_is_fine() {
        let resource = Resource::rest("devices", "/core/devices");
        assert!(normalize(json!({"result": []}), &resource).unwrap().is_empty());
    }
}
