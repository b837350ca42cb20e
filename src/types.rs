use crate::error::{ExplorerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// One flattened record: column name to scalar cell, in insertion order.
/// A missing key is an absent cell.
pub type FlatRow = Map<String, Value>;

/// Credentials and endpoints for one authenticated platform session
///
/// Immutable once built; share it freely between independent fetches.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionContext {
    token: String,
    url_rest: String,
    url_graphql: String,
    headers_rest: BTreeMap<String, String>,
    headers_graphql: BTreeMap<String, String>,
}

impl SessionContext {
    /// Build a session from an already issued bearer token
    pub fn from_token(
        token: impl Into<String>,
        url_rest: impl AsRef<str>,
        url_graphql: impl AsRef<str>,
    ) -> Self {
        let token = token.into();
        let bearer = format!("Bearer {}", token);

        let mut headers_rest = BTreeMap::new();
        headers_rest.insert("Authorization".to_string(), bearer.clone());

        let mut headers_graphql = BTreeMap::new();
        headers_graphql.insert("Authorization".to_string(), bearer);
        headers_graphql.insert("Content-Type".to_string(), "application/json".to_string());

        SessionContext {
            token,
            url_rest: url_rest.as_ref().trim_end_matches('/').to_string(),
            url_graphql: url_graphql.as_ref().trim_end_matches('/').to_string(),
            headers_rest,
            headers_graphql,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn url_rest(&self) -> &str {
        &self.url_rest
    }

    pub fn url_graphql(&self) -> &str {
        &self.url_graphql
    }

    pub fn headers_rest(&self) -> &BTreeMap<String, String> {
        &self.headers_rest
    }

    pub fn headers_graphql(&self) -> &BTreeMap<String, String> {
        &self.headers_graphql
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("token", &"<redacted>")
            .field("url_rest", &self.url_rest)
            .field("url_graphql", &self.url_graphql)
            .finish()
    }
}

/// Levels of the germplasm hierarchy: SeedLot ⊃ Accession ⊃ Variety ⊃ Species
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GermplasmLevel {
    Species,
    Variety,
    Accession,
    SeedLot,
}

impl GermplasmLevel {
    /// Parse a level from a type name or type URI
    ///
    /// Accepts `Species`, `vocabulary:SeedLot`,
    /// `http://www.opensilex.org/vocabulary/oeso#Accession` and so on.
    pub fn parse(type_name: &str) -> Option<Self> {
        let local = type_name
            .rsplit(|c: char| c == '#' || c == '/' || c == ':')
            .next()
            .unwrap_or(type_name)
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-', ' '], "");

        match local.as_str() {
            "species" => Some(GermplasmLevel::Species),
            "variety" => Some(GermplasmLevel::Variety),
            "accession" => Some(GermplasmLevel::Accession),
            "seedlot" => Some(GermplasmLevel::SeedLot),
            _ => None,
        }
    }

    /// Lowercase name used as the `germplasm_type_i` cell value
    pub fn as_str(self) -> &'static str {
        match self {
            GermplasmLevel::Species => "species",
            GermplasmLevel::Variety => "variety",
            GermplasmLevel::Accession => "accession",
            GermplasmLevel::SeedLot => "seedlot",
        }
    }

    /// Prefix of the ordinal ancestor column for this level (`Species_2`)
    pub fn column_prefix(self) -> &'static str {
        match self {
            GermplasmLevel::Species => "Species",
            GermplasmLevel::Variety => "Variety",
            GermplasmLevel::Accession => "Accession",
            GermplasmLevel::SeedLot => "SeedLot",
        }
    }

    /// Ancestor levels implied by this level, nearest first
    pub fn ancestors(self) -> &'static [GermplasmLevel] {
        match self {
            GermplasmLevel::Species => &[],
            GermplasmLevel::Variety => &[GermplasmLevel::Species],
            GermplasmLevel::Accession => &[GermplasmLevel::Variety, GermplasmLevel::Species],
            GermplasmLevel::SeedLot => &[
                GermplasmLevel::Accession,
                GermplasmLevel::Variety,
                GermplasmLevel::Species,
            ],
        }
    }
}

impl fmt::Display for GermplasmLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A germplasm referenced by a scientific object, tagged by hierarchy level
///
/// Ancestor names are whatever the server resolved at fetch time; `None`
/// means the link was not available, not that the value is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GermplasmRef {
    Species {
        name: String,
    },
    Variety {
        name: String,
        species: Option<String>,
    },
    Accession {
        name: String,
        variety: Option<String>,
        species: Option<String>,
    },
    SeedLot {
        name: String,
        accession: Option<String>,
        variety: Option<String>,
        species: Option<String>,
    },
}

impl GermplasmRef {
    pub fn level(&self) -> GermplasmLevel {
        match self {
            GermplasmRef::Species { .. } => GermplasmLevel::Species,
            GermplasmRef::Variety { .. } => GermplasmLevel::Variety,
            GermplasmRef::Accession { .. } => GermplasmLevel::Accession,
            GermplasmRef::SeedLot { .. } => GermplasmLevel::SeedLot,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GermplasmRef::Species { name }
            | GermplasmRef::Variety { name, .. }
            | GermplasmRef::Accession { name, .. }
            | GermplasmRef::SeedLot { name, .. } => name,
        }
    }

    /// Resolved ancestor name at `level`, if this germplasm's type implies one
    pub fn ancestor(&self, level: GermplasmLevel) -> Option<&str> {
        let slot = match (self, level) {
            (GermplasmRef::Variety { species, .. }, GermplasmLevel::Species) => species,
            (GermplasmRef::Accession { species, .. }, GermplasmLevel::Species) => species,
            (GermplasmRef::Accession { variety, .. }, GermplasmLevel::Variety) => variety,
            (GermplasmRef::SeedLot { species, .. }, GermplasmLevel::Species) => species,
            (GermplasmRef::SeedLot { variety, .. }, GermplasmLevel::Variety) => variety,
            (GermplasmRef::SeedLot { accession, .. }, GermplasmLevel::Accession) => accession,
            _ => return None,
        };
        slot.as_deref()
    }

    /// Parse one `hasGermplasm` element of a GraphQL scientific object
    pub fn from_record(record: &Value, resource: &str) -> Result<Self> {
        let name = required_label(record, resource, "germplasm")?;

        // Inferred types may list a superclass before the germplasm class
        let mut type_names = strings(record.get("_type"));
        type_names.extend(strings(record.get("type")));
        if type_names.is_empty() {
            return Err(ExplorerError::schema(
                resource,
                format!("germplasm '{}' has no type", name),
            ));
        }

        let level = type_names
            .iter()
            .find_map(|t| GermplasmLevel::parse(t))
            .ok_or_else(|| {
                ExplorerError::schema(
                    resource,
                    format!("germplasm '{}' has unknown type '{}'", name, type_names.join(", ")),
                )
            })?;

        let species = joined_labels(record.get("fromSpecies"));
        let variety = joined_labels(record.get("fromVariety"));
        let accession = joined_labels(record.get("fromAccession"));

        Ok(match level {
            GermplasmLevel::Species => GermplasmRef::Species { name },
            GermplasmLevel::Variety => GermplasmRef::Variety { name, species },
            GermplasmLevel::Accession => GermplasmRef::Accession { name, variety, species },
            GermplasmLevel::SeedLot => GermplasmRef::SeedLot {
                name,
                accession,
                variety,
                species,
            },
        })
    }
}

/// The level a scientific object takes for one experimental factor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactorLevelRef {
    pub factor: String,
    pub level: String,
}

impl FactorLevelRef {
    pub fn new(factor: impl Into<String>, level: impl Into<String>) -> Self {
        FactorLevelRef {
            factor: factor.into(),
            level: level.into(),
        }
    }

    /// Parse one `hasFactorLevel` element (`{label, hasFactor: [{label}]}`)
    pub fn from_record(record: &Value, resource: &str) -> Result<Self> {
        let level = required_label(record, resource, "factor level")?;
        let factor = record
            .get("hasFactor")
            .and_then(|f| match f {
                Value::Array(items) => items.first(),
                Value::Object(_) => Some(f),
                _ => None,
            })
            .and_then(|f| f.get("label"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ExplorerError::schema(resource, format!("factor level '{}' has no factor", level))
            })?;

        Ok(FactorLevelRef::new(factor, level))
    }
}

/// A scientific object with its factor levels and germplasm, as fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScientificObject {
    pub uri: String,
    pub name: String,
    pub rdf_type: Option<String>,
    pub factor_levels: Vec<FactorLevelRef>,
    pub germplasm: Vec<GermplasmRef>,
}

impl ScientificObject {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        ScientificObject {
            uri: uri.into(),
            name: name.into(),
            rdf_type: None,
            factor_levels: Vec::new(),
            germplasm: Vec::new(),
        }
    }

    pub fn with_type(mut self, rdf_type: impl Into<String>) -> Self {
        self.rdf_type = Some(rdf_type.into());
        self
    }

    /// Attach a factor level; a second, different level for the same factor is rejected
    pub fn with_factor_level(mut self, factor_level: FactorLevelRef) -> std::result::Result<Self, String> {
        self.push_factor_level(factor_level)?;
        Ok(self)
    }

    pub fn with_germplasm(mut self, germplasm: GermplasmRef) -> Self {
        self.germplasm.push(germplasm);
        self
    }

    /// Level name for `factor`, if the object carries one
    pub fn level_for(&self, factor: &str) -> Option<&str> {
        self.factor_levels
            .iter()
            .find(|fl| fl.factor == factor)
            .map(|fl| fl.level.as_str())
    }

    fn push_factor_level(&mut self, factor_level: FactorLevelRef) -> std::result::Result<(), String> {
        match self.level_for(&factor_level.factor) {
            None => {
                self.factor_levels.push(factor_level);
                Ok(())
            }
            Some(existing) if existing == factor_level.level => Ok(()),
            Some(existing) => Err(format!(
                "object '{}' has two levels for factor '{}': '{}' and '{}'",
                self.uri, factor_level.factor, existing, factor_level.level
            )),
        }
    }

    /// Parse one GraphQL `ScientificObject` record
    pub fn from_record(record: &Value, resource: &str) -> Result<Self> {
        if !record.is_object() {
            return Err(ExplorerError::schema(resource, "scientific object is not an object"));
        }

        let uri = record
            .get("_id")
            .or_else(|| record.get("uri"))
            .and_then(Value::as_str)
            .ok_or_else(|| ExplorerError::schema(resource, "scientific object has no _id"))?;
        let name = required_label(record, resource, "scientific object")?;

        let mut object = ScientificObject::new(uri, name);
        object.rdf_type = record.get("_type").and_then(first_string);

        for fl in optional_array(record, "hasFactorLevel", resource)? {
            let factor_level = FactorLevelRef::from_record(fl, resource)?;
            object
                .push_factor_level(factor_level)
                .map_err(|msg| ExplorerError::schema(resource, msg))?;
        }

        for g in optional_array(record, "hasGermplasm", resource)? {
            object.germplasm.push(GermplasmRef::from_record(g, resource)?);
        }

        Ok(object)
    }
}

/// Configuration for flattening generic (non-hierarchical) records
#[derive(Debug, Clone)]
pub struct MeltConfig {
    /// Maximum object nesting to flatten; deeper values are kept as JSON text
    pub max_depth: usize,

    /// Separator between parent and child names in column names
    pub separator: String,

    /// Separator used when a list of labels collapses into one cell
    pub list_separator: String,

    /// Fields whose value names an element of a linked list (`label`, `name`)
    pub label_fields: Vec<String>,

    /// Column renames applied after flattening, e.g. `_id` to `URI`
    pub renames: Vec<(String, String)>,

    /// When set, keep only these columns, in this order
    pub select: Option<Vec<String>>,
}

impl Default for MeltConfig {
    fn default() -> Self {
        MeltConfig {
            max_depth: 4,
            separator: String::from("_"),
            list_separator: String::from(", "),
            label_fields: vec![String::from("label"), String::from("name")],
            renames: vec![],
            select: None,
        }
    }
}

impl MeltConfig {
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.push((from.into(), to.into()));
        self
    }

    pub fn select<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.select = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }
}

fn required_label(record: &Value, resource: &str, what: &str) -> Result<String> {
    record
        .get("label")
        .or_else(|| record.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ExplorerError::schema(resource, format!("{} has no label", what)))
}

/// Absent or null counts as empty; anything other than an array is a shape error
fn optional_array<'a>(record: &'a Value, field: &str, resource: &str) -> Result<&'a [Value]> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(ExplorerError::schema(resource, format!("'{}' is not an array", field))),
    }
}

/// First string of a string-or-array-of-strings field
fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Labels of a resolved link list joined with ", "; `None` when nothing resolved
pub(crate) fn joined_labels(value: Option<&Value>) -> Option<String> {
    let labels: Vec<&str> = match value? {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("label").and_then(Value::as_str))
            .collect(),
        Value::Object(_) => value?.get("label").and_then(Value::as_str).into_iter().collect(),
        _ => Vec::new(),
    };

    if labels.is_empty() {
        None
    } else {
        Some(labels.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_trims_urls_and_builds_headers() {
        let session = SessionContext::from_token("abc", "http://host/rest/", "http://host/graphql/");

        assert_eq!(session.url_rest(), "http://host/rest");
        assert_eq!(session.url_graphql(), "http://host/graphql");
        assert_eq!(session.headers_rest()["Authorization"], "Bearer abc");
        assert_eq!(session.headers_graphql()["Content-Type"], "application/json");
        assert!(!format!("{:?}", session).contains("abc"));
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(GermplasmLevel::parse("Species"), Some(GermplasmLevel::Species));
        assert_eq!(GermplasmLevel::parse("vocabulary:SeedLot"), Some(GermplasmLevel::SeedLot));
        assert_eq!(
            GermplasmLevel::parse("http://www.opensilex.org/vocabulary/oeso#Accession"),
            Some(GermplasmLevel::Accession)
        );
        assert_eq!(GermplasmLevel::parse("seed_lot"), Some(GermplasmLevel::SeedLot));
        assert_eq!(GermplasmLevel::parse("Plot"), None);
    }

    #[test]
    fn test_germplasm_ancestors_follow_level() {
        let record = json!({
            "label": "A1",
            "_type": ["vocabulary:Accession"],
            "fromSpecies": [{"label": "Sp1"}],
            "fromVariety": [{"label": "V1"}],
            "fromAccession": [{"label": "ignored"}]
        });

        let g = GermplasmRef::from_record(&record, "ScientificObject").unwrap();
        assert_eq!(g.level(), GermplasmLevel::Accession);
        assert_eq!(g.name(), "A1");
        assert_eq!(g.ancestor(GermplasmLevel::Variety), Some("V1"));
        assert_eq!(g.ancestor(GermplasmLevel::Species), Some("Sp1"));
        assert_eq!(g.ancestor(GermplasmLevel::Accession), None);
    }

    #[test]
    fn test_species_ignores_ancestor_links() {
        let record = json!({
            "label": "S1",
            "_type": ["vocabulary:Species"],
            "fromVariety": [{"label": "V1"}]
        });

        let g = GermplasmRef::from_record(&record, "ScientificObject").unwrap();
        assert_eq!(g, GermplasmRef::Species { name: "S1".to_string() });
    }

    #[test]
    fn test_missing_ancestor_stays_none() {
        let record = json!({"label": "V1", "_type": ["Variety"], "fromSpecies": []});
        let g = GermplasmRef::from_record(&record, "ScientificObject").unwrap();
        assert_eq!(g.ancestor(GermplasmLevel::Species), None);
    }

    #[test]
    fn test_unknown_germplasm_type_is_schema_error() {
        let record = json!({"label": "X", "_type": ["vocabulary:Plot"]});
        let err = GermplasmRef::from_record(&record, "ScientificObject").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Schema);
    }

    #[test]
    fn test_germplasm_class_found_after_superclass() {
        let record = json!({
            "label": "V1",
            "_type": ["vocabulary:Germplasm", "http://www.opensilex.org/vocabulary/oeso#Variety"],
            "fromSpecies": [{"label": "Maize"}]
        });

        let g = GermplasmRef::from_record(&record, "ScientificObject").unwrap();
        assert_eq!(g.level(), GermplasmLevel::Variety);
        assert_eq!(g.ancestor(GermplasmLevel::Species), Some("Maize"));
    }

    #[test]
    fn test_scientific_object_parsing() {
        let record = json!({
            "_id": "http://ex/so/1",
            "label": "plant 1",
            "_type": ["vocabulary:Plant"],
            "hasFactorLevel": [
                {"label": "WW", "hasFactor": [{"label": " Irrigation "}]}
            ],
            "hasGermplasm": [
                {"label": "S1", "_type": ["Species"]}
            ]
        });

        let object = ScientificObject::from_record(&record, "ScientificObject").unwrap();
        assert_eq!(object.uri, "http://ex/so/1");
        assert_eq!(object.rdf_type.as_deref(), Some("vocabulary:Plant"));
        assert_eq!(object.level_for("Irrigation"), Some("WW"));
        assert_eq!(object.germplasm.len(), 1);
    }

    #[test]
    fn test_conflicting_factor_levels_rejected() {
        let record = json!({
            "_id": "so1",
            "label": "plant 1",
            "hasFactorLevel": [
                {"label": "WW", "hasFactor": [{"label": "Irrigation"}]},
                {"label": "WD", "hasFactor": [{"label": "Irrigation"}]}
            ]
        });

        let err = ScientificObject::from_record(&record, "ScientificObject").unwrap_err();
        assert!(err.to_string().contains("two levels"));
    }

    #[test]
    fn test_repeated_identical_factor_level_collapses() {
        let object = ScientificObject::new("so1", "p1")
            .with_factor_level(FactorLevelRef::new("Irrigation", "WW"))
            .and_then(|o| o.with_factor_level(FactorLevelRef::new("Irrigation", "WW")))
            .unwrap();
        assert_eq!(object.factor_levels.len(), 1);
    }
}
