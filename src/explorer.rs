//! High-level operations over one authenticated session
//!
//! Each operation compiles its filters, fetches every page, reshapes the
//! records and returns a [`Table`]. Nothing is cached between calls.

use crate::auth::{login, Credentials};
use crate::config::{ExplorerConfig, DEFAULT_PAGE_SIZE};
use crate::error::{ExplorerError, Result};
use crate::fetch::normalize::Resource;
use crate::fetch::pager::PaginatedFetcher;
use crate::fetch::query::{parse_date, FilterSet, QueryBuilder};
use crate::fetch::transport::{HttpTransport, Transport};
use crate::melt::extractor::RecordMelter;
use crate::melt::planned_extractor::HierarchyFlattener;
use crate::melt::series::{SeriesSplitter, VariableSeries};
use crate::melt::table::{Table, TabularAssembler};
use crate::types::{FlatRow, MeltConfig, ScientificObject, SessionContext};
use serde_json::{json, Value};
use tracing::{debug, info};

const EXPERIMENTS_QUERY: &str = r#"
query list_experiments($filter: FilterExperiment) {
    Experiment(filter: $filter) {
        _id
        label
        startDate
        endDate
        hasSpecies { label }
        hasProject { label }
    }
}"#;

const EXPERIMENT_SOURCE_QUERY: &str = r#"
query experiment_source($id: [ID]) {
    Experiment(filter: {_id: $id}) {
        label
        startDate
    }
}"#;

const SCIENTIFIC_OBJECTS_QUERY: &str = r#"
query scientific_objects($experience: [DataSource], $filter: FilterScientificObject, $page: Int, $pageSize: Int) {
    ScientificObject(Experience: $experience, filter: $filter, inferred: true, page: $page, pageSize: $pageSize) {
        _id
        label
        _type
        hasFactorLevel {
            label
            hasFactor { label }
        }
        hasGermplasm {
            fromSpecies { _id label }
            fromVariety { _id label }
            fromAccession { _id label }
            label
            type
            _type(inferred: true)
        }
    }
}"#;

const FACILITIES_QUERY: &str = r#"
query facilities($experienceUri: [ID]) {
    Experiment(filter: {_id: $experienceUri}) {
        usesFacility {
            _id
            _type(inferred: true)
            geometry {
                geometry { type coordinates }
            }
            label
        }
    }
}"#;

const FACTORS_QUERY: &str = r#"
query factors($experimentUri: [ID]) {
    Experiment(filter: {_id: $experimentUri}) {
        studyEffectOf { _id label }
    }
}"#;

const FACTOR_LEVELS_QUERY: &str = r#"
query factor_levels($factorId: [ID]) {
    FactorLevel(filter: {hasFactor: $factorId}) {
        _id
        label
    }
}"#;

const DEVICE_DATA_QUERY: &str = r#"
query device_data($filter: FilterFindManyDataInput) {
    Data_findMany(filter: $filter) {
        target
        value
        variable
        date
    }
}"#;

const EXPERIMENT_DATA_QUERY: &str = r#"
query experiment_data($experience: [DataSource!]!, $filter: FilterScientificObject) {
    ScientificObject(inferred: true, Experience: $experience, filter: $filter) {
        data {
            target
            variable
            value
            date
        }
    }
}"#;

const OBJECT_DATA_QUERY: &str = r#"
query object_data($experience: [DataSource!]!, $osUris: [ID]) {
    ScientificObject(inferred: true, Experience: $experience, filter: {_id: $osUris}) {
        data {
            target
            variable
            value
            date
        }
    }
}"#;

const FACILITY_VARIABLE_IDS_QUERY: &str = r#"
query facility_variable_ids($filter: FilterFindManyDataInput) {
    Data_findMany(filter: $filter) {
        variable
    }
}"#;

const VARIABLE_DETAILS_QUERY: &str = r#"
query variable_details($filter: FilterVariable) {
    Variable(inferred: true, filter: $filter) {
        _id
        label
        hasEntity { label }
        hasCharacteristic { label }
        hasMethod { label }
        hasUnit { label }
    }
}"#;

const FACILITY_DATA_QUERY: &str = r#"
query facility_data($filter: FilterFindManyDataInput) {
    Data_findMany(filter: $filter) {
        target
        value
        variable
        date
        provenance {
            provWasAssociatedWith { uri }
        }
        prov_agent {
            agents { uri }
        }
    }
}"#;

const OBJECT_LABEL_QUERY: &str = r#"
query object_label($uri: [ID], $experiment: [DataSource!]!) {
    ScientificObject(filter: {_id: $uri}, Experience: $experiment, inferred: true) {
        label
    }
}"#;

const MOVES_QUERY: &str = r#"
query moves($uri: ID!, $dateBeginning: String, $dateEnd: String) {
    historique_positions(uri: $uri, dateBeginning: $dateBeginning, dateEnd: $dateEnd) {
        from { label }
        to { label }
        hasBeginning { inXSDDateTimeStamp }
        hasEnd { inXSDDateTimeStamp }
    }
}"#;

/// Object URIs sent per request by [`Explorer::experiment_data_for_objects`]
pub const OBJECT_CHUNK_SIZE: usize = 40;

/// Criteria for [`Explorer::experiments`]; every field is optional
#[derive(Debug, Clone, Default)]
pub struct ExperimentQuery {
    pub species_uri: Option<String>,
    pub project_uri: Option<String>,
    /// `YYYY-MM-DD`; keeps experiments with `startDate <= date <= endDate`
    pub active_date: Option<String>,
    pub species_name: Option<String>,
    pub project_name: Option<String>,
}

/// Criteria for [`Explorer::scientific_objects`]
#[derive(Debug, Clone, Default)]
pub struct ScientificObjectQuery {
    pub experiment_uri: String,
    pub object_type: Option<String>,
    pub factor_level_uri: Option<String>,
    pub germplasm_uri: Option<String>,
    /// `Factor.Level` pairs, all of which must match
    pub factor_levels: Vec<String>,
    pub germplasm_type: Option<String>,
    pub germplasm_name: Option<String>,
}

impl ScientificObjectQuery {
    pub fn new(experiment_uri: impl Into<String>) -> Self {
        ScientificObjectQuery {
            experiment_uri: experiment_uri.into(),
            ..Default::default()
        }
    }
}

/// Criteria for [`Explorer::experiment_data`]
#[derive(Debug, Clone, Default)]
pub struct ExperimentDataQuery {
    pub experiment_uri: String,
    pub object_type: Option<String>,
    pub factor_level_uri: Option<String>,
    pub germplasm_uri: Option<String>,
}

impl ExperimentDataQuery {
    pub fn new(experiment_uri: impl Into<String>) -> Self {
        ExperimentDataQuery {
            experiment_uri: experiment_uri.into(),
            ..Default::default()
        }
    }
}

/// Criteria for [`Explorer::facility_data`]
#[derive(Debug, Clone, Default)]
pub struct FacilityDataQuery {
    pub facility_uri: String,
    /// Variable names to keep; empty keeps every variable
    pub variables: Vec<String>,
    /// `YYYY-MM-DD`, today when unset
    pub begin: Option<String>,
    /// `YYYY-MM-DD`, today when unset
    pub end: Option<String>,
}

impl FacilityDataQuery {
    pub fn new(facility_uri: impl Into<String>) -> Self {
        FacilityDataQuery {
            facility_uri: facility_uri.into(),
            ..Default::default()
        }
    }
}

/// Position history of one scientific object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMoves {
    pub label: String,
    pub table: Table,
}

pub struct Explorer<T: Transport = HttpTransport> {
    session: SessionContext,
    transport: T,
    page_size: usize,
}

impl Explorer<HttpTransport> {
    /// Log in with `credentials` against the configured platform
    pub fn connect(config: &ExplorerConfig, credentials: &Credentials) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::from_config(config)?;
        let session = login(&transport, credentials, &config.rest_url, &config.graphql_url)?;
        Ok(Explorer::new(session, transport).with_page_size(config.page_size))
    }

    /// Reuse a token issued earlier
    pub fn with_token(config: &ExplorerConfig, token: &str) -> Result<Self> {
        config.validate()?;
        if token.trim().is_empty() {
            return Err(ExplorerError::validation("token is empty"));
        }
        let transport = HttpTransport::from_config(config)?;
        let session = SessionContext::from_token(token.trim(), &config.rest_url, &config.graphql_url);
        Ok(Explorer::new(session, transport).with_page_size(config.page_size))
    }
}

impl<T: Transport> Explorer<T> {
    pub fn new(session: SessionContext, transport: T) -> Self {
        Explorer {
            session,
            transport,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn fetch(&self, resource: &Resource, filters: &FilterSet) -> Result<Vec<Value>> {
        PaginatedFetcher::new(&self.session, &self.transport).fetch_records(resource, filters, self.page_size)
    }

    /// Experiments visible to the session
    pub fn experiments(&self, query: &ExperimentQuery) -> Result<Table> {
        let filters = QueryBuilder::new()
            .equals("hasSpecies", query.species_uri.as_deref())
            .equals("hasProject", query.project_uri.as_deref())
            .active_on("startDate", "endDate", query.active_date.as_deref())
            .contains("hasSpecies", query.species_name.as_deref())
            .contains("hasProject", query.project_name.as_deref())
            .build()?;

        let resource = Resource::graphql("Experiment", EXPERIMENTS_QUERY);
        let records = self.fetch(&resource, &filters)?;

        let melter = RecordMelter::new(
            MeltConfig::default()
                .rename("_id", "URI")
                .rename("label", "Name")
                .select(&["URI", "Name", "startDate", "endDate", "hasSpecies", "hasProject"]),
        );
        let mut table = TabularAssembler::new().assemble(melter.melt_all(records));
        filters.apply(&mut table);

        info!(experiments = table.len(), "listed experiments");
        Ok(table)
    }

    /// Data-source id of an experiment, `EXP_<label>_<YYYY_MM_DD>`
    ///
    /// Dashes in the label become underscores; an experiment without a start
    /// date gets `Unknown_Date`.
    pub fn experiment_source(&self, experiment_uri: &str) -> Result<String> {
        let experiment_uri = required("experiment URI", experiment_uri)?;
        let resource = Resource::graphql("Experiment", EXPERIMENT_SOURCE_QUERY)
            .with_variable("id", json!(experiment_uri));

        let records = self.fetch(&resource, &FilterSet::new())?;
        let experiment = records.first().ok_or_else(|| {
            ExplorerError::request(
                resource.label(),
                None,
                format!("no experiment found for '{}'", experiment_uri),
            )
        })?;

        let label = experiment
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .replace('-', "_");

        let date = match experiment.get("startDate").and_then(Value::as_str) {
            None | Some("") => String::from("Unknown_Date"),
            Some(raw) => parse_date(raw)
                .map(|d| d.format("%Y_%m_%d").to_string())
                .ok_or_else(|| {
                    ExplorerError::schema(resource.label(), format!("unsupported date format: {}", raw))
                })?,
        };

        let source = format!("EXP_{}_{}", label, date);
        debug!(experiment = %experiment_uri, source = %source, "resolved experiment source");
        Ok(source)
    }

    /// Scientific objects of an experiment, one row each, with factor and
    /// germplasm columns
    pub fn scientific_objects(&self, query: &ScientificObjectQuery) -> Result<Table> {
        let experiment_uri = required("experiment URI", &query.experiment_uri)?;
        let filters = QueryBuilder::new()
            .equals("type", query.object_type.as_deref())
            .equals("hasFactorLevel", query.factor_level_uri.as_deref())
            .equals("hasGermplasm", query.germplasm_uri.as_deref())
            .factor_levels(&query.factor_levels)
            .germplasm(query.germplasm_type.as_deref(), query.germplasm_name.as_deref())
            .build()?;

        let experience = self.experiment_source(experiment_uri)?;
        let resource = Resource::graphql("ScientificObject", SCIENTIFIC_OBJECTS_QUERY)
            .with_variable("experience", json!([experience]))
            .paginated(true);

        let records = self.fetch(&resource, &filters)?;
        let label = resource.label();
        let objects = records
            .iter()
            .map(|record| ScientificObject::from_record(record, &label))
            .collect::<Result<Vec<_>>>()?;

        let mut table = HierarchyFlattener::tabulate(&objects);
        filters.apply(&mut table);
        table.prune_empty_columns();

        info!(experiment = %experiment_uri, objects = table.len(), "listed scientific objects");
        Ok(table)
    }

    /// Variables with data in an experiment
    pub fn variables_by_experiment(&self, experiment_uri: &str) -> Result<Table> {
        let experiment_uri = required("experiment URI", experiment_uri)?;
        let resource = Resource::rest("variables", "/core/variables")
            .with_param("withAssociatedData", "true")
            .with_param("experiments", experiment_uri);

        self.rest_table(
            &resource,
            MeltConfig::default()
                .rename("uri", "URI")
                .rename("name", "Name")
                .select(&[
                    "URI",
                    "Name",
                    "entity_name",
                    "characteristic_name",
                    "method_name",
                    "unit_name",
                ]),
        )
    }

    /// Scientific object types used in an experiment
    pub fn object_types_by_experiment(&self, experiment_uri: &str) -> Result<Table> {
        let experiment_uri = required("experiment URI", experiment_uri)?;
        let resource = Resource::rest("object types", "/core/scientific_objects/used_types")
            .with_param("experiment", experiment_uri);

        self.rest_table(
            &resource,
            MeltConfig::default()
                .rename("uri", "URI")
                .rename("name", "Name")
                .select(&["URI", "Name"]),
        )
    }

    /// Devices hosted by a facility
    pub fn devices_by_facility(&self, facility_uri: &str) -> Result<Table> {
        let facility_uri = required("facility URI", facility_uri)?;
        let resource = Resource::rest("devices", "/core/devices").with_param("facility", facility_uri);

        self.rest_table(
            &resource,
            MeltConfig::default()
                .rename("uri", "URI")
                .rename("rdf_type_name", "type")
                .rename("name", "Name")
                .select(&["URI", "type", "Name"]),
        )
    }

    fn rest_table(&self, resource: &Resource, config: MeltConfig) -> Result<Table> {
        let records = self.fetch(resource, &FilterSet::new())?;
        let melter = RecordMelter::new(config);
        let table = TabularAssembler::new().assemble(melter.melt_all(records));
        info!(resource = %resource.label(), rows = table.len(), "tabulated");
        Ok(table)
    }

    /// Facilities used by an experiment, with their geometry rendered as
    /// `Type(c1, c2, ...)`
    pub fn facilities_by_experiment(&self, experiment_uri: &str) -> Result<Table> {
        let experiment_uri = required("experiment URI", experiment_uri)?;
        let resource = Resource::graphql("Experiment", FACILITIES_QUERY)
            .with_variable("experienceUri", json!(experiment_uri))
            .with_array_path(&["data", "Experiment", "usesFacility"]);

        let records = self.fetch(&resource, &FilterSet::new())?;
        let rows = records.iter().map(facility_row).collect();

        let mut table = TabularAssembler::new().assemble(rows);
        table.prune_empty_columns();
        Ok(table)
    }

    /// Every factor of an experiment with each of its levels
    pub fn factor_levels_by_experiment(&self, experiment_uri: &str) -> Result<Table> {
        let experiment_uri = required("experiment URI", experiment_uri)?;
        let factors_resource = Resource::graphql("Experiment", FACTORS_QUERY)
            .with_variable("experimentUri", json!(experiment_uri))
            .with_array_path(&["data", "Experiment", "studyEffectOf"]);

        let factors = self.fetch(&factors_resource, &FilterSet::new())?;

        let mut rows = Vec::new();
        for factor in &factors {
            let factor_uri = factor.get("_id").and_then(Value::as_str).ok_or_else(|| {
                ExplorerError::schema(factors_resource.label(), "factor has no _id")
            })?;
            let factor_label = factor
                .get("label")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();

            let levels_resource = Resource::graphql("FactorLevel", FACTOR_LEVELS_QUERY)
                .with_variable("factorId", json!(factor_uri));
            for level in self.fetch(&levels_resource, &FilterSet::new())? {
                let mut row = FlatRow::new();
                row.insert("Factor".to_string(), json!(factor_label));
                row.insert("Factor URI".to_string(), json!(factor_uri));
                row.insert("Factor level".to_string(), level.get("label").cloned().unwrap_or(Value::Null));
                row.insert("Factor level URI".to_string(), level.get("_id").cloned().unwrap_or(Value::Null));
                rows.push(row);
            }
        }

        let table = TabularAssembler::new().assemble(rows);
        info!(experiment = %experiment_uri, factors = factors.len(), levels = table.len(), "listed factor levels");
        Ok(table)
    }

    /// Measurements recorded by a device, optionally within a date range
    pub fn device_data(&self, device_uri: &str, begin: Option<&str>, end: Option<&str>) -> Result<Table> {
        let device_uri = required("device URI", device_uri)?;
        let filters = QueryBuilder::new()
            .equals("provenance.provWasAssociatedWith.uri", Some(device_uri))
            .date_range("date", begin, end)
            .build()?;

        let resource = Resource::graphql("Data_findMany", DEVICE_DATA_QUERY);
        let records = self.fetch(&resource, &filters)?;

        let melter = RecordMelter::new(
            MeltConfig::default()
                .rename("target", "Target")
                .rename("value", "Value")
                .rename("variable", "Variable")
                .rename("date", "Date")
                .select(&["Target", "Value", "Variable", "Date"]),
        );
        let rows = records
            .into_iter()
            .map(|record| {
                let mut row = FlatRow::new();
                row.insert("URI".to_string(), json!(device_uri));
                row.extend(melter.melt(record));
                row
            })
            .collect();

        Ok(TabularAssembler::new().assemble(rows))
    }

    /// Measurements of an experiment's scientific objects, one table per
    /// variable with columns `URI, <variable name>, Date`
    ///
    /// Only variables the experiment declares data for are kept.
    pub fn experiment_data(&self, query: &ExperimentDataQuery) -> Result<Vec<VariableSeries>> {
        let experiment_uri = required("experiment URI", &query.experiment_uri)?;
        let filters = QueryBuilder::new()
            .equals("type", query.object_type.as_deref())
            .equals("hasFactorLevel", query.factor_level_uri.as_deref())
            .equals("hasGermplasm", query.germplasm_uri.as_deref())
            .build()?;

        let splitter = SeriesSplitter::from_table(&self.variables_by_experiment(experiment_uri)?);
        let experience = self.experiment_source(experiment_uri)?;

        let resource = Resource::graphql("ScientificObject", EXPERIMENT_DATA_QUERY)
            .with_variable("experience", json!([experience]));
        let measurements = object_measurements(&resource, self.fetch(&resource, &filters)?)?;

        let series = splitter.split(&resource.label(), &measurements, measurement_row, measurement_columns)?;
        info!(
            experiment = %experiment_uri,
            measurements = measurements.len(),
            variables = series.len(),
            "split experiment data"
        );
        Ok(series)
    }

    /// Measurements of the given scientific objects, requested
    /// [`OBJECT_CHUNK_SIZE`] objects at a time
    ///
    /// Chunks run one after the other and the first failing chunk aborts the
    /// whole call.
    pub fn experiment_data_for_objects<S: AsRef<str>>(
        &self,
        experiment_uri: &str,
        object_uris: &[S],
    ) -> Result<Vec<VariableSeries>> {
        let experiment_uri = required("experiment URI", experiment_uri)?;
        let object_uris: Vec<&str> = object_uris
            .iter()
            .map(|uri| uri.as_ref().trim())
            .filter(|uri| !uri.is_empty())
            .collect();
        if object_uris.is_empty() {
            return Ok(Vec::new());
        }

        let splitter = SeriesSplitter::from_table(&self.variables_by_experiment(experiment_uri)?);
        let experience = self.experiment_source(experiment_uri)?;

        let mut measurements = Vec::new();
        for (index, chunk) in object_uris.chunks(OBJECT_CHUNK_SIZE).enumerate() {
            let resource = Resource::graphql("ScientificObject", OBJECT_DATA_QUERY)
                .with_variable("experience", json!([experience]))
                .with_variable("osUris", json!(chunk));
            let records = self.fetch(&resource, &FilterSet::new())?;
            measurements.extend(object_measurements(&resource, records)?);
            debug!(chunk = index, objects = chunk.len(), "fetched object data chunk");
        }

        splitter.split("graphql:ScientificObject", &measurements, measurement_row, measurement_columns)
    }

    /// Variables measured at a facility within a date range, with columns
    /// `URI, Name, Entity, Characteristic, Method, Unit`
    ///
    /// Takes two requests: the distinct variables of the facility's data,
    /// then their details. No data means an empty table and no second request.
    pub fn facility_variables(&self, facility_uri: &str, begin: Option<&str>, end: Option<&str>) -> Result<Table> {
        let facility_uri = required("facility URI", facility_uri)?;
        let filters = QueryBuilder::new()
            .equals("target", Some(facility_uri))
            .date_range("date", begin, end)
            .build()?;

        let ids_resource = Resource::graphql("Data_findMany", FACILITY_VARIABLE_IDS_QUERY);
        let mut variable_ids: Vec<String> = Vec::new();
        for record in self.fetch(&ids_resource, &filters)? {
            if let Some(id) = record.get("variable").and_then(Value::as_str) {
                if !variable_ids.iter().any(|known| known == id) {
                    variable_ids.push(id.to_string());
                }
            }
        }
        if variable_ids.is_empty() {
            debug!(facility = %facility_uri, "no data for facility");
            return Ok(Table::default());
        }

        let details_filter = QueryBuilder::new().equals_any("_id", &variable_ids).build()?;
        let details = self.fetch(&Resource::graphql("Variable", VARIABLE_DETAILS_QUERY), &details_filter)?;

        let melter = RecordMelter::new(
            MeltConfig::default()
                .rename("_id", "URI")
                .rename("label", "Name")
                .rename("hasEntity_label", "Entity")
                .rename("hasEntity", "Entity")
                .rename("hasCharacteristic_label", "Characteristic")
                .rename("hasCharacteristic", "Characteristic")
                .rename("hasMethod_label", "Method")
                .rename("hasMethod", "Method")
                .rename("hasUnit_label", "Unit")
                .rename("hasUnit", "Unit")
                .select(&["URI", "Name", "Entity", "Characteristic", "Method", "Unit"]),
        );
        let table = TabularAssembler::new().assemble(melter.melt_all(details));
        info!(facility = %facility_uri, variables = table.len(), "listed facility variables");
        Ok(table)
    }

    /// Environmental data of a facility, one table per variable with columns
    /// `<variable name>, Date, Device`
    ///
    /// Both dates default to today. `Device` lists the URIs of the agents
    /// that produced the value, falling back to the provenance's associated
    /// devices.
    pub fn facility_data(&self, query: &FacilityDataQuery) -> Result<Vec<VariableSeries>> {
        let facility_uri = required("facility URI", &query.facility_uri)?;
        let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();
        let begin = non_blank(query.begin.as_deref()).unwrap_or(today.as_str());
        let end = non_blank(query.end.as_deref()).unwrap_or(today.as_str());

        let filters = QueryBuilder::new()
            .equals("target", Some(facility_uri))
            .date_range("date", Some(begin), Some(end))
            .build()?;

        let mut variables = self.facility_variables(facility_uri, Some(begin), Some(end))?;
        if !query.variables.is_empty() {
            variables.retain(|row| {
                row.get("Name")
                    .and_then(Value::as_str)
                    .map_or(false, |name| query.variables.iter().any(|wanted| wanted == name))
            });
        }
        let splitter = SeriesSplitter::from_table(&variables);
        if splitter.is_empty() {
            debug!(facility = %facility_uri, "no matching facility variables");
            return Ok(Vec::new());
        }

        let resource = Resource::graphql("Data_findMany", FACILITY_DATA_QUERY);
        let measurements = self.fetch(&resource, &filters)?;

        let series = splitter.split(&resource.label(), &measurements, environment_row, |name| {
            vec![name.to_string(), "Date".to_string(), "Device".to_string()]
        })?;
        info!(facility = %facility_uri, variables = series.len(), "split facility data");
        Ok(series)
    }

    /// Positions a scientific object moved through, with columns
    /// `From, To, HasBeginning, HasEnd`
    ///
    /// The object must exist in the experiment; an unknown object is a
    /// request error.
    pub fn object_moves(
        &self,
        object_uri: &str,
        experiment_uri: &str,
        begin: Option<&str>,
        end: Option<&str>,
    ) -> Result<ObjectMoves> {
        let object_uri = required("scientific object URI", object_uri)?;
        let experiment_uri = required("experiment URI", experiment_uri)?;
        let begin = non_blank(begin);
        let end = non_blank(end);
        for (what, raw) in [("begin", begin), ("end", end)] {
            if let Some(raw) = raw {
                if parse_date(raw).is_none() {
                    return Err(ExplorerError::validation(format!("{} date '{}' is not a valid date", what, raw)));
                }
            }
        }

        let experience = self.experiment_source(experiment_uri)?;
        let label_resource = Resource::graphql("ScientificObject", OBJECT_LABEL_QUERY)
            .with_variable("uri", json!(object_uri))
            .with_variable("experiment", json!([experience]));
        let objects = self.fetch(&label_resource, &FilterSet::new())?;
        let label = objects
            .first()
            .ok_or_else(|| {
                ExplorerError::request(
                    label_resource.label(),
                    None,
                    format!("no scientific object found for '{}'", object_uri),
                )
            })?
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("unknown_object")
            .to_string();

        let moves_resource = Resource::graphql("historique_positions", MOVES_QUERY)
            .with_variable("uri", json!(object_uri))
            .with_variable("dateBeginning", json!(begin))
            .with_variable("dateEnd", json!(end));
        let moves = self.fetch(&moves_resource, &FilterSet::new())?;

        let melter = RecordMelter::new(
            MeltConfig::default()
                .rename("from_label", "From")
                .rename("to_label", "To")
                .rename("hasBeginning_inXSDDateTimeStamp", "HasBeginning")
                .rename("hasEnd_inXSDDateTimeStamp", "HasEnd")
                .select(&["From", "To", "HasBeginning", "HasEnd"]),
        );
        let table = TabularAssembler::new().assemble(melter.melt_all(moves));
        info!(object = %object_uri, label = %label, moves = table.len(), "listed moves");
        Ok(ObjectMoves { label, table })
    }
}

fn required<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(ExplorerError::validation(format!("{} is required", what)))
    } else {
        Ok(value)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Concatenate the `data` lists of scientific objects; an object without data
/// contributes nothing
fn object_measurements(resource: &Resource, objects: Vec<Value>) -> Result<Vec<Value>> {
    let mut measurements = Vec::new();
    for mut object in objects {
        match object.get_mut("data").map(Value::take) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => measurements.extend(items),
            Some(_) => {
                return Err(ExplorerError::schema(
                    resource.label(),
                    "scientific object 'data' is not an array",
                ))
            }
        }
    }
    Ok(measurements)
}

fn measurement_row(measurement: &Value, name: &str) -> FlatRow {
    let mut row = FlatRow::new();
    row.insert("URI".to_string(), measurement.get("target").cloned().unwrap_or(Value::Null));
    row.insert(name.to_string(), measurement.get("value").cloned().unwrap_or(Value::Null));
    row.insert("Date".to_string(), measurement.get("date").cloned().unwrap_or(Value::Null));
    row
}

fn measurement_columns(name: &str) -> Vec<String> {
    vec!["URI".to_string(), name.to_string(), "Date".to_string()]
}

fn environment_row(measurement: &Value, name: &str) -> FlatRow {
    let mut row = FlatRow::new();
    row.insert(name.to_string(), measurement.get("value").cloned().unwrap_or(Value::Null));
    row.insert("Date".to_string(), measurement.get("date").cloned().unwrap_or(Value::Null));

    let mut devices = agent_uris(measurement.pointer("/prov_agent/agents"));
    if devices.is_empty() {
        devices = agent_uris(measurement.pointer("/provenance/provWasAssociatedWith"));
    }
    if !devices.is_empty() {
        row.insert("Device".to_string(), Value::String(devices.join(", ")));
    }
    row
}

fn agent_uris(agents: Option<&Value>) -> Vec<&str> {
    match agents {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|agent| agent.get("uri").and_then(Value::as_str))
            .collect(),
        _ => Vec::new(),
    }
}

fn facility_row(facility: &Value) -> FlatRow {
    let mut row = FlatRow::new();
    row.insert("URI".to_string(), facility.get("_id").cloned().unwrap_or(Value::Null));
    row.insert("Name".to_string(), facility.get("label").cloned().unwrap_or(Value::Null));

    let facility_type = match facility.get("_type") {
        Some(Value::Array(types)) => types.first().cloned(),
        Some(Value::String(t)) => Some(Value::String(t.clone())),
        _ => None,
    };
    row.insert("Type".to_string(), facility_type.unwrap_or(Value::Null));

    // Several geometries: the last one wins
    if let Some(Value::Array(geometries)) = facility.get("geometry") {
        for geo in geometries {
            if let Some(rendered) = geo.get("geometry").and_then(render_geometry) {
                row.insert("geometry".to_string(), Value::String(rendered));
            }
        }
    }
    row
}

fn render_geometry(geometry: &Value) -> Option<String> {
    let geo_type = geometry.get("type")?.as_str()?;
    let coordinates: Vec<String> = match geometry.get("coordinates") {
        Some(Value::Array(items)) => items.iter().map(Value::to_string).collect(),
        Some(other) => vec![other.to_string()],
        None => Vec::new(),
    };
    Some(format!("{}({})", geo_type, coordinates.join(", ")))
}
