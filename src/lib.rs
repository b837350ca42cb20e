//! # silex-explorer - tabular exports from an OpenSILEX research-data platform
//!
//! Fetches experiments, scientific objects, variables, devices, facilities
//! and their measurements over the platform's REST and GraphQL APIs, then
//! reshapes the nested records into flat tables.
//!
//! ## Modules
//!
//! - **fetch**: filter composition, pagination, transports, response normalization
//! - **melt**: hierarchy flattening, generic record melting, table assembly, writers
//! - **explorer**: one call per platform question, returning a [`Table`]
//!
//! ## Quick Start
//!
//! ```rust
//! use silex_explorer::{Explorer, ScientificObjectQuery, ScriptedTransport, SessionContext};
//! use serde_json::json;
//!
//! # fn main() -> silex_explorer::Result<()> {
//! let transport = ScriptedTransport::new()
//!     .respond_json(200, json!({"data": {"Experiment": [
//!         {"label": "ZA17", "startDate": "2017-04-01"}
//!     ]}}))
//!     .respond_json(200, json!({"data": {"ScientificObject": [{
//!         "_id": "so:1",
//!         "label": "plant 1",
//!         "hasGermplasm": [{"label": "B73", "_type": ["vocabulary:Accession"],
//!                           "fromSpecies": [{"label": "Maize"}]}]
//!     }]}}));
//!
//! let session = SessionContext::from_token("token", "http://host/rest", "http://host/graphql");
//! let explorer = Explorer::new(session, transport);
//!
//! let table = explorer.scientific_objects(&ScientificObjectQuery::new("exp:za17"))?;
//! assert_eq!(table.columns(), &["URI", "Name", "germplasm_type_1", "germplasm_name_1", "Species_1"]);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod explorer;
pub mod fetch;
pub mod melt;
pub mod types;

// Re-export commonly used types for convenience
pub use auth::{login, Credentials};
pub use config::ExplorerConfig;
pub use error::{ErrorKind, ExplorerError, Result};
pub use explorer::{
    ExperimentDataQuery, ExperimentQuery, Explorer, FacilityDataQuery, ObjectMoves, ScientificObjectQuery,
};
pub use fetch::{FilterSet, HttpTransport, PaginatedFetcher, QueryBuilder, Resource, ScriptedTransport, Transport};
pub use melt::{HierarchyFlattener, RecordMelter, SeriesSplitter, Table, TabularAssembler, VariableSeries};
pub use types::{FactorLevelRef, FlatRow, GermplasmLevel, GermplasmRef, MeltConfig, ScientificObject, SessionContext};
