//! Reshaping records into flat tables
//!
//! Scientific objects go through the two-pass hierarchy flattener
//! ([`plan::FlattenPlan`] then [`planned_extractor::HierarchyFlattener`]).
//! Other records are melted one by one with [`extractor::RecordMelter`].
//! Either way the rows end in a [`table::Table`] via
//! [`table::TabularAssembler`]. Measurement lists are split into one table
//! per variable by [`series::SeriesSplitter`].

pub mod extractor;
pub mod plan;
pub mod planned_extractor;
pub mod series;
pub mod table;
pub mod writer;

pub use crate::types::MeltConfig;
pub use extractor::RecordMelter;
pub use plan::FlattenPlan;
pub use planned_extractor::HierarchyFlattener;
pub use series::{SeriesSplitter, VariableSeries};
pub use table::{Table, TabularAssembler};
pub use writer::{default_csv_path, write_csv_file, CsvTableWriter, JsonLinesWriter};
