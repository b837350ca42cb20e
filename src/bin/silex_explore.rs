//! silex-explore: query an OpenSILEX platform and export flat tables
//!
//! Usage:
//!   # Experiments active on a date, CSV on stdout
//!   silex-explore experiments --active-date 2017-06-01
//!
//!   # Scientific objects of an experiment, filtered, written to a file
//!   silex-explore -o out/plants.csv objects http://host/id/experiment/za17 \
//!       --type vocabulary:Plant --factor-level Irrigation.WW
//!
//!   # Device measurements as JSON Lines into the output directory
//!   silex-explore --jsonl --save device-data http://host/id/device/aria --begin 2023-01-01
//!
//!   # Experiment measurements, one CSV per variable under out/
//!   silex-explore -o out experiment-data http://host/id/experiment/za17 --type vocabulary:Plant
//!
//! Endpoints and credentials come from flags or `SILEX_*` variables
//! (a `.env` file is read too).

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use silex_explorer::melt::{default_csv_path, write_csv_file, CsvTableWriter, JsonLinesWriter};
use silex_explorer::{
    Credentials, ExperimentDataQuery, ExperimentQuery, Explorer, ExplorerConfig, FacilityDataQuery,
    ScientificObjectQuery, Table, VariableSeries,
};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "silex-explore")]
#[command(about = "Export OpenSILEX experiment data as flat tables", long_about = None)]
struct Args {
    /// REST API base URL (overrides SILEX_REST_URL)
    #[arg(long, global = true)]
    rest_url: Option<String>,

    /// GraphQL endpoint URL (overrides SILEX_GRAPHQL_URL)
    #[arg(long, global = true)]
    graphql_url: Option<String>,

    /// Bearer token from an earlier login
    #[arg(long, env = "SILEX_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Login identifier, used when no token is given
    #[arg(long, env = "SILEX_USER", global = true)]
    user: Option<String>,

    #[arg(long, env = "SILEX_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Records per page (overrides SILEX_PAGE_SIZE)
    #[arg(long, global = true)]
    page_size: Option<usize>,

    /// Write the table to this file instead of stdout (a directory for
    /// per-variable exports)
    #[arg(long, short = 'o', global = true)]
    output: Option<PathBuf>,

    /// Write the table into the configured output directory
    #[arg(long, global = true, conflicts_with = "output")]
    save: bool,

    /// Emit JSON Lines instead of CSV
    #[arg(long, global = true)]
    jsonl: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List experiments
    Experiments {
        #[arg(long)]
        species_uri: Option<String>,
        #[arg(long)]
        project_uri: Option<String>,
        /// Keep experiments running on this date (YYYY-MM-DD)
        #[arg(long)]
        active_date: Option<String>,
        /// Case-insensitive substring of a species label
        #[arg(long)]
        species_name: Option<String>,
        /// Case-insensitive substring of a project label
        #[arg(long)]
        project_name: Option<String>,
    },
    /// Print the data-source id of an experiment
    Source { experiment: String },
    /// Scientific objects of an experiment with factor and germplasm columns
    Objects {
        experiment: String,
        #[arg(long = "type")]
        object_type: Option<String>,
        #[arg(long)]
        factor_level_uri: Option<String>,
        #[arg(long)]
        germplasm_uri: Option<String>,
        /// `Factor.Level`, repeatable
        #[arg(long = "factor-level")]
        factor_levels: Vec<String>,
        /// species, variety, accession or seedlot
        #[arg(long)]
        germplasm_type: Option<String>,
        #[arg(long, requires = "germplasm_type")]
        germplasm_name: Option<String>,
    },
    /// Variables with data in an experiment
    Variables { experiment: String },
    /// Scientific object types used in an experiment
    ObjectTypes { experiment: String },
    /// Devices of a facility
    Devices { facility: String },
    /// Facilities used by an experiment
    Facilities { experiment: String },
    /// Factors and factor levels of an experiment
    FactorLevels { experiment: String },
    /// Measurements recorded by a device
    DeviceData {
        device: String,
        #[arg(long)]
        begin: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Measurements of an experiment's objects, one file per variable
    ExperimentData {
        experiment: String,
        #[arg(long = "type")]
        object_type: Option<String>,
        #[arg(long)]
        factor_level_uri: Option<String>,
        #[arg(long)]
        germplasm_uri: Option<String>,
    },
    /// Measurements of listed scientific objects, one file per variable
    ObjectData {
        experiment: String,
        #[arg(required = true)]
        objects: Vec<String>,
    },
    /// Variables measured at a facility
    FacilityVariables {
        facility: String,
        #[arg(long)]
        begin: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Environmental data of a facility, one file per variable
    FacilityData {
        facility: String,
        /// Variable name to keep, repeatable
        #[arg(long = "variable")]
        variables: Vec<String>,
        #[arg(long)]
        begin: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Position history of a scientific object
    Moves {
        object: String,
        experiment: String,
        #[arg(long)]
        begin: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
}

impl Command {
    fn export_stem(&self) -> &'static str {
        match self {
            Command::Experiments { .. } => "experiments",
            Command::Source { .. } => "source",
            Command::Objects { .. } => "scientific_objects",
            Command::Variables { .. } => "variables",
            Command::ObjectTypes { .. } => "object_types",
            Command::Devices { .. } => "devices",
            Command::Facilities { .. } => "facilities",
            Command::FactorLevels { .. } => "factor_levels",
            Command::DeviceData { .. } => "device_data",
            Command::ExperimentData { .. } => "experiment_data",
            Command::ObjectData { .. } => "object_data",
            Command::FacilityVariables { .. } => "facility_variables",
            Command::FacilityData { .. } => "facility_data",
            Command::Moves { .. } => "moves",
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = ExplorerConfig::from_env().context("Failed to read configuration")?;
    if let Some(url) = args.rest_url.clone() {
        config.rest_url = url;
    }
    if let Some(url) = args.graphql_url.clone() {
        config.graphql_url = url;
    }
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }

    let explorer = connect(&config, &args)?;
    let mut stem = args.command.export_stem().to_string();

    let table = match args.command {
        Command::Source { experiment } => {
            println!("{}", explorer.experiment_source(&experiment)?);
            return Ok(());
        }
        Command::ExperimentData {
            experiment,
            object_type,
            factor_level_uri,
            germplasm_uri,
        } => {
            let series = explorer.experiment_data(&ExperimentDataQuery {
                experiment_uri: experiment,
                object_type,
                factor_level_uri,
                germplasm_uri,
            })?;
            return write_series(&series, args.output.as_deref().unwrap_or(config.output_dir.as_path()), args.jsonl);
        }
        Command::ObjectData { experiment, objects } => {
            let series = explorer.experiment_data_for_objects(&experiment, &objects)?;
            return write_series(&series, args.output.as_deref().unwrap_or(config.output_dir.as_path()), args.jsonl);
        }
        Command::FacilityData {
            facility,
            variables,
            begin,
            end,
        } => {
            let series = explorer.facility_data(&FacilityDataQuery {
                facility_uri: facility,
                variables,
                begin,
                end,
            })?;
            return write_series(&series, args.output.as_deref().unwrap_or(config.output_dir.as_path()), args.jsonl);
        }
        Command::Experiments {
            species_uri,
            project_uri,
            active_date,
            species_name,
            project_name,
        } => explorer.experiments(&ExperimentQuery {
            species_uri,
            project_uri,
            active_date,
            species_name,
            project_name,
        })?,
        Command::Objects {
            experiment,
            object_type,
            factor_level_uri,
            germplasm_uri,
            factor_levels,
            germplasm_type,
            germplasm_name,
        } => explorer.scientific_objects(&ScientificObjectQuery {
            experiment_uri: experiment,
            object_type,
            factor_level_uri,
            germplasm_uri,
            factor_levels,
            germplasm_type,
            germplasm_name,
        })?,
        Command::Variables { experiment } => explorer.variables_by_experiment(&experiment)?,
        Command::ObjectTypes { experiment } => explorer.object_types_by_experiment(&experiment)?,
        Command::Devices { facility } => explorer.devices_by_facility(&facility)?,
        Command::Facilities { experiment } => explorer.facilities_by_experiment(&experiment)?,
        Command::FactorLevels { experiment } => explorer.factor_levels_by_experiment(&experiment)?,
        Command::DeviceData { device, begin, end } => {
            explorer.device_data(&device, begin.as_deref(), end.as_deref())?
        }
        Command::FacilityVariables { facility, begin, end } => {
            explorer.facility_variables(&facility, begin.as_deref(), end.as_deref())?
        }
        Command::Moves {
            object,
            experiment,
            begin,
            end,
        } => {
            let moves = explorer.object_moves(&object, &experiment, begin.as_deref(), end.as_deref())?;
            stem = format!("moves_{}", moves.label);
            moves.table
        }
    };

    let target = match (&args.output, args.save) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => Some(export_path(&config.output_dir, &stem, args.jsonl)),
        (None, false) => None,
    };

    match target {
        Some(path) => {
            write_table_file(&table, &path, args.jsonl)?;
            info!(rows = table.len(), path = %path.display(), "table saved");
        }
        None => write_table(&table, std::io::stdout().lock(), args.jsonl)?,
    }

    Ok(())
}

fn export_path(dir: &Path, stem: &str, jsonl: bool) -> PathBuf {
    let path = default_csv_path(dir, stem);
    if jsonl {
        path.with_extension("jsonl")
    } else {
        path
    }
}

/// One file per variable, `<name>_data.csv` (or `.jsonl`) under `dir`
fn write_series(series: &[VariableSeries], dir: &Path, jsonl: bool) -> Result<()> {
    if series.is_empty() {
        info!("no measurements to export");
        return Ok(());
    }
    for entry in series {
        let path = export_path(dir, &format!("{}_data", entry.name), jsonl);
        write_table_file(&entry.table, &path, jsonl)?;
        info!(variable = %entry.variable, rows = entry.table.len(), path = %path.display(), "series saved");
    }
    Ok(())
}

fn connect(config: &ExplorerConfig, args: &Args) -> Result<Explorer> {
    if let Some(token) = args.token.as_deref().filter(|t| !t.trim().is_empty()) {
        return Explorer::with_token(config, token).context("Failed to set up session");
    }

    match (&args.user, &args.password) {
        (Some(user), Some(password)) => {
            let credentials = Credentials::new(user.as_str(), password.as_str());
            Explorer::connect(config, &credentials).context("Login failed")
        }
        _ => bail!("no credentials: pass --token, or --user and --password (or SILEX_TOKEN / SILEX_USER / SILEX_PASSWORD)"),
    }
}

fn write_table_file(table: &Table, path: &Path, jsonl: bool) -> Result<()> {
    if !jsonl {
        return write_csv_file(table, path);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create file: {}", path.display()))?;
    write_table(table, file, true)
}

fn write_table<W: Write>(table: &Table, out: W, jsonl: bool) -> Result<()> {
    if jsonl {
        let mut writer = JsonLinesWriter::new(out);
        writer.write_table(table)?;
        writer.flush()
    } else {
        let mut writer = CsvTableWriter::new(out);
        writer.write_table(table)?;
        writer.flush()
    }
}
