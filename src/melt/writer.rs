use crate::melt::table::Table;
use anyhow::{Context, Result};
use csv::Writer;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

static UNSAFE_FILENAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_-]+").unwrap());

/// Writes a table as CSV: the column list as header, then rows in table order
///
/// Absent cells are written as empty fields.
pub struct CsvTableWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> CsvTableWriter<W> {
    pub fn new(writer: W) -> Self {
        CsvTableWriter {
            writer: Writer::from_writer(writer),
        }
    }

    pub fn write_table(&mut self, table: &Table) -> Result<()> {
        self.writer
            .write_record(table.columns())
            .context("Failed to write CSV header")?;

        for row in table.rows() {
            let record: Vec<String> = table
                .columns()
                .iter()
                .map(|column| cell_text(row.get(column)))
                .collect();
            self.writer
                .write_record(&record)
                .context("Failed to write CSV row")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush CSV writer")
    }
}

/// Writes one JSON object per row; absent cells are simply missing
pub struct JsonLinesWriter<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesWriter { writer }
    }

    pub fn write_table(&mut self, table: &Table) -> Result<()> {
        for row in table.rows() {
            let json = serde_json::to_string(row).context("Failed to serialize row")?;
            writeln!(self.writer, "{}", json).context("Failed to write row")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}

/// Write `table` as CSV at `path`, creating missing parent directories
pub fn write_csv_file<P: AsRef<Path>>(table: &Table, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = CsvTableWriter::new(file);
    writer.write_table(table)?;
    writer.flush()
}

/// `{output_dir}/{stem}.csv` with the stem reduced to file-name-safe characters
pub fn default_csv_path<P: AsRef<Path>>(output_dir: P, stem: &str) -> PathBuf {
    let safe = UNSAFE_FILENAME_CHARS.replace_all(stem.trim(), "_");
    let safe = safe.trim_matches('_');
    let name = if safe.is_empty() { "export" } else { safe };
    output_dir.as_ref().join(format!("{}.csv", name))
}

fn cell_text(cell: Option<&Value>) -> String {
    match cell {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::table::TabularAssembler;
    use crate::types::FlatRow;
    use serde_json::json;

    fn table() -> Table {
        let rows: Vec<FlatRow> = vec![
            serde_json::from_value(json!({"URI": "so1", "Name": "plant, 1", "Irrigation": "WW"})).unwrap(),
            serde_json::from_value(json!({"URI": "so2", "Name": "plant 2", "height": 1.5})).unwrap(),
        ];
        TabularAssembler::new().assemble(rows)
    }

    #[test]
    fn test_csv_writer() {
        let mut buffer = Vec::new();
        {
            let mut writer = CsvTableWriter::new(&mut buffer);
            writer.write_table(&table()).unwrap();
            writer.flush().unwrap();
        }

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "URI,Name,Irrigation,height");
        assert_eq!(lines[1], "so1,\"plant, 1\",WW,");
        assert_eq!(lines[2], "so2,plant 2,,1.5");
    }

    #[test]
    fn test_json_lines_writer_omits_absent_cells() {
        let mut buffer = Vec::new();
        let mut writer = JsonLinesWriter::new(&mut buffer);
        writer.write_table(&table()).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let first: Value = serde_json::from_str(output.lines().next().unwrap()).unwrap();
        assert_eq!(first, json!({"URI": "so1", "Name": "plant, 1", "Irrigation": "WW"}));
        assert_eq!(output.lines().count(), 2);
    }

    #[test]
    fn test_json_lines_follow_pruned_columns() {
        let mut table = table();
        table.retain(|row| row["URI"] == "so2");
        table.prune_empty_columns();

        let mut buffer = Vec::new();
        let mut writer = JsonLinesWriter::new(&mut buffer);
        writer.write_table(&table).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let line: Value = serde_json::from_str(output.trim()).unwrap();
        let keys: Vec<&String> = line.as_object().unwrap().keys().collect();
        assert_eq!(keys, table.columns().iter().collect::<Vec<_>>());
        assert_eq!(table.columns(), &["URI", "Name", "height"]);
    }

    #[test]
    fn test_write_csv_file_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("objects.csv");

        write_csv_file(&table(), &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("URI,Name,Irrigation,height"));
    }

    #[test]
    fn test_default_csv_path() {
        assert_eq!(
            default_csv_path("temp_files", "ZA17 plants/2017"),
            PathBuf::from("temp_files/ZA17_plants_2017.csv")
        );
        assert_eq!(default_csv_path("out", "///"), PathBuf::from("out/export.csv"));
    }
}
