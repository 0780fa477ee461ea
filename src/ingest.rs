//! CSV directory ingestion: one table per file, named after the file stem.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::logging::log_table_loaded;
use crate::store::TableStore;
use crate::table::Table;

pub const TABULAR_EXTENSIONS: [&str; 1] = ["csv"];

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub table: String,
    pub path: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
    pub sha256: String,
}

pub fn is_tabular(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TABULAR_EXTENSIONS.iter().any(|t| e.eq_ignore_ascii_case(t)))
        .unwrap_or(false)
}

/// Tabular files in `dir`, sorted by file name.
pub fn list_tabular_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        if path.is_file() && is_tabular(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn table_name_for(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

/// Parse a CSV file into a table. Ragged rows are an error.
pub fn read_csv_table(path: &Path, name: &str) -> Result<Table> {
    let csv_err = |source| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));
    let columns: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut raw = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        raw.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table::from_text_rows(name, columns, raw))
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| PipelineError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Load every tabular file in `dir`, replacing same-named tables.
/// The first unreadable or malformed file aborts the run.
pub fn ingest_dir(store: &mut TableStore, dir: &Path) -> Result<Vec<IngestReport>> {
    let mut reports = Vec::new();
    for path in list_tabular_files(dir)? {
        let Some(name) = table_name_for(&path) else {
            continue;
        };
        let table = read_csv_table(&path, &name)?;
        store.replace_table(&table)?;
        let sha256 = file_sha256(&path)?;
        log_table_loaded(&name, &path, table.len(), table.columns.len(), &sha256);
        reports.push(IngestReport {
            table: name,
            path,
            rows: table.len(),
            columns: table.columns,
            sha256,
        });
    }
    Ok(reports)
}
