//! Error taxonomy shared by every pipeline stage.
//!
//! Nothing here is retried: the first error returned by a stage aborts it.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("table `{0}` does not exist")]
    MissingTable(String),

    #[error("table `{table}` has no column `{column}`")]
    MissingColumn { table: String, column: String },

    #[error("cannot select a value column in `{table}`: {reason}")]
    ColumnSelection { table: String, reason: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("model fit failed for {series}: {reason}")]
    ModelFit { series: String, reason: String },

    #[error("no series could be built from table `{0}`")]
    NoSeries(String),

    #[error("KPIs `{first}` and `{second}` would both write `{table}`")]
    SharedOutput {
        first: String,
        second: String,
        table: String,
    },

    #[error("display names `{first}` and `{second}` both map to `{token}`")]
    NameCollision {
        first: String,
        second: String,
        token: String,
    },

    #[error("invalid KPI catalog: {0}")]
    Catalog(String),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
