//! Fermentation KPI forecasting pipeline.
//!
//! CSV files are loaded into a SQLite store, each configured KPI table is
//! forecast into a companion table, and one static HTML page per KPI is
//! rendered for the viewer.

pub mod catalog;
pub mod config;
pub mod error;
pub mod forecast;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod naming;
pub mod pipeline;
pub mod render;
pub mod series;
pub mod store;
pub mod table;
pub mod viewer;

pub use error::{PipelineError, Result};
