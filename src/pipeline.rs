//! Stage runners: ingestion → forecasting → rendering, each usable alone.

use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::forecast::{run_aggregate, run_time_series, ForecastReport, ForecastSettings};
use crate::ingest::{ingest_dir, IngestReport};
use crate::logging::{log_stage, v_str, ProfileScope};
use crate::render::{render_all, PageReport};
use crate::series::floor_hour;
use crate::store::TableStore;
use crate::viewer::Viewer;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ingested: Vec<IngestReport>,
    pub forecasts: Vec<ForecastReport>,
    pub pages: Vec<PageReport>,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    catalog: Catalog,
}

/// Anchor for hour offsets: the current local time, truncated to the hour.
pub fn current_anchor() -> NaiveDateTime {
    floor_hour(Local::now().naive_local())
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Result<Self> {
        let catalog = Catalog::load(cfg.catalog_path.as_deref())?;
        Ok(Self { cfg, catalog })
    }

    pub fn with_catalog(cfg: PipelineConfig, catalog: Catalog) -> Result<Self> {
        catalog.validate()?;
        Ok(Self { cfg, catalog })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn open_store(&self) -> Result<TableStore> {
        TableStore::open(self.cfg.sqlite_path())
    }

    pub fn ingest(&self, store: &mut TableStore) -> Result<Vec<IngestReport>> {
        let _scope = ProfileScope::with_context(
            "ingest",
            &[("dir", v_str(&self.cfg.csv_dir.display().to_string()))],
        );
        log_stage("ingest", "start");
        let reports = ingest_dir(store, &self.cfg.csv_dir)?;
        log_stage("ingest", "done");
        Ok(reports)
    }

    /// Aggregate KPIs first, then time-series KPIs. Stops at the first failure.
    pub fn forecast(
        &self,
        store: &mut TableStore,
        anchor: NaiveDateTime,
    ) -> Result<Vec<ForecastReport>> {
        let _scope = ProfileScope::new("forecast");
        log_stage("forecast", "start");
        let mut reports = Vec::new();
        let aggregate = ForecastSettings::aggregate(&self.cfg);
        for entry in self.catalog.aggregates() {
            reports.push(run_aggregate(store, entry, &aggregate)?);
        }
        let hourly = ForecastSettings::time_series(&self.cfg);
        for entry in self.catalog.time_series() {
            reports.push(run_time_series(store, entry, &hourly, anchor)?);
        }
        log_stage("forecast", "done");
        Ok(reports)
    }

    pub fn render(&self, store: &TableStore) -> Result<Vec<PageReport>> {
        let _scope = ProfileScope::with_context(
            "render",
            &[("dir", v_str(&self.cfg.pages_dir.display().to_string()))],
        );
        log_stage("render", "start");
        let pages = render_all(store, &self.catalog, &self.cfg.pages_dir)?;
        log_stage("render", "done");
        Ok(pages)
    }

    pub fn run_all(&self, anchor: NaiveDateTime) -> Result<RunSummary> {
        let mut store = self.open_store()?;
        let ingested = self.ingest(&mut store)?;
        let forecasts = self.forecast(&mut store, anchor)?;
        let pages = self.render(&store)?;
        Ok(RunSummary {
            ingested,
            forecasts,
            pages,
        })
    }

    pub fn viewer(&self) -> Viewer {
        Viewer::new(&self.catalog, &self.cfg.pages_dir, &self.cfg.assets_dir)
    }
}
