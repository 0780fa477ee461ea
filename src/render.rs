//! Static page per KPI: reference image plus the nearest forecast point.

use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, KpiEntry, KpiKind};
use crate::error::{PipelineError, Result};
use crate::forecast::{COL_DS, COL_METRIC, COL_YHAT};
use crate::logging::log_page_written;
use crate::series::parse_ds;
use crate::store::TableStore;
use crate::table::{Cell, Table};

/// Image directory as seen from a page file.
pub const ASSETS_PREFIX: &str = "../assets";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NextPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub kpi: String,
    pub table: String,
    pub path: PathBuf,
    pub has_forecast: bool,
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// First row of the forecast table, after the optional metric filter.
/// The filter only applies when the table carries a `metric` column.
pub fn next_point(table: &Table, metric: Option<&str>) -> Result<Option<NextPoint>> {
    let metric_idx = table.column_index(COL_METRIC);
    let first = table.rows.iter().find(|row| match (metric, metric_idx) {
        (Some(m), Some(idx)) => matches!(&row[idx], Cell::Text(t) if t == m),
        _ => true,
    });
    let Some(row) = first else {
        return Ok(None);
    };

    let missing = |column: &str| PipelineError::MissingColumn {
        table: table.name.clone(),
        column: column.to_string(),
    };
    let ds_idx = table.column_index(COL_DS).ok_or_else(|| missing(COL_DS))?;
    let yhat_idx = table.column_index(COL_YHAT).ok_or_else(|| missing(COL_YHAT))?;

    let ds = row[ds_idx]
        .as_text()
        .and_then(|s| parse_ds(&s))
        .ok_or_else(|| PipelineError::Parse(format!("{}: bad ds `{}`", table.name, row[ds_idx])))?;
    let value = row[yhat_idx].coerce_f64().ok_or_else(|| {
        PipelineError::Parse(format!("{}: bad yhat `{}`", table.name, row[yhat_idx]))
    })?;
    Ok(Some(NextPoint {
        date: ds.date(),
        value,
    }))
}

pub fn forecast_sentence(next: &NextPoint) -> String {
    format!(
        "The model forecasts that by <strong>{}</strong>, the value will be around <strong>{:.2}</strong>.",
        next.date.format("%Y-%m-%d"),
        next.value
    )
}

pub fn render_page(title: &str, image: &str, next: Option<&NextPoint>) -> String {
    let title = html_escape(title);
    let image = html_escape(image);
    let body = match next {
        Some(p) => format!("      <p>{}</p>\n", forecast_sentence(p)),
        None => "      <p><em>No forecast data available.</em></p>\n".to_string(),
    };
    format!(
        r#"
<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title} Forecast</title>
  <style>
    body {{ font-family: Arial, sans-serif; margin: 40px; }}
    h1 {{ text-align: center; }}
    .container {{ max-width: 800px; margin: auto; }}
    .snapshot {{ width: 100%; height: auto; margin: 20px 0; }}
    .forecast-text {{ font-size: 1.2em; line-height: 1.4; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>{title}</h1>
    <img src="{ASSETS_PREFIX}/{image}" alt="{title}" class="snapshot" />
    <div class="forecast-text">{body}
    </div>
  </div>
</body>
</html>
"#
    )
}

pub fn page_path(pages_dir: &Path, entry: &KpiEntry) -> PathBuf {
    pages_dir.join(entry.page_file())
}

pub fn render_entry(store: &TableStore, entry: &KpiEntry, pages_dir: &Path) -> Result<PageReport> {
    let table_name = entry.forecast_table();
    let table = store.read_table(&table_name)?;
    let metric = match entry.kind {
        KpiKind::TimeSeries => entry.metric.as_deref(),
        KpiKind::Aggregate => None,
    };
    let next = next_point(&table, metric)?;
    let html = render_page(&entry.name, &entry.image, next.as_ref());
    let path = page_path(pages_dir, entry);
    std::fs::write(&path, html).map_err(|e| PipelineError::io(&path, e))?;
    log_page_written(&entry.name, &table_name, &path, next.is_some());
    Ok(PageReport {
        kpi: entry.name.clone(),
        table: table_name,
        path,
        has_forecast: next.is_some(),
    })
}

/// One page per catalog entry, bar KPIs first.
pub fn render_all(
    store: &TableStore,
    catalog: &Catalog,
    pages_dir: &Path,
) -> Result<Vec<PageReport>> {
    std::fs::create_dir_all(pages_dir).map_err(|e| PipelineError::io(pages_dir, e))?;
    catalog
        .aggregates()
        .chain(catalog.time_series())
        .map(|entry| render_entry(store, entry, pages_dir))
        .collect()
}
