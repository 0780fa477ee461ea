//! Forecast generation: source table in, forecast table out.
//!
//! Aggregate tables yield a single series. Time-series tables yield one
//! independent series per (batch, metric) pair, concatenated into one output
//! table. Any failure aborts the table being processed.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::catalog::KpiEntry;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::logging::{log_forecast_written, log_rows_dropped, log_series_fit};
use crate::model::{EtsModel, Forecaster, ModelOptions, Observation, Prediction};
use crate::series::{extract_batch_date, format_ds, offset_hours, year_start, Frequency};
use crate::store::{digest_table, TableStore};
use crate::table::{Cell, Table};

pub const YEAR_COLUMN: &str = "Year";
pub const COL_DS: &str = "ds";
pub const COL_YHAT: &str = "yhat";
pub const COL_LOWER: &str = "yhat_lower";
pub const COL_UPPER: &str = "yhat_upper";
pub const COL_BATCH: &str = "batch";
pub const COL_METRIC: &str = "metric";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastSettings {
    pub periods: usize,
    pub interval_width: f64,
    pub include_history: bool,
}

impl ForecastSettings {
    pub fn aggregate(cfg: &PipelineConfig) -> Self {
        Self {
            periods: cfg.aggregate_periods,
            interval_width: cfg.interval_width,
            include_history: cfg.include_history,
        }
    }

    pub fn time_series(cfg: &PipelineConfig) -> Self {
        Self {
            periods: cfg.ts_periods,
            interval_width: cfg.interval_width,
            include_history: cfg.include_history,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRow {
    pub prediction: Prediction,
    pub batch: Option<Cell>,
    pub metric: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ForecastOutput {
    pub table: String,
    pub frequency: Frequency,
    pub series: usize,
    pub dropped_rows: usize,
    pub with_batch: bool,
    pub with_metric: bool,
    pub rows: Vec<ForecastRow>,
}

impl ForecastOutput {
    pub fn to_table(&self) -> Table {
        let mut columns: Vec<String> = [COL_DS, COL_YHAT, COL_LOWER, COL_UPPER]
            .iter()
            .map(|c| c.to_string())
            .collect();
        if self.with_batch {
            columns.push(COL_BATCH.to_string());
        }
        if self.with_metric {
            columns.push(COL_METRIC.to_string());
        }
        let mut table = Table::new(&self.table, columns);
        for row in &self.rows {
            let p = &row.prediction;
            let mut cells = vec![
                Cell::Text(format_ds(p.ds)),
                Cell::Real(p.yhat),
                Cell::Real(p.yhat_lower),
                Cell::Real(p.yhat_upper),
            ];
            if self.with_batch {
                cells.push(row.batch.clone().unwrap_or(Cell::Null));
            }
            if self.with_metric {
                cells.push(row.metric.clone().map(Cell::Text).unwrap_or(Cell::Null));
            }
            table.rows.push(cells);
        }
        table
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastReport {
    pub kpi: String,
    pub table: String,
    pub series: usize,
    pub rows: usize,
    pub digest: String,
}

/// Fit one model and predict: optionally the fitted history, then
/// `periods` steps after the last observation.
fn fit_series<M: Forecaster>(
    model: &M,
    label: &str,
    mut history: Vec<Observation>,
    frequency: Frequency,
    settings: &ForecastSettings,
) -> Result<Vec<Prediction>> {
    let fit_err = |reason: String| PipelineError::ModelFit {
        series: label.to_string(),
        reason,
    };
    history.sort_by(|a, b| a.ds.cmp(&b.ds));
    let y: Vec<f64> = history.iter().map(|o| o.y).collect();
    let bands = model
        .fit_predict(&y, settings.periods, settings.include_history)
        .map_err(|e| fit_err(e.to_string()))?;

    let mut ds: Vec<NaiveDateTime> = Vec::new();
    if settings.include_history {
        ds.extend(history.iter().map(|o| o.ds));
    }
    if let Some(last) = history.last() {
        ds.extend(frequency.future(last.ds, settings.periods));
    }
    if ds.len() != bands.len() {
        return Err(fit_err(format!(
            "{} timestamps for {} predictions",
            ds.len(),
            bands.len()
        )));
    }
    Ok(ds
        .into_iter()
        .zip(bands)
        .map(|(ds, b)| Prediction {
            ds,
            yhat: b.yhat,
            yhat_lower: b.lower,
            yhat_upper: b.upper,
        })
        .collect())
}

fn require_column(table: &Table, column: &str) -> Result<usize> {
    table
        .column_index(column)
        .ok_or_else(|| PipelineError::MissingColumn {
            table: table.name.clone(),
            column: column.to_string(),
        })
}

fn require_numeric(table: &Table, idx: usize) -> Result<usize> {
    if table.column_type(idx).is_numeric() {
        Ok(idx)
    } else {
        Err(PipelineError::ColumnSelection {
            table: table.name.clone(),
            reason: format!("column `{}` is not numeric", table.columns[idx]),
        })
    }
}

/// The forecast target: the configured column, or the only numeric column
/// left once `excluded` is removed.
pub fn select_value_column(
    table: &Table,
    explicit: Option<&str>,
    excluded: &[usize],
) -> Result<usize> {
    if let Some(name) = explicit {
        return require_numeric(table, require_column(table, name)?);
    }
    let candidates: Vec<usize> = table
        .numeric_columns()
        .into_iter()
        .filter(|i| !excluded.contains(i))
        .collect();
    match candidates.as_slice() {
        [only] => Ok(*only),
        [] => Err(PipelineError::ColumnSelection {
            table: table.name.clone(),
            reason: "no numeric column to forecast".to_string(),
        }),
        many => Err(PipelineError::ColumnSelection {
            table: table.name.clone(),
            reason: format!(
                "several numeric columns ({}); set value_column",
                many.iter()
                    .map(|&i| table.columns[i].as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }),
    }
}

/// One series over the whole table: `Year` → yearly, batch-id dates → monthly.
pub fn forecast_aggregate(
    source: &Table,
    entry: &KpiEntry,
    settings: &ForecastSettings,
) -> Result<ForecastOutput> {
    let (axis, frequency) = match source.column_index(YEAR_COLUMN) {
        Some(idx) => (idx, Frequency::Yearly),
        None => {
            let idx = source.find_column("batch").ok_or_else(|| PipelineError::MissingColumn {
                table: source.name.clone(),
                column: "batch".to_string(),
            })?;
            (idx, Frequency::Monthly)
        }
    };
    let value = select_value_column(source, entry.value_column.as_deref(), &[axis])?;

    let history: Vec<Observation> = source
        .rows
        .iter()
        .filter_map(|row| {
            let ds = match frequency {
                Frequency::Yearly => year_start(&row[axis]),
                _ => row[axis].as_text().and_then(|b| extract_batch_date(&b)),
            }?;
            Some(Observation { ds, y: row[value].as_f64()? })
        })
        .collect();
    let dropped_rows = source.len() - history.len();

    let model = EtsModel::new(ModelOptions::aggregate(settings.interval_width));
    let predictions = fit_series(&model, &entry.name, history, frequency, settings)?;
    log_series_fit(&entry.name, None, &source.columns[value], source.len() - dropped_rows);

    Ok(ForecastOutput {
        table: entry.forecast_table(),
        frequency,
        series: 1,
        dropped_rows,
        with_batch: false,
        with_metric: false,
        rows: predictions
            .into_iter()
            .map(|prediction| ForecastRow {
                prediction,
                batch: None,
                metric: None,
            })
            .collect(),
    })
}

/// Metric columns: the configured list, or every numeric column other than
/// the time and batch columns. Returned in name order.
fn metric_columns(
    source: &Table,
    entry: &KpiEntry,
    time_idx: usize,
    batch_idx: Option<usize>,
) -> Result<Vec<usize>> {
    let mut metrics = match &entry.metrics {
        Some(names) => names
            .iter()
            .map(|n| require_column(source, n).and_then(|i| require_numeric(source, i)))
            .collect::<Result<Vec<_>>>()?,
        None => source
            .numeric_columns()
            .into_iter()
            .filter(|&i| i != time_idx && Some(i) != batch_idx)
            .collect(),
    };
    metrics.sort_by(|&a, &b| source.columns[a].cmp(&source.columns[b]));
    metrics.dedup();
    Ok(metrics)
}

/// Row indices per batch key, keys in ascending order. Rows without a key are left out.
fn group_rows(source: &Table, batch_idx: Option<usize>) -> Vec<(Option<Cell>, Vec<usize>)> {
    let Some(b) = batch_idx else {
        return vec![(None, (0..source.len()).collect())];
    };
    let mut keys: Vec<Cell> = source
        .rows
        .iter()
        .map(|r| r[b].clone())
        .filter(|c| !c.is_null())
        .collect();
    keys.sort_by(|x, y| x.key_cmp(y));
    keys.dedup();
    keys.into_iter()
        .map(|key| {
            let rows = (0..source.len()).filter(|&i| source.rows[i][b] == key).collect();
            (Some(key), rows)
        })
        .collect()
}

/// Hour offsets anchored at `anchor`, one model per (batch, metric).
pub fn forecast_time_series(
    source: &Table,
    entry: &KpiEntry,
    settings: &ForecastSettings,
    anchor: NaiveDateTime,
) -> Result<ForecastOutput> {
    if source.columns.is_empty() {
        return Err(PipelineError::MissingColumn {
            table: source.name.clone(),
            column: "time".to_string(),
        });
    }
    let time_idx = source.find_column("time").unwrap_or(0);
    let batch_idx = source
        .columns
        .iter()
        .enumerate()
        .position(|(i, c)| i != time_idx && c.to_lowercase().contains("batch"));
    let metrics = metric_columns(source, entry, time_idx, batch_idx)?;

    let ds: Vec<Option<NaiveDateTime>> = source
        .rows
        .iter()
        .map(|r| r[time_idx].coerce_f64().and_then(|h| offset_hours(anchor, h)))
        .collect();
    let dropped_rows = ds.iter().filter(|d| d.is_none()).count();

    let mut rows = Vec::new();
    let mut series = 0;
    for (batch, members) in group_rows(source, batch_idx) {
        let batch_label = batch.as_ref().map(|b| b.to_string());
        for &m in &metrics {
            let metric = &source.columns[m];
            let history: Vec<Observation> = members
                .iter()
                .filter_map(|&i| {
                    Some(Observation {
                        ds: ds[i]?,
                        y: source.rows[i][m].as_f64()?,
                    })
                })
                .collect();
            if history.is_empty() {
                continue;
            }
            let label = match &batch_label {
                Some(b) => format!("{}/{}/{}", entry.name, b, metric),
                None => format!("{}/{}", entry.name, metric),
            };
            let points = history.len();
            let model = EtsModel::new(ModelOptions::hourly(settings.interval_width));
            let predictions = fit_series(&model, &label, history, Frequency::Hourly, settings)?;
            log_series_fit(&entry.name, batch_label.as_deref(), metric, points);
            series += 1;
            rows.extend(predictions.into_iter().map(|prediction| ForecastRow {
                prediction,
                batch: batch.clone(),
                metric: Some(metric.clone()),
            }));
        }
    }
    if series == 0 {
        return Err(PipelineError::NoSeries(source.name.clone()));
    }

    Ok(ForecastOutput {
        table: entry.forecast_table(),
        frequency: Frequency::Hourly,
        series,
        dropped_rows,
        with_batch: batch_idx.is_some(),
        with_metric: true,
        rows,
    })
}

fn write_output(
    store: &mut TableStore,
    entry: &KpiEntry,
    output: &ForecastOutput,
) -> Result<ForecastReport> {
    if output.dropped_rows > 0 {
        log_rows_dropped(entry.source_table(), "missing timestamp or value", output.dropped_rows);
    }
    let table = output.to_table();
    store.replace_table(&table)?;
    let digest = digest_table(&table);
    log_forecast_written(&entry.name, &table.name, output.series, table.len(), &digest);
    Ok(ForecastReport {
        kpi: entry.name.clone(),
        table: table.name,
        series: output.series,
        rows: output.rows.len(),
        digest,
    })
}

pub fn run_aggregate(
    store: &mut TableStore,
    entry: &KpiEntry,
    settings: &ForecastSettings,
) -> Result<ForecastReport> {
    let source = store.read_table(entry.source_table())?;
    let output = forecast_aggregate(&source, entry, settings)?;
    write_output(store, entry, &output)
}

pub fn run_time_series(
    store: &mut TableStore,
    entry: &KpiEntry,
    settings: &ForecastSettings,
    anchor: NaiveDateTime,
) -> Result<ForecastReport> {
    let source = store.read_table(entry.source_table())?;
    let output = forecast_time_series(&source, entry, settings, anchor)?;
    write_output(store, entry, &output)
}
