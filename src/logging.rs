//! Structured logging for the forecast pipeline.
//!
//! Every record is one JSON line: echoed to stdout and appended to the run
//! directory (`$LOG_DIR/<run_id>/events.jsonl`, debug/trace records to
//! `trace.jsonl`). Records carry a run id and a sequence number so a failed
//! run can be read back in order up to the point of failure.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Ingest,   // CSV files loaded into tables
    Forecast, // Series fits and forecast tables
    Render,   // Page generation
    Viewer,   // HTTP requests
    Store,    // Table replace/read
    System,   // Startup, config, stage boundaries
    Profile,  // Stage timings
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Ingest => "ingest",
            Domain::Forecast => "forecast",
            Domain::Render => "render",
            Domain::Viewer => "viewer",
            Domain::Store => "store",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Mutex<Option<BufWriter<File>>>,
    trace: Mutex<Option<BufWriter<File>>>,
}

fn open_sink(path: &Path) -> Mutex<Option<BufWriter<File>>> {
    match File::create(path) {
        Ok(f) => Mutex::new(Some(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            Mutex::new(None)
        }
    }
}

/// `LOG_DIR` if set, else `out/runs`. Unit test builds default to the
/// system temp dir so runs never land in the source tree.
fn log_base_dir() -> PathBuf {
    match std::env::var_os("LOG_DIR") {
        Some(dir) => PathBuf::from(dir),
        None if cfg!(test) => std::env::temp_dir().join("fermentcast-runs"),
        None => PathBuf::from("out/runs"),
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let run_dir = log_base_dir().join(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_sink(&run_dir.join("events.jsonl")),
            trace: open_sink(&run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

fn write_line(writer: &Mutex<Option<BufWriter<File>>>, line: &str) {
    if let Ok(mut guard) = writer.lock() {
        if let Some(w) = guard.as_mut() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["table", "kpi", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_stage(stage: &str, status: &str) {
    log(
        Level::Info,
        Domain::System,
        "stage",
        obj(&[("stage", v_str(stage)), ("status", v_str(status))]),
    );
}

pub fn log_table_loaded(table: &str, path: &Path, rows: usize, columns: usize, sha256: &str) {
    log(
        Level::Info,
        Domain::Ingest,
        "table_loaded",
        obj(&[
            ("table", v_str(table)),
            ("path", v_str(&path.display().to_string())),
            ("rows", json!(rows)),
            ("columns", json!(columns)),
            ("sha256", v_str(sha256)),
        ]),
    );
}

pub fn log_table_replaced(table: &str, rows: usize) {
    log(
        Level::Debug,
        Domain::Store,
        "table_replaced",
        obj(&[("table", v_str(table)), ("rows", json!(rows))]),
    );
}

pub fn log_series_fit(table: &str, batch: Option<&str>, metric: &str, points: usize) {
    log(
        Level::Debug,
        Domain::Forecast,
        "series_fit",
        obj(&[
            ("table", v_str(table)),
            ("batch", batch.map(v_str).unwrap_or(Value::Null)),
            ("metric", v_str(metric)),
            ("points", json!(points)),
        ]),
    );
}

pub fn log_rows_dropped(table: &str, reason: &str, count: usize) {
    log(
        Level::Warn,
        Domain::Forecast,
        "rows_dropped",
        obj(&[
            ("table", v_str(table)),
            ("reason", v_str(reason)),
            ("count", json!(count)),
        ]),
    );
}

pub fn log_forecast_written(kpi: &str, table: &str, series: usize, rows: usize, digest: &str) {
    log(
        Level::Info,
        Domain::Forecast,
        "forecast_written",
        obj(&[
            ("kpi", v_str(kpi)),
            ("table", v_str(table)),
            ("series", json!(series)),
            ("rows", json!(rows)),
            ("digest", v_str(digest)),
        ]),
    );
}

pub fn log_page_written(kpi: &str, table: &str, path: &Path, has_forecast: bool) {
    log(
        Level::Info,
        Domain::Render,
        "page_written",
        obj(&[
            ("kpi", v_str(kpi)),
            ("table", v_str(table)),
            ("path", v_str(&path.display().to_string())),
            ("has_forecast", Value::Bool(has_forecast)),
        ]),
    );
}

pub fn log_request(method: &str, target: &str, status: u16) {
    let level = if status >= 400 { Level::Warn } else { Level::Info };
    log(
        level,
        Domain::Viewer,
        "request",
        obj(&[
            ("method", v_str(method)),
            ("target", v_str(target)),
            ("status", json!(status)),
        ]),
    );
}

pub fn log_error(domain: Domain, event: &str, err: &dyn std::fmt::Display) {
    log(
        Level::Error,
        domain,
        event,
        obj(&[("msg", v_str(&err.to_string()))]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits the elapsed time of a stage on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Map<String, Value>,
    started: Instant,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            label,
            context: obj(fields),
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = std::mem::take(&mut self.context);
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Debug, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================
