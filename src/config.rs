use std::path::PathBuf;

/// Everything a pipeline stage needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_url: String,
    pub csv_dir: PathBuf,
    pub pages_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub viewer_addr: String,
    pub aggregate_periods: usize,
    pub ts_periods: usize,
    pub interval_width: f64,
    pub include_history: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_url: "./fermentcast.sqlite".to_string(),
            csv_dir: PathBuf::from("./csv"),
            pages_dir: PathBuf::from("./pages"),
            assets_dir: PathBuf::from("./assets"),
            catalog_path: None,
            viewer_addr: "0.0.0.0:8050".to_string(),
            aggregate_periods: 5,
            ts_periods: 24,
            interval_width: 0.8,
            include_history: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            db_url: std::env::var("DB_URL").unwrap_or(d.db_url),
            csv_dir: std::env::var("CSV_FOLDER").map(PathBuf::from).unwrap_or(d.csv_dir),
            pages_dir: std::env::var("PAGES_DIR").map(PathBuf::from).unwrap_or(d.pages_dir),
            assets_dir: std::env::var("ASSETS_DIR").map(PathBuf::from).unwrap_or(d.assets_dir),
            catalog_path: std::env::var("KPI_CATALOG").ok().map(PathBuf::from),
            viewer_addr: std::env::var("VIEWER_ADDR").unwrap_or(d.viewer_addr),
            aggregate_periods: std::env::var("FORECAST_PERIODS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.aggregate_periods),
            ts_periods: std::env::var("TS_FORECAST_PERIODS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.ts_periods),
            interval_width: std::env::var("INTERVAL_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|w: &f64| *w > 0.0 && *w < 1.0)
                .unwrap_or(d.interval_width),
            include_history: std::env::var("INCLUDE_HISTORY")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(d.include_history),
        }
    }

    /// Resolve `DB_URL` to something `rusqlite` can open.
    pub fn sqlite_path(&self) -> &str {
        let url = self.db_url.as_str();
        url.strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url)
    }
}
