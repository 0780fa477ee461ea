//! Fit every configured KPI and replace its forecast table.

use anyhow::Result;
use fermentcast::config::PipelineConfig;
use fermentcast::pipeline::{current_anchor, Pipeline};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let pipeline = Pipeline::new(PipelineConfig::from_env())?;
    let mut store = pipeline.open_store()?;
    for report in pipeline.forecast(&mut store, current_anchor())? {
        println!(
            "{:<32} {:<40} series={:<3} rows={}",
            report.kpi, report.table, report.series, report.rows
        );
    }
    Ok(())
}
