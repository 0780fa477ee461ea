//! Load every CSV under CSV_FOLDER into the store, one table per file.

use anyhow::Result;
use fermentcast::config::PipelineConfig;
use fermentcast::pipeline::Pipeline;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let pipeline = Pipeline::new(PipelineConfig::from_env())?;
    let mut store = pipeline.open_store()?;
    for report in pipeline.ingest(&mut store)? {
        println!(
            "{:<32} {:>8} rows  {:>3} cols  {}",
            report.table,
            report.rows,
            report.columns.len(),
            report.sha256.get(..12).unwrap_or(&report.sha256)
        );
    }
    Ok(())
}
