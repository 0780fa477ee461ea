//! Write one HTML page per configured KPI into PAGES_DIR.

use anyhow::Result;
use fermentcast::config::PipelineConfig;
use fermentcast::pipeline::Pipeline;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let pipeline = Pipeline::new(PipelineConfig::from_env())?;
    let store = pipeline.open_store()?;
    for page in pipeline.render(&store)? {
        let marker = if page.has_forecast { "" } else { "  (no forecast)" };
        println!("{}{}", page.path.display(), marker);
    }
    Ok(())
}
