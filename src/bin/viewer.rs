//! KPI viewer.
//!
//! Run with: cargo run --bin viewer
//! Binds VIEWER_ADDR (default 0.0.0.0:8050).

use anyhow::Result;
use fermentcast::config::PipelineConfig;
use fermentcast::pipeline::Pipeline;
use fermentcast::viewer::serve;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let pipeline = Pipeline::new(PipelineConfig::from_env())?;
    let addr = pipeline.config().viewer_addr.clone();
    println!("KPI viewer running at http://{}", addr);
    serve(Arc::new(pipeline.viewer()), &addr).await?;
    Ok(())
}
