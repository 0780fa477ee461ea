use anyhow::{bail, Result};
use fermentcast::config::PipelineConfig;
use fermentcast::logging::{log_error, Domain};
use fermentcast::pipeline::{current_anchor, Pipeline};
use fermentcast::viewer::serve;
use std::env;
use std::sync::Arc;

const USAGE: &str = "usage: fermentcast <ingest|forecast|render|run|serve>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let command = env::args().nth(1).unwrap_or_else(|| "run".to_string());
    let cfg = PipelineConfig::from_env();

    let result = dispatch(&command, cfg).await;
    if let Err(err) = &result {
        log_error(Domain::System, &command, err);
    }
    result
}

async fn dispatch(command: &str, cfg: PipelineConfig) -> Result<()> {
    let pipeline = Pipeline::new(cfg)?;
    match command {
        "ingest" => {
            let mut store = pipeline.open_store()?;
            let reports = pipeline.ingest(&mut store)?;
            println!("ingested {} tables", reports.len());
        }
        "forecast" => {
            let mut store = pipeline.open_store()?;
            let reports = pipeline.forecast(&mut store, current_anchor())?;
            println!("wrote {} forecast tables", reports.len());
        }
        "render" => {
            let store = pipeline.open_store()?;
            let pages = pipeline.render(&store)?;
            println!("rendered {} pages", pages.len());
        }
        "run" => {
            let summary = pipeline.run_all(current_anchor())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "serve" => {
            let addr = pipeline.config().viewer_addr.clone();
            serve(Arc::new(pipeline.viewer()), &addr).await?;
        }
        other => bail!("unknown command `{}`\n{}", other, USAGE),
    }
    Ok(())
}
