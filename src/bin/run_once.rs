use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tg_dealbot::engine::RunOutcome;
use tg_dealbot::{app, config};
use tracing::info;

/// Perform a single deal run and exit.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let rt = app::build(&cfg).await?;
    let outcome = rt.engine.run_once().await;
    info!(?outcome, "manual run done");
    println!("{outcome:?}");

    rt.cache.close();
    if let RunOutcome::Failed(reason) = outcome {
        anyhow::bail!("run failed: {reason}");
    }
    Ok(())
}
