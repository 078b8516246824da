use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tg_dealbot::{app, config, db, scheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const PRUNE_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    /// Trigger one run right away instead of waiting for the first tick
    #[arg(long)]
    run_now: bool,
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
    rt.cache.start_sweeper(cfg.cache.sweep_interval());

    let shutdown = CancellationToken::new();

    // Drop publication records past the retention window once a day.
    let prune_pool = rt.store.pool().clone();
    let retention = chrono::Duration::days(cfg.app.published_retention_days);
    let prune_stop = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_EVERY);
        loop {
            tokio::select! {
                _ = prune_stop.cancelled() => break,
                _ = ticker.tick() => {
                    let cutoff = Utc::now() - retention;
                    if let Err(err) = db::prune_published_before(&prune_pool, cutoff).await {
                        error!(?err, "failed to prune published deals");
                    }
                }
            }
        }
    });

    if args.run_now {
        drop(rt.engine.trigger_run());
    }
    let sched = scheduler::spawn_scheduler(
        rt.engine.clone(),
        cfg.schedule_interval(),
        cfg.initial_delay(),
        shutdown.clone(),
    );

    info!("deal bot running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    if let Err(err) = sched.await {
        error!(?err, "scheduler task failed");
    }

    // let an in-flight run finish before releasing the cache
    while rt.engine.is_running() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    rt.cache.close();
    Ok(())
}
