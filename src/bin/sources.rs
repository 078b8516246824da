use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tg_dealbot::{app, config, db};

/// Print source status, and optionally probe each source with a keyword.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    /// Search every registered source for this keyword and report counts
    #[arg(long)]
    probe: Option<String>,
    /// Items requested per source when probing
    #[arg(long, default_value_t = 10)]
    limit: usize,
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

    let store = app::open_store(&cfg).await?;
    let cache = app::build_cache(&cfg);
    let registry = app::build_registry(&cfg, cache.clone()).await?;
    registry
        .update_settings(db::list_all_sources(store.pool()).await?)
        .await;

    let stats = registry.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!(
        "published deals: {}",
        db::count_published(store.pool()).await?
    );
    for deal in db::recent_published(store.pool(), 5).await? {
        println!(
            "  {}/{} {}% {}",
            deal.source_id, deal.external_id, deal.discount_percent, deal.title
        );
    }

    if let Some(keyword) = args.probe {
        for id in stats.per_source.keys() {
            match registry.fetch_from_source(id, &keyword, args.limit).await {
                Ok(items) => {
                    println!("{id}: {} candidates", items.len());
                    for it in items.iter().take(3) {
                        println!("  {}% {} {}", it.discount_percent, it.title, it.publish_link);
                    }
                }
                Err(err) => println!("{id}: {err}"),
            }
        }
    }

    cache.close();
    Ok(())
}
