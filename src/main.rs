use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tidings::config::Config;
use tidings::feed::FeedRsParser;
use tidings::storage::SharedStore;
use tidings::sync::{subscribe, SyncEngine};

/// Get the default config file path (~/.config/tidings/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("tidings")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(name = "tidings", about = "Poll RSS/Atom feeds and report new posts")]
struct Args {
    /// Feed URLs to subscribe to (in addition to `feeds` from the config file)
    #[arg(value_name = "URL")]
    urls: Vec<String>,

    /// Config file (default: ~/.config/tidings/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds between sync cycles (overrides refresh_interval_secs)
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Exit after this many sync cycles (overrides max_cycles)
    #[arg(long, value_name = "N")]
    cycles: Option<u64>,

    /// Print the final summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(secs) = args.interval {
        config.refresh_interval_secs = secs;
    }
    if args.cycles.is_some() {
        config.max_cycles = args.cycles;
    }

    let fetcher = config
        .http_fetcher()
        .context("Failed to build HTTP client")?;
    let engine = SyncEngine::new(
        SharedStore::new(),
        fetcher,
        FeedRsParser,
        config.refresh_interval(),
    );

    engine.on_new_posts(|feed, posts| {
        for post in posts {
            println!(
                "[{}] {}{}",
                feed.title,
                post.title,
                post.link
                    .as_deref()
                    .map(|l| format!(" <{l}>"))
                    .unwrap_or_default()
            );
        }
    });

    let urls: Vec<&str> = config
        .feeds
        .iter()
        .chain(args.urls.iter())
        .map(String::as_str)
        .collect();
    if urls.is_empty() {
        eprintln!("Error: No feeds to follow");
        eprintln!();
        eprintln!("Pass feed URLs on the command line:");
        eprintln!("  tidings https://example.com/feed.xml");
        eprintln!();
        eprintln!("Or list them under `feeds` in {}", config_path.display());
        std::process::exit(1);
    }

    for url in urls {
        match subscribe(&engine, url, config.allow_private_hosts).await {
            Ok(feed) => println!(
                "Subscribed: {} ({} posts)",
                feed.title,
                engine.store().read(|s| s.get_feed_posts(&feed.id).len())
            ),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Subscription failed");
                eprintln!("Skipping {url}: {e}");
            }
        }
    }

    if engine.store().read(|s| s.feed_count()) == 0 {
        anyhow::bail!("None of the given feeds could be subscribed");
    }

    // subscribe() starts the engine with the first feed; harmless if already running
    engine.start();
    println!(
        "Polling {} feeds every {}s (Ctrl-C to stop)",
        engine.store().read(|s| s.feed_count()),
        engine.interval().as_secs()
    );

    let mut cycles = engine.watch_cycles();
    let max_cycles = config.max_cycles;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
        }
        _ = async {
            match max_cycles {
                Some(max) => {
                    let _ = cycles.wait_for(|n| *n >= max).await;
                }
                None => std::future::pending::<()>().await,
            }
        } => {}
    }

    engine.shutdown().await;
    print_summary(&engine, args.json)?;

    println!("Goodbye!");
    Ok(())
}

fn print_summary<F, P>(engine: &SyncEngine<F, P>, json: bool) -> Result<()>
where
    F: tidings::feed::Fetcher + 'static,
    P: tidings::feed::FeedParser + 'static,
{
    let store_stats = engine.store().read(|s| s.stats());
    let engine_stats = engine.stats();

    if json {
        let summary = serde_json::json!({
            "engine": engine_stats,
            "store": store_stats,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
        );
        return Ok(());
    }

    println!(
        "{} cycles, {} feeds, {} posts",
        engine_stats.cycles_completed, store_stats.total_feeds, store_stats.total_posts
    );
    for feed in &store_stats.feeds {
        let error = engine
            .store()
            .read(|s| s.get_feed(&feed.feed_id).and_then(|f| f.last_error.clone()));
        match error {
            Some(error) => println!("  {} - {} posts (last error: {error})", feed.title, feed.post_count),
            None => println!("  {} - {} posts", feed.title, feed.post_count),
        }
    }
    Ok(())
}
