//! Sumi-Weave main entry point
//!
//! This is the command-line interface for the Sumi-Weave crawl engine. It runs the tasks declared
//! in a configuration file and prints one JSON line per fetched page.

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sumi_weave::config::{load_config_with_hash, merge_config, Config};
use sumi_weave::crawler::{Crawler, Task};
use sumi_weave::plugin::{AfterHook, ErrorHook, Flow, HookPosition, Plugin};
use tracing_subscriber::EnvFilter;

/// Sumi-Weave: a hook-driven crawl engine
///
/// Sumi-Weave fetches the tasks declared in a TOML file, extracts structured data with
/// selector/filter rules, and follows discovered links through spawners.
#[derive(Parser, Debug)]
#[command(name = "sumi-weave")]
#[command(version)]
#[command(about = "A hook-driven crawl engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Override the configured concurrency
    #[arg(short, long, value_name = "N")]
    concurrency: Option<u32>,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(concurrency) = cli.concurrency {
        let mut crawler = toml::Table::new();
        crawler.insert(
            "concurrency".to_string(),
            toml::Value::Integer(i64::from(concurrency)),
        );
        let mut overrides = toml::Table::new();
        overrides.insert("crawler".to_string(), toml::Value::Table(crawler));
        config = merge_config(&config, overrides)?;
    }

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else {
        handle_crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_weave=info,warn"),
            1 => EnvFilter::new("sumi_weave=debug,info"),
            2 => EnvFilter::new("sumi_weave=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Results go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Sumi-Weave Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Default delay: {}ms", config.crawler.default_delay_ms);
    match config.crawler.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }
    println!("  Max retries: {}", config.attempt.max_retries);

    println!("\nUser Agent:");
    println!(
        "  {}",
        sumi_weave::crawler::user_agent_string(&config.user_agent)
    );

    let plugins = &config.plugins;
    println!("\nDefault Plugins:");
    for (name, enabled) in [
        ("attempt", plugins.attempt),
        ("dup-filter", plugins.dup_filter),
        ("delay", plugins.delay),
        ("extract", plugins.extract),
        ("follow", plugins.follow),
    ] {
        println!("  - {}: {}", name, if enabled { "on" } else { "off" });
    }

    println!("\nTasks ({}):", config.tasks.len());
    for entry in &config.tasks {
        let task = Task::from_entry(entry)?;
        println!(
            "  - {} (priority {}, {} follow rules{})",
            entry.url,
            task.priority,
            task.follow.len(),
            if task.rule.is_some() { ", extracts" } else { "" }
        );
    }

    println!("\nSpawners ({}):", config.spawners.len());
    for entry in &config.spawners {
        println!("  - /{}/", entry.pattern);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling with {} seed tasks", config.tasks.len());

    Ok(())
}

/// Counts reported by the report plugin
#[derive(Debug, Default)]
struct RunStats {
    fetched: AtomicUsize,
    failed: AtomicUsize,
}

/// Prints each fetched page as a JSON line and counts failures
struct Report;

#[async_trait]
impl AfterHook for Report {
    async fn after(&self, task: &mut Task, crawler: &Crawler) -> anyhow::Result<()> {
        crawler
            .store()
            .get_or_init(RunStats::default)
            .fetched
            .fetch_add(1, Ordering::Relaxed);

        let line = json!({
            "id": task.id(),
            "url": task.url,
            "status": task.response.as_ref().map(|r| r.status),
            "extracted": task.extracted,
            "meta": task.meta,
        });
        println!("{}", line);
        Ok(())
    }
}

#[async_trait]
impl ErrorHook for Report {
    async fn on_error(&self, _task: &mut Task, crawler: &Crawler) -> anyhow::Result<Flow> {
        crawler
            .store()
            .get_or_init(RunStats::default)
            .failed
            .fetch_add(1, Ordering::Relaxed);
        Ok(Flow::Continue)
    }
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let seeds = config
        .tasks
        .iter()
        .map(Task::from_entry)
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        "Tasks: {}, Spawners: {}",
        config.tasks.len(),
        config.spawners.len()
    );

    let report = Arc::new(Report);
    let crawler = Crawler::builder(config)
        .plugin(
            Plugin::new("report")
                .with_priority_for(HookPosition::After, i32::MIN)
                .with_priority_for(HookPosition::OnError, i32::MAX)
                .after(report.clone())
                .on_error(report),
        )
        .build()
        .await?;

    let handles: Vec<_> = seeds.into_iter().map(|task| crawler.add(task)).collect();
    crawler.start();

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!("Seed task failed: {}", e);
        }
    }
    crawler.wait_idle().await;

    let stats = crawler.store().get_or_init(RunStats::default);
    tracing::info!(
        "Crawl completed: {} pages fetched, {} failed attempts",
        stats.fetched.load(Ordering::Relaxed),
        stats.failed.load(Ordering::Relaxed)
    );

    Ok(())
}
