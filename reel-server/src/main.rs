//! # Reel Server
//!
//! Standalone scheduler process.
//!
//! - `reel-server` / `reel-server run`: start the scheduler and log queue
//!   events until Ctrl-C
//! - `reel-server status`: print queue and job counts, then exit

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use reel_config::{Config, ConfigLoader};
use reel_server::App;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "reel-server")]
#[command(about = "Persistent job scheduler with per-type concurrency limits")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    args: GlobalArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Configuration file (TOML or JSON)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// SQLite database URL (overrides config and REEL_DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Run,
    /// Print queue and job counts and exit
    Status {
        /// Number of queued jobs to list
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.args)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Status { limit } => status(config, limit).await,
    }
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = args.config.as_ref() {
        loader = loader.with_config_path(path);
    }
    if let Some(url) = args.database_url.as_ref() {
        loader = loader.with_database_url(url.clone());
    }
    let load = loader.load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Job summaries and queue events at info. Override via RUST_LOG.
                "info,reel::store=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if load.config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    for warning in load.warnings.iter() {
        warn!(field = %warning.field, "config warning: {}", warning.message);
    }
    info!(source = ?load.config.metadata.source, "configuration resolved");

    Ok(load.config)
}

async fn run(config: Config) -> anyhow::Result<()> {
    let app = App::build(&config).await?;
    let shutdown = CancellationToken::new();
    let logger = app.spawn_event_logger(shutdown.clone());

    app.start().await?;
    info!(
        workers = config.scheduler.worker_count(),
        recurring = config.scheduler.recurring_jobs.len(),
        database = %config.database.url,
        "reel scheduler running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested; waiting for running jobs");

    app.shutdown(true).await?;
    shutdown.cancel();
    if let Err(err) = logger.await {
        warn!(error = %err, "queue event logger ended abnormally");
    }
    info!("reel scheduler stopped");
    Ok(())
}

async fn status(config: Config, limit: usize) -> anyhow::Result<()> {
    let app = App::build(&config).await?;
    let queue = app.queue();
    let store = app.scheduler().store();

    let due = queue.total_waiting_job_count().await?;
    let waiting = store.waiting_triggers_count().await?;
    let blocked = store.blocked_triggers_count().await?;
    println!("database: {}", config.database.url);
    println!("due: {due} (waiting {waiting}, blocked {blocked})");

    let counts = queue.get_job_counts().await?;
    if counts.is_empty() {
        println!("no stored jobs");
    }
    for (job_type, count) in &counts {
        println!("  {job_type}: {count}");
    }

    let jobs = queue.get_jobs(limit, 0, false).await?;
    if !jobs.is_empty() {
        println!("next {}:", jobs.len());
    }
    for item in jobs {
        let title = item
            .title
            .as_deref()
            .or(item.job_type.as_deref())
            .unwrap_or("-");
        let marker = if item.blocked { " [blocked]" } else { "" };
        println!("  {} {title}{marker}", item.key);
    }
    Ok(())
}
