use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use fetch_engine::{
    config::load_config_path,
    db::{migrate, pool::DbPool},
    logging,
    orchestrator::{Orchestrator, RunOptions, Stores},
    queue::{NewRequest, SqliteWorkQueue, WorkQueue},
    shutdown, tz,
    sources::SourceRegistry,
};
use tokio_util::sync::CancellationToken;
use waveform_ingestor::models::channel::ChannelKey;

#[derive(Parser)]
#[command(version, about = "Waveform fetch engine")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run workers for every target, or just one.
    Run {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
        /// Run only this target.
        #[arg(long)]
        target: Option<String>,
        /// Exit once the queue has nothing eligible.
        #[arg(long)]
        once: bool,
    },
    /// Apply database migrations.
    Migrate {
        #[arg(long, env = "FETCH_DATABASE_URL")]
        database_url: String,
    },
    /// Insert an OPEN fetch request.
    Enqueue {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
        /// Channel as N.S.L.C or the fixed-width key.
        #[arg(long)]
        channel: String,
        /// Interval start, RFC 3339.
        #[arg(long)]
        start: String,
        #[arg(long)]
        seconds: i64,
        #[arg(long)]
        gap_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Run {
            config,
            target,
            once,
        } => {
            let cfg = load_config_path(&config)?;
            logging::init(cfg.engine.log_level.as_deref(), cfg.engine.log_format)?;

            migrate::run_all(&cfg.engine.database_url)?;
            let pool = DbPool::open(&cfg.engine.database_url, cfg.engine.pool_size)?;

            let orchestrator = Orchestrator::new(
                cfg,
                Some(config),
                SourceRegistry::default(),
                Stores::sqlite(pool),
                RunOptions {
                    target,
                    single_shot: once,
                },
            )?;

            let cancel = CancellationToken::new();
            shutdown::cancel_on_signal(cancel.clone());
            let stats = orchestrator.run(cancel).await?;
            for (name, s) in &stats {
                tracing::info!(target_name = %name, stats = ?s, "final counters");
            }
        }
        Cmd::Migrate { database_url } => {
            logging::init(None, Default::default())?;
            migrate::run_all(&database_url)?;
            tracing::info!(%database_url, "migrations applied");
        }
        Cmd::Enqueue {
            config,
            channel,
            start,
            seconds,
            gap_type,
        } => {
            let cfg = load_config_path(&config)?;
            logging::init(cfg.engine.log_level.as_deref(), cfg.engine.log_format)?;
            let channel: ChannelKey = channel.parse().context("parse --channel")?;
            let start = tz::parse_ts_to_utc(&start)?;

            migrate::run_all(&cfg.engine.database_url)?;
            let pool = DbPool::open(&cfg.engine.database_url, 1)?;
            let queue = SqliteWorkQueue::new(pool);
            let id = queue
                .insert_open(&NewRequest::new(
                    channel,
                    start,
                    Duration::seconds(seconds),
                    gap_type.trim().to_uppercase(),
                ))
                .await?;
            println!("{id}");
        }
    }

    Ok(())
}
