//! WIS2 Ingest - subscribe, download, verify and store WIS2 data files

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wis2_common::logging::{init_logging, LogConfig, LogLevel};
use wis2_ingest::config::{self, IngestConfig};
use wis2_ingest::fetch::SchemeFetcherFactory;
use wis2_ingest::pipeline::{Pipeline, RunSummary};
use wis2_ingest::receiver::MessageReceiver;
use wis2_ingest::repo::FsRepository;

const EXIT_STREAM_ERROR: u8 = 1;
const EXIT_STARTUP_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "wis2-ingest")]
#[command(author, version, about = "Ingest WIS2 data files announced on an MQTT broker")]
struct Cli {
    /// Broker URL, tcp://host[:port] or ssl://host[:port]
    #[arg(short, long, env = config::BROKER_ENV_VAR)]
    broker: Option<String>,

    /// Topic to subscribe to (repeatable or comma separated)
    #[arg(short, long = "topic", value_delimiter = ',', required = true)]
    topics: Vec<String>,

    /// Continue when some subscriptions are refused
    #[arg(long)]
    ignore_topic_errors: bool,

    /// Number of download workers
    #[arg(short, long, default_value_t = config::DEFAULT_WORKERS)]
    workers: usize,

    /// Repository root directory (must exist)
    #[arg(short, long = "datadir", default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Command run as `<command> <topic> <path>` after each stored file
    #[arg(long)]
    command: Option<String>,

    /// MQTT client id (default: random wis2-<uuid>)
    #[arg(long)]
    client_id: Option<String>,

    /// Subscription QoS (0, 1 or 2)
    #[arg(long, default_value_t = config::DEFAULT_QOS)]
    qos: u8,

    /// Keep-alive interval in seconds
    #[arg(long, default_value_t = config::DEFAULT_KEEP_ALIVE_SECS)]
    keep_alive: u64,

    /// Broker username (overrides WIS2_USER and netrc)
    #[arg(long)]
    username: Option<String>,

    /// Broker password
    #[arg(long, env = "WIS2_BROKER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Username for file downloads (overrides WIS2_FETCH_USER and netrc)
    #[arg(long)]
    fetch_username: Option<String>,

    /// Password for file downloads
    #[arg(long, env = "WIS2_FETCH_PASSWORD", hide_env_values = true)]
    fetch_password: Option<String>,

    /// Netrc file to read credentials from
    #[arg(long)]
    netrc: Option<PathBuf>,

    /// Per-file download deadline in seconds
    #[arg(long, default_value_t = config::DEFAULT_FETCH_TIMEOUT_SECS)]
    fetch_timeout: u64,

    /// Post-processing command deadline in seconds
    #[arg(long, default_value_t = config::DEFAULT_COMMAND_TIMEOUT_SECS)]
    command_timeout: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> IngestConfig {
        IngestConfig {
            broker: self.broker.unwrap_or_default(),
            topics: self.topics,
            ignore_topic_errors: self.ignore_topic_errors,
            workers: self.workers,
            data_dir: self.data_dir,
            command: self.command,
            client_id: self.client_id,
            qos: self.qos,
            keep_alive_secs: self.keep_alive,
            username: self.username,
            password: self.password,
            fetch_username: self.fetch_username,
            fetch_password: self.fetch_password,
            netrc: self.netrc,
            fetch_timeout_secs: self.fetch_timeout,
            command_timeout_secs: self.command_timeout,
            ..Default::default()
        }
        .normalize()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("wis2-ingest")
        .build();

    // Environment variables take precedence over flags
    let _guard = match log_config.merge_env().and_then(|c| init_logging(&c)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("wis2-ingest: failed to initialise logging: {:#}", e);
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        },
    };

    let config = cli.into_config();
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match run(config, cancel).await {
        Ok(summary) => match summary.stream_error {
            None => ExitCode::SUCCESS,
            Some(e) => {
                error!(error = %e, "Notification stream ended with an error");
                ExitCode::from(EXIT_STREAM_ERROR)
            },
        },
        Err(e) => {
            error!("Startup failed: {:#}", e);
            ExitCode::from(EXIT_STARTUP_FAILURE)
        },
    }
}

async fn run(config: IngestConfig, cancel: CancellationToken) -> Result<RunSummary> {
    config.validate()?;

    let repo = FsRepository::new(&config.data_dir)
        .with_context(|| format!("Failed to open repository at {}", config.data_dir.display()))?;
    let fetchers = SchemeFetcherFactory::new(Arc::new(config.fetch_credentials()))
        .context("Failed to build fetchers")?;

    info!(broker = %config.broker, topics = ?config.topics, "Connecting");
    let receiver = MessageReceiver::connect(
        &config.broker,
        &config.topics,
        config.receiver_options(),
        cancel,
    )
    .await
    .with_context(|| format!("Failed to start receiving from {}", config.broker))?;

    let pipeline = Pipeline::new(Arc::new(repo), Arc::new(fetchers), config.pipeline_config());
    let summary = pipeline.run(receiver).await;

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        "Ingest finished"
    );
    Ok(summary)
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    token.cancel();
}
