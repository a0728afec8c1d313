//! WIS2 Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Subscribes to WIS2 notification topics on an MQTT broker, downloads each
//! announced file, verifies it against the notification's integrity digest,
//! and stores it in a local repository laid out by topic.
//!
//! # Components
//!
//! - [`receiver`]: broker connection, subscription and message decoding
//! - [`pipeline`]: validation, duplicate detection, worker pool, results
//! - [`fetch`]: HTTP(S) and FTP fetchers
//! - [`repo`]: filesystem repository
//! - [`executor`]: post-processing command runner
//! - [`credentials`]: explicit, environment and netrc credential lookup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use wis2_ingest::config::IngestConfig;
//! use wis2_ingest::fetch::SchemeFetcherFactory;
//! use wis2_ingest::pipeline::Pipeline;
//! use wis2_ingest::receiver::MessageReceiver;
//! use wis2_ingest::repo::FsRepository;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig {
//!         broker: "tcp://globalbroker.example.org".to_string(),
//!         topics: vec!["cache/a/wis2/+/data/core/#".to_string()],
//!         ..Default::default()
//!     };
//!     config.validate()?;
//!
//!     let repo = Arc::new(FsRepository::new(&config.data_dir)?);
//!     let fetchers = Arc::new(SchemeFetcherFactory::new(Arc::new(config.fetch_credentials()))?);
//!     let receiver = MessageReceiver::connect(
//!         &config.broker,
//!         &config.topics,
//!         config.receiver_options(),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!
//!     let summary = Pipeline::new(repo, fetchers, config.pipeline_config())
//!         .run(receiver)
//!         .await;
//!     println!("stored {} files", summary.succeeded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod pipeline;
pub mod receiver;
pub mod repo;

pub use error::{CommandError, CredentialError, FetchError, IngestError, ReceiverError, RepoError};
pub use pipeline::{Pipeline, PipelineConfig, RunSummary};
pub use receiver::{MessageReceiver, NotificationSource, ReceiverOptions, ReceiverState};
