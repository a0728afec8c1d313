//! Configuration management

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialChain, Credentials};
use crate::pipeline::PipelineConfig;
use crate::receiver::{self, ReceiverOptions};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Environment variable holding the broker URL.
pub const BROKER_ENV_VAR: &str = "WIS2_BROKER";

/// Default number of download workers.
pub const DEFAULT_WORKERS: usize = crate::pipeline::DEFAULT_WORKERS;

/// Default repository root.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default subscription QoS.
pub const DEFAULT_QOS: u8 = receiver::DEFAULT_QOS;

/// Default keep-alive interval in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;

/// Minimum keep-alive interval accepted by the MQTT client, in seconds.
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Default per-fetch deadline in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;

/// Default post-processing command deadline in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default broker mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = receiver::DEFAULT_MAILBOX_CAPACITY;

/// Environment prefix for broker credentials (`WIS2_USER`, `WIS2_PASSWD`).
pub const BROKER_CREDENTIALS_ENV_PREFIX: &str = receiver::DEFAULT_CREDENTIALS_ENV_PREFIX;

/// Environment prefix for fetch credentials (`WIS2_FETCH_USER`, `WIS2_FETCH_PASSWD`).
pub const FETCH_CREDENTIALS_ENV_PREFIX: &str = "WIS2_FETCH";

/// Settings for one ingest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub broker: String,
    pub topics: Vec<String>,
    pub ignore_topic_errors: bool,
    pub workers: usize,
    pub data_dir: PathBuf,
    pub command: Option<String>,
    /// Random `wis2-<uuid>` when unset
    pub client_id: Option<String>,
    pub qos: u8,
    pub keep_alive_secs: u64,
    /// Broker username; takes precedence over the environment and netrc
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Username for file downloads; takes precedence over the environment and netrc
    pub fetch_username: Option<String>,
    #[serde(skip_serializing)]
    pub fetch_password: Option<String>,
    pub netrc: Option<PathBuf>,
    pub fetch_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub mailbox_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            topics: Vec::new(),
            ignore_topic_errors: false,
            workers: DEFAULT_WORKERS,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            command: None,
            client_id: None,
            qos: DEFAULT_QOS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            username: None,
            password: None,
            fetch_username: None,
            fetch_password: None,
            netrc: None,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl IngestConfig {
    /// Trim topics and drop empty entries, e.g. from `-t a,,b`
    pub fn normalize(mut self) -> Self {
        self.broker = self.broker.trim().to_string();
        self.topics = self
            .topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        self.command = self.command.filter(|c| !c.trim().is_empty());
        self.username = self.username.filter(|u| !u.is_empty());
        self.password = self.password.filter(|p| !p.is_empty());
        self.fetch_username = self.fetch_username.filter(|u| !u.is_empty());
        self.fetch_password = self.fetch_password.filter(|p| !p.is_empty());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.broker.is_empty() {
            bail!("Broker URL is required (--broker or {})", BROKER_ENV_VAR);
        }

        if self.topics.is_empty() {
            bail!("At least one topic is required");
        }

        if self.workers == 0 {
            bail!("Worker count must be greater than 0");
        }

        if self.qos > 2 {
            bail!("QoS must be 0, 1 or 2, got {}", self.qos);
        }

        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            bail!("Keep-alive must be at least {} seconds", MIN_KEEP_ALIVE_SECS);
        }

        if self.fetch_timeout_secs == 0 || self.command_timeout_secs == 0 {
            bail!("Timeouts must be greater than 0");
        }

        if self.mailbox_capacity == 0 {
            bail!("Mailbox capacity must be greater than 0");
        }

        if !self.data_dir.is_dir() {
            bail!("Data directory {} does not exist", self.data_dir.display());
        }

        Ok(())
    }

    /// Credential chain for the broker connection
    pub fn broker_credentials(&self) -> CredentialChain {
        CredentialChain::standard(
            explicit_credentials(self.username.as_deref(), self.password.as_deref()),
            BROKER_CREDENTIALS_ENV_PREFIX,
            self.netrc.clone(),
        )
    }

    /// Credential chain for file fetches
    pub fn fetch_credentials(&self) -> CredentialChain {
        CredentialChain::standard(
            explicit_credentials(self.fetch_username.as_deref(), self.fetch_password.as_deref()),
            FETCH_CREDENTIALS_ENV_PREFIX,
            self.netrc.clone(),
        )
    }

    pub fn receiver_options(&self) -> ReceiverOptions {
        ReceiverOptions {
            client_id: self
                .client_id
                .clone()
                .unwrap_or_else(receiver::default_client_id),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            clean_start: true,
            qos: self.qos,
            ignore_topic_errors: self.ignore_topic_errors,
            mailbox_capacity: self.mailbox_capacity,
            credentials: Arc::new(self.broker_credentials()),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.workers,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            command: self.command.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }
}

/// Explicit credentials when either half is set; a missing half is empty
fn explicit_credentials(username: Option<&str>, password: Option<&str>) -> Option<Credentials> {
    if username.is_none() && password.is_none() {
        return None;
    }
    Some(Credentials::new(username.unwrap_or_default(), password.unwrap_or_default()))
}
