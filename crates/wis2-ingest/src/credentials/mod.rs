//! Credential resolution for broker and fetch connections
//!
//! Providers are consulted in order by a [`CredentialChain`]; the first one
//! that yields credentials for a host wins. The usual chain is explicit
//! credentials, then `<PREFIX>_USER` / `<PREFIX>_PASSWD` from the environment,
//! then a netrc file.

pub mod netrc;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::CredentialError;

pub use netrc::{Netrc, NetrcEntry};

/// Result type alias for credential lookups
pub type Result<T> = std::result::Result<T, CredentialError>;

/// Username and password pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A source of per-host credentials
pub trait CredentialProvider: Send + Sync {
    /// Credentials for `host` (no port), or `None` if this provider has none
    fn credentials_for(&self, host: &str) -> Result<Option<Credentials>>;

    /// Short provider name for logs
    fn name(&self) -> &'static str;
}

/// Fixed credentials used for every host
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials_for(&self, _host: &str) -> Result<Option<Credentials>> {
        Ok(Some(self.0.clone()))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Credentials from `<PREFIX>_USER` and `<PREFIX>_PASSWD`
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    prefix: String,
}

impl EnvCredentials {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var(&self, suffix: &str) -> String {
        std::env::var(format!("{}_{}", self.prefix, suffix)).unwrap_or_default()
    }
}

impl CredentialProvider for EnvCredentials {
    fn credentials_for(&self, _host: &str) -> Result<Option<Credentials>> {
        let username = self.var("USER");
        let password = self.var("PASSWD");
        if username.is_empty() && password.is_empty() {
            return Ok(None);
        }
        Ok(Some(Credentials { username, password }))
    }

    fn name(&self) -> &'static str {
        "environment"
    }
}

/// Credentials from a netrc file.
///
/// The file is located on every lookup so edits are picked up without a
/// restart.
#[derive(Debug, Clone, Default)]
pub struct NetrcCredentials {
    path: Option<PathBuf>,
}

impl NetrcCredentials {
    /// Use the default lookup locations, with an optional explicit path first
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl CredentialProvider for NetrcCredentials {
    fn credentials_for(&self, host: &str) -> Result<Option<Credentials>> {
        let Some(path) = netrc::resolve_path(self.path.as_deref()) else {
            return Ok(None);
        };
        lookup_in_file(&path, host)
    }

    fn name(&self) -> &'static str {
        "netrc"
    }
}

fn lookup_in_file(path: &Path, host: &str) -> Result<Option<Credentials>> {
    let parsed = Netrc::from_file(path)?;
    Ok(parsed.lookup(host).and_then(|entry| {
        let username = entry.login.clone().unwrap_or_default();
        let password = entry.password.clone().unwrap_or_default();
        if username.is_empty() && password.is_empty() {
            None
        } else {
            Some(Credentials { username, password })
        }
    }))
}

/// Ordered list of providers; the first non-empty answer wins
#[derive(Clone, Default)]
pub struct CredentialChain {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider to the end of the chain
    pub fn with(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// The standard chain: explicit, then environment, then netrc
    pub fn standard(
        explicit: Option<Credentials>,
        env_prefix: &str,
        netrc_path: Option<PathBuf>,
    ) -> Self {
        let mut chain = Self::new();
        if let Some(credentials) = explicit {
            chain = chain.with(StaticCredentials::new(credentials));
        }
        chain
            .with(EnvCredentials::new(env_prefix))
            .with(NetrcCredentials::new(netrc_path))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl CredentialProvider for CredentialChain {
    fn credentials_for(&self, host: &str) -> Result<Option<Credentials>> {
        for provider in &self.providers {
            if let Some(credentials) = provider.credentials_for(host)? {
                debug!(host = %host, provider = provider.name(), "Resolved credentials");
                return Ok(Some(credentials));
            }
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Nothing;

    impl CredentialProvider for Nothing {
        fn credentials_for(&self, _host: &str) -> Result<Option<Credentials>> {
            Ok(None)
        }

        fn name(&self) -> &'static str {
            "nothing"
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("alice", "s3cret");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn test_env_credentials() {
        std::env::set_var("WIS2_TEST_ENVCREDS_USER", "env-user");
        std::env::set_var("WIS2_TEST_ENVCREDS_PASSWD", "env-pass");
        let creds = EnvCredentials::new("WIS2_TEST_ENVCREDS")
            .credentials_for("any")
            .unwrap()
            .unwrap();
        assert_eq!(creds, Credentials::new("env-user", "env-pass"));

        assert!(EnvCredentials::new("WIS2_TEST_ENVCREDS_UNSET")
            .credentials_for("any")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_chain_first_non_empty_wins() {
        let chain = CredentialChain::new()
            .with(Nothing)
            .with(StaticCredentials::new(Credentials::new("first", "1")))
            .with(StaticCredentials::new(Credentials::new("second", "2")));
        let creds = chain.credentials_for("host").unwrap().unwrap();
        assert_eq!(creds.username, "first");
    }

    #[test]
    fn test_chain_empty_yields_none() {
        let chain = CredentialChain::new().with(Nothing);
        assert!(chain.credentials_for("host").unwrap().is_none());
    }

    #[test]
    fn test_netrc_provider_with_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netrc");
        std::fs::write(&path, "machine ftp.example.org login bob password hunter2\n").unwrap();

        let provider = NetrcCredentials::new(Some(path));
        let creds = provider.credentials_for("ftp.example.org").unwrap().unwrap();
        assert_eq!(creds, Credentials::new("bob", "hunter2"));
    }

    #[test]
    fn test_explicit_beats_netrc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netrc");
        std::fs::write(&path, "default login netrc-user password p\n").unwrap();

        let chain = CredentialChain::standard(
            Some(Credentials::new("explicit", "e")),
            "WIS2_TEST_STANDARD_UNSET",
            Some(path),
        );
        assert_eq!(chain.len(), 3);
        let creds = chain.credentials_for("h").unwrap().unwrap();
        assert_eq!(creds.username, "explicit");
    }

    #[test]
    fn test_malformed_netrc_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netrc");
        std::fs::write(&path, "machine h wat\n").unwrap();
        assert!(lookup_in_file(&path, "h").is_err());
    }
}
