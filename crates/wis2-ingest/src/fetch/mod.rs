//! Fetchers: retrieve the bytes behind a URL into a sink
//!
//! Every call opens its own connection and releases it when done. Callers
//! bound the call with their own deadline.

pub mod ftp;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use url::Url;

use crate::credentials::CredentialProvider;
use crate::error::FetchError;

pub use ftp::FtpFetcher;
pub use http::HttpFetcher;

/// Result type alias for fetch operations
pub type Result<T> = std::result::Result<T, FetchError>;

/// Writable destination for fetched bytes
pub type Sink<'a> = dyn AsyncWrite + Unpin + Send + 'a;

/// Retrieves the content at a URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Copy the content at `url` into `sink`, returning the number of bytes written
    async fn fetch(&self, url: &Url, sink: &mut Sink<'_>) -> Result<u64>;
}

/// Picks a [`Fetcher`] for a URL
pub trait FetcherFactory: Send + Sync {
    fn fetcher_for(&self, url: &Url) -> Result<Arc<dyn Fetcher>>;
}

/// Resolves fetchers by URL scheme: `http`/`https` and `ftp`
#[derive(Clone)]
pub struct SchemeFetcherFactory {
    http: Arc<HttpFetcher>,
    ftp: Arc<FtpFetcher>,
}

impl SchemeFetcherFactory {
    /// Build the standard fetchers sharing one credential provider
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        Ok(Self {
            http: Arc::new(HttpFetcher::new(credentials.clone())?),
            ftp: Arc::new(FtpFetcher::new(credentials)),
        })
    }
}

impl FetcherFactory for SchemeFetcherFactory {
    fn fetcher_for(&self, url: &Url) -> Result<Arc<dyn Fetcher>> {
        match url.scheme() {
            "http" | "https" => Ok(self.http.clone()),
            "ftp" => Ok(self.ftp.clone()),
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Host used for credential lookup
pub(crate) fn url_host(url: &Url) -> Result<String> {
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FetchError::MissingHost(url.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::credentials::CredentialChain;

    #[test]
    fn test_factory_resolves_by_scheme() {
        let factory = SchemeFetcherFactory::new(Arc::new(CredentialChain::new())).unwrap();
        for url in ["http://a/x", "https://a/x", "ftp://a/x"] {
            assert!(factory.fetcher_for(&Url::parse(url).unwrap()).is_ok(), "{}", url);
        }

        let err = factory
            .fetcher_for(&Url::parse("gopher://a/x").unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, FetchError::UnsupportedScheme(ref s) if s == "gopher"));
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host(&Url::parse("ftp://h.example:2121/x").unwrap()).unwrap(), "h.example");
        assert!(url_host(&Url::parse("file:///tmp/x").unwrap()).is_err());
    }
}
