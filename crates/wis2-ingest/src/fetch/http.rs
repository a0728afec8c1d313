//! HTTP(S) fetcher

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::{url_host, Fetcher, Result, Sink};
use crate::credentials::CredentialProvider;
use crate::error::FetchError;

/// Streams an HTTP response body into the sink.
///
/// Idle connections are not kept, so each fetch uses a fresh connection.
pub struct HttpFetcher {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpFetcher {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("wis2-ingest/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, sink: &mut Sink<'_>) -> Result<u64> {
        let host = url_host(url)?;
        let mut request = self.client.get(url.clone());
        if let Some(credentials) = self.credentials.credentials_for(&host)? {
            request = request.basic_auth(credentials.username, Some(credentials.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;

        debug!(url = %url, bytes = written, "HTTP fetch complete");
        Ok(written)
    }
}
