//! FTP fetcher
//!
//! Uses suppaftp's async client with binary transfers and extended passive
//! mode (EPSV) for NAT/firewall compatibility. The data connection is copied
//! straight into the sink, and dropping the fetch closes both connections.

use std::sync::Arc;

use async_trait::async_trait;
use suppaftp::types::FileType;
use suppaftp::{AsyncFtpStream, Mode};
use tokio::io::AsyncWriteExt;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, warn};
use url::Url;

use super::{url_host, Fetcher, Result, Sink};
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::FetchError;

/// Default FTP control port
pub const DEFAULT_FTP_PORT: u16 = 21;

const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

pub struct FtpFetcher {
    credentials: Arc<dyn CredentialProvider>,
}

impl FtpFetcher {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { credentials }
    }
}

fn ftp_error(context: &str, err: impl std::fmt::Display) -> FetchError {
    FetchError::Ftp(format!("{}: {}", context, err))
}

/// Path on the server for `url`, percent-decoded
fn remote_path(url: &Url) -> Result<String> {
    let decoded = urlencoding::decode(url.path())
        .map_err(|e| ftp_error("decoding path", e))?
        .into_owned();
    if decoded.is_empty() || decoded == "/" {
        return Err(FetchError::Ftp(format!("no file path in {}", url)));
    }
    Ok(decoded)
}

#[async_trait]
impl Fetcher for FtpFetcher {
    async fn fetch(&self, url: &Url, sink: &mut Sink<'_>) -> Result<u64> {
        let host = url_host(url)?;
        let port = url.port().unwrap_or(DEFAULT_FTP_PORT);
        let path = remote_path(url)?;
        let credentials = self
            .credentials
            .credentials_for(&host)?
            .unwrap_or_else(|| Credentials::new(ANONYMOUS_USER, ANONYMOUS_PASSWORD));

        let mut ftp_stream = AsyncFtpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| ftp_error("connecting", e))?;
        ftp_stream.set_mode(Mode::ExtendedPassive);

        ftp_stream
            .login(&credentials.username, &credentials.password)
            .await
            .map_err(|e| ftp_error("login", e))?;
        ftp_stream
            .transfer_type(FileType::Binary)
            .await
            .map_err(|e| ftp_error("setting binary mode", e))?;

        let data = ftp_stream
            .retr_as_stream(&path)
            .await
            .map_err(|e| ftp_error("RETR", e))?;
        let mut reader = data.compat();
        let written = tokio::io::copy(&mut reader, sink).await?;
        sink.flush().await?;

        ftp_stream
            .finalize_retr_stream(reader.into_inner())
            .await
            .map_err(|e| ftp_error("completing RETR", e))?;
        if let Err(e) = ftp_stream.quit().await {
            warn!(host = %host, error = %e, "FTP QUIT failed");
        }

        debug!(url = %url, bytes = written, "FTP fetch complete");
        Ok(written)
    }
}
