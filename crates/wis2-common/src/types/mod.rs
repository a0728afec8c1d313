//! Common types used across WIS2 ingest
//!
//! The notification model follows the WIS2 notification message format: a
//! broker publish carries a JSON body describing where a file can be fetched
//! and how to verify it once downloaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{Result, Wis2Error};

/// Digest algorithm used by an integrity descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityMethod {
    Md5,
    Sha256,
    Sha512,
}

impl IntegrityMethod {
    /// Length in bytes of a raw digest produced by this method
    pub fn digest_len(self) -> usize {
        match self {
            IntegrityMethod::Md5 => 16,
            IntegrityMethod::Sha256 => 32,
            IntegrityMethod::Sha512 => 64,
        }
    }
}

impl std::str::FromStr for IntegrityMethod {
    type Err = Wis2Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(IntegrityMethod::Md5),
            "sha256" => Ok(IntegrityMethod::Sha256),
            "sha512" => Ok(IntegrityMethod::Sha512),
            _ => Err(Wis2Error::UnsupportedIntegrityMethod(s.to_string())),
        }
    }
}

impl std::fmt::Display for IntegrityMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityMethod::Md5 => write!(f, "md5"),
            IntegrityMethod::Sha256 => write!(f, "sha256"),
            IntegrityMethod::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Integrity descriptor carried by a notification.
///
/// `value` holds the raw digest bytes. On the wire it is base64 text; the
/// conversion happens during (de)serialization so the rest of the code base
/// only ever sees bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrity {
    /// Digest method name as received (lower-cased by the decoder)
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,

    /// Raw digest bytes
    #[serde(default, with = "base64_value")]
    pub value: Vec<u8>,
}

impl Integrity {
    /// Expected digest as lower-case hex text
    pub fn value_hex(&self) -> String {
        hex::encode(&self.value)
    }

    /// Parse the method and check the digest length against it
    pub fn validate(&self) -> Result<IntegrityMethod> {
        let method: IntegrityMethod = self.method.parse().map_err(|_| {
            Wis2Error::validation(format!("unsupported integrity method '{}'", self.method))
        })?;
        if self.value.len() != method.digest_len() {
            return Err(Wis2Error::validation(format!(
                "invalid {} integrity value: expected {} bytes, got {}",
                method,
                method.digest_len(),
                self.value.len()
            )));
        }
        Ok(method)
    }
}

/// Inline content block; accepted on the wire, not acted upon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub value: String,
}

/// Partitioned (multi-block) file description; accepted on the wire, not acted upon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStrategy {
    #[serde(default, rename = "partitioned")]
    pub method: String,
    #[serde(default)]
    pub block_number: u64,
    #[serde(default)]
    pub block_count: u64,
    #[serde(default)]
    pub block_size: u64,
    #[serde(default)]
    pub last_block: u64,
}

/// JSON body of a broker publish
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WisPayload {
    /// Publication time set by the originating centre
    #[serde(default)]
    pub pub_time: Option<DateTime<Utc>>,

    /// Base URL of the file location
    #[serde(default, deserialize_with = "null_as_default")]
    pub base_url: String,

    /// Path of the file relative to `base_url`
    #[serde(default, deserialize_with = "null_as_default")]
    pub rel_path: String,

    /// Fallback path used when `rel_path` is empty
    #[serde(default, deserialize_with = "null_as_default")]
    pub ret_path: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub integrity: Integrity,

    /// Declared size in bytes
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_strategy: Option<PartitionStrategy>,
}

impl WisPayload {
    /// The path used to locate the file: `rel_path`, or `ret_path` when empty
    pub fn path(&self) -> Result<&str> {
        if !self.rel_path.is_empty() {
            Ok(&self.rel_path)
        } else if !self.ret_path.is_empty() {
            Ok(&self.ret_path)
        } else {
            Err(Wis2Error::validation("missing relPath and retPath"))
        }
    }

    /// Last path segment of [`WisPayload::path`]
    pub fn file_name(&self) -> Result<&str> {
        let path = self.path()?;
        match path.rsplit('/').next() {
            Some(name) if !name.is_empty() && name != "." && name != ".." => Ok(name),
            _ => Err(Wis2Error::validation(format!("no file name in path '{}'", path))),
        }
    }

    /// Resolve the download URL from `base_url` and the relative path.
    ///
    /// The base is treated as a directory and the path as a reference relative
    /// to it. The resolved URL must keep the base's scheme, host and port and
    /// stay below the base path.
    pub fn resolve_url(&self) -> Result<Url> {
        let relative = self.path()?.trim_start_matches('/');

        let mut base = Url::parse(&self.base_url).map_err(|e| {
            Wis2Error::validation(format!("invalid baseUrl '{}': {}", self.base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(Wis2Error::validation(format!(
                "baseUrl '{}' cannot be a base",
                self.base_url
            )));
        }
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }

        let url = base.join(relative).map_err(|e| {
            Wis2Error::validation(format!("cannot resolve '{}' against '{}': {}", relative, base, e))
        })?;

        let same_origin = url.scheme() == base.scheme()
            && url.host_str() == base.host_str()
            && url.port_or_known_default() == base.port_or_known_default();
        if !same_origin || !url.path().starts_with(base.path()) {
            return Err(Wis2Error::validation(format!(
                "path '{}' escapes baseUrl '{}'",
                relative, base
            )));
        }

        Ok(url)
    }
}

/// A decoded file-availability notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Broker topic the notification was published on
    pub topic: String,

    /// Time the notification was received and decoded
    pub received: DateTime<Utc>,

    /// Origin tag (the broker the notification came from)
    pub source: String,

    pub payload: WisPayload,
}

/// Everything a worker needs to download and verify a notification's file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: Url,
    pub name: String,
    pub method: IntegrityMethod,
}

impl Notification {
    /// Check the notification is actionable and work out where to fetch from.
    pub fn validate(&self) -> Result<DownloadTarget> {
        let method = self.payload.integrity.validate()?;
        let url = self.payload.resolve_url()?;
        let name = self.payload.file_name()?.to_string();
        Ok(DownloadTarget { url, name, method })
    }
}

/// Treat an explicit JSON `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

mod base64_value {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(text.trim())
            .map_err(|e| serde::de::Error::custom(format!("could not decode base64 integrity value: {}", e)))
    }
}
