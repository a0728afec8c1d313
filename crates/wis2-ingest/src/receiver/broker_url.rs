//! Broker URL parsing and normalization

use std::fmt;

use url::{Host, Url};

use crate::error::ReceiverError;

/// Default port for plain MQTT
pub const DEFAULT_TCP_PORT: u16 = 1883;

/// Default port for MQTT over TLS
pub const DEFAULT_SSL_PORT: u16 = 8883;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Ssl,
}

impl BrokerScheme {
    pub fn default_port(self) -> u16 {
        match self {
            BrokerScheme::Tcp => DEFAULT_TCP_PORT,
            BrokerScheme::Ssl => DEFAULT_SSL_PORT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BrokerScheme::Tcp => "tcp",
            BrokerScheme::Ssl => "ssl",
        }
    }
}

/// A broker address with the port always filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
}

impl BrokerUrl {
    /// Parse `tcp://host[:port]` or `ssl://host[:port]`
    pub fn parse(input: &str) -> Result<Self, ReceiverError> {
        let url = Url::parse(input.trim())
            .map_err(|e| ReceiverError::invalid_url(input, e.to_string()))?;

        let scheme = match url.scheme() {
            "tcp" => BrokerScheme::Tcp,
            "ssl" => BrokerScheme::Ssl,
            other => return Err(ReceiverError::UnsupportedScheme(other.to_string())),
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(ReceiverError::invalid_url(input, "missing host")),
        };

        Ok(Self {
            scheme,
            host,
            port: url.port().unwrap_or_else(|| scheme.default_port()),
        })
    }

    pub fn uses_tls(&self) -> bool {
        self.scheme == BrokerScheme::Ssl
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme.as_str(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
        }
    }
}

impl std::str::FromStr for BrokerUrl {
    type Err = ReceiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
