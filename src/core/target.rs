// src/core/target.rs

use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

/// Raised only when the raw input cannot be turned into a probe target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTargetError {
    #[error("URL is required")]
    Empty,
    #[error("could not parse '{input}': {reason}")]
    Unparsable { input: String, reason: String },
    #[error("'{0}' has no host")]
    MissingHost(String),
    #[error("unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),
}

/// A normalized analysis target. Built once per request and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    original_input: String,
    scheme: String,
    hostname: String,
    port: Option<u16>,
    url: Url,
}

impl Target {
    /// Normalizes a raw user string. Inputs without a scheme default to `http`.
    pub fn parse(raw: &str) -> Result<Self, InvalidTargetError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidTargetError::Empty);
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };

        let url = Url::parse(&with_scheme).map_err(|e| InvalidTargetError::Unparsable {
            input: trimmed.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = url.scheme().to_string();
        if scheme != "http" && scheme != "https" {
            return Err(InvalidTargetError::UnsupportedScheme(scheme));
        }

        let hostname = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(InvalidTargetError::MissingHost(trimmed.to_string())),
        };

        debug!(input = trimmed, %scheme, %hostname, port = ?url.port(), "Normalized target.");
        Ok(Self {
            original_input: raw.to_string(),
            scheme,
            hostname,
            port: url.port(),
            url,
        })
    }

    pub fn original_input(&self) -> &str {
        &self.original_input
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The bare host, without port or brackets.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The full URL to request, including any path the user typed.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `scheme://host[:port]` without a trailing slash.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// `https://host`, used by probes that always talk TLS on 443.
    pub fn https_root(&self) -> String {
        match self.url.host() {
            Some(Host::Ipv6(ip)) => format!("https://[{}]", ip),
            _ => format!("https://{}", self.hostname),
        }
    }
}
