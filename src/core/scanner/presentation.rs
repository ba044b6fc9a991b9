// src/core/scanner/presentation.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use reqwest::redirect::Policy;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, ProtocolVersion, RootCertStore};
use tracing::{debug, error, info};
use x509_parser::prelude::*;

use crate::config::Settings;
use crate::core::models::{Compression, Layer, PresentationLayer, TlsInfo};
use crate::core::scanner::{Probe, build_client};
use crate::core::target::Target;

/// Layer 6: TLS negotiation, certificate details and content encoding.
pub struct PresentationProbe {
    settings: Arc<Settings>,
}

impl PresentationProbe {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

impl Probe for PresentationProbe {
    type Output = PresentationLayer;

    fn layer(&self) -> Layer {
        Layer::Presentation
    }

    async fn analyze(&self, target: &Target) -> PresentationLayer {
        let host = target.hostname();
        info!(host, "Starting presentation layer probe.");

        let (tls, compression) = tokio::join!(
            analyze_tls(host, &self.settings),
            check_compression(target, &self.settings)
        );

        info!(valid = tls.valid, version = ?tls.version, ?compression, "Presentation layer probe finished.");
        PresentationLayer { tls, compression, cipher_breakdown: None, error: None }
    }
}

async fn analyze_tls(host: &str, settings: &Settings) -> TlsInfo {
    match timeout(settings.timeouts.tls, perform_tls_handshake(host)).await {
        Ok(Ok(info)) => info,
        Ok(Err(e)) => TlsInfo::invalid(e),
        Err(_) => {
            debug!(host, "TLS handshake timed out.");
            TlsInfo::invalid(format!("TLS handshake with {}:443 timed out", host))
        }
    }
}

/// Connects to port 443 with full certificate verification and reads back
/// what the server negotiated.
async fn perform_tls_handshake(host: &str) -> Result<TlsInfo, String> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let roots = RootCertStore { roots: webpki_roots::TLS_SERVER_ROOTS.to_vec() };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("TLS configuration error: {}", e))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| format!("Invalid TLS server name '{}': {}", host, e))?;

    debug!(host, "Connecting TCP stream to port 443.");
    let stream = TcpStream::connect((host, 443)).await.map_err(|e| {
        error!(host, error = %e, "TCP connection failed");
        format!("TCP Connection Error: {}", e)
    })?;

    debug!(host, "Performing TLS handshake.");
    let tls_stream = connector.connect(server_name, stream).await.map_err(|e| {
        error!(host, error = %e, "TLS handshake failed");
        format!("TLS Handshake Error: {}", e)
    })?;

    let (_, session) = tls_stream.get_ref();
    let version = session.protocol_version().map(protocol_label);
    let cipher_suite = session
        .negotiated_cipher_suite()
        .map(|suite| cipher_suite_name(&format!("{:?}", suite.suite())));
    let bits = cipher_suite.as_deref().and_then(cipher_bits);

    let leaf = session
        .peer_certificates()
        .and_then(|chain| chain.first())
        .ok_or_else(|| "Server did not provide a certificate.".to_string())?;
    let certificate = describe_certificate(leaf.as_ref(), Utc::now())?;

    info!(host, ?version, ?cipher_suite, issuer = ?certificate.issuer, "TLS handshake succeeded.");
    Ok(TlsInfo {
        valid: true,
        protocol: version.clone(),
        version,
        cipher_suite,
        bits,
        issuer: certificate.issuer,
        expiry: Some(certificate.not_after.format("%b %d %H:%M:%S %Y GMT").to_string()),
        days_remaining: Some(certificate.days_remaining),
        san: certificate.san,
        error: None,
    })
}

struct CertificateSummary {
    issuer: Option<String>,
    san: Vec<String>,
    not_after: DateTime<Utc>,
    days_remaining: i64,
}

fn describe_certificate(der: &[u8], now: DateTime<Utc>) -> Result<CertificateSummary, String> {
    let (_, x509) = parse_x509_certificate(der).map_err(|e| {
        error!(error = %e, "Failed to parse X.509 certificate");
        format!("X.509 Parse Error: {}", e)
    })?;

    let issuer = x509
        .issuer()
        .iter_organization()
        .chain(x509.issuer().iter_common_name())
        .find_map(|attr| attr.as_str().ok())
        .map(String::from);

    let san = match x509.subject_alternative_name() {
        Ok(Some(extension)) => extension
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            debug!(error = %e, "Could not read the subjectAltName extension.");
            Vec::new()
        }
    };

    let not_after = asn1_time_to_chrono_utc(&x509.validity().not_after);
    Ok(CertificateSummary {
        issuer,
        san,
        not_after,
        days_remaining: days_until(not_after, now),
    })
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

/// Whole days between `now` and `not_after`, truncated toward zero.
pub fn days_until(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    not_after.signed_duration_since(now).num_days()
}

pub fn protocol_label(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::SSLv3 => "SSLv3".to_string(),
        ProtocolVersion::TLSv1_0 => "TLSv1.0".to_string(),
        ProtocolVersion::TLSv1_1 => "TLSv1.1".to_string(),
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        other => format!("{:?}", other),
    }
}

/// Turns the library's suite identifier into the IANA-style name,
/// e.g. `TLS13_AES_256_GCM_SHA384` into `TLS_AES_256_GCM_SHA384`.
pub fn cipher_suite_name(debug_name: &str) -> String {
    match debug_name.strip_prefix("TLS13_") {
        Some(rest) => format!("TLS_{}", rest),
        None => debug_name.to_string(),
    }
}

/// Symmetric key size implied by the suite name.
pub fn cipher_bits(suite: &str) -> Option<u16> {
    let normalized = suite.to_ascii_uppercase().replace('-', "_");
    if normalized.contains("AES_128") || normalized.contains("AES128") {
        Some(128)
    } else if normalized.contains("AES_256") || normalized.contains("AES256") || normalized.contains("CHACHA20") {
        Some(256)
    } else {
        None
    }
}

async fn check_compression(target: &Target, settings: &Settings) -> Compression {
    let url = target.https_root();
    let client = match build_client(settings, settings.timeouts.compression, Policy::default()) {
        Ok(client) => client,
        Err(_) => return Compression::default(),
    };

    match client.head(&url).header(ACCEPT_ENCODING, "gzip, br, deflate").send().await {
        Ok(response) => {
            let encoding = response
                .headers()
                .get(CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            debug!(url, encoding, "Compression check answered.");
            compression_from(encoding)
        }
        Err(e) => {
            debug!(url, error = %e, "Compression check failed.");
            Compression::default()
        }
    }
}

pub fn compression_from(content_encoding: &str) -> Compression {
    let lowered = content_encoding.to_ascii_lowercase();
    Compression {
        gzip: lowered.contains("gzip"),
        br: lowered.contains("br"),
        deflate: lowered.contains("deflate"),
    }
}
