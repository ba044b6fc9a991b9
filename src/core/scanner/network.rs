// src/core/scanner/network.rs

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::core::models::{
    CDN_DIRECT, CDN_UNKNOWN, Geolocation, Layer, NetworkLayer, ScanResult, TracerouteHop,
};
use crate::core::scanner::Probe;
use crate::core::target::Target;

/// Reverse-DNS name fragments and the provider each one points to. The first
/// matching fragment wins.
const CDN_FRAGMENTS: &[(&str, &str)] = &[
    ("cloudflare", "Cloudflare"),
    ("akamai", "Akamai"),
    ("google", "Google Cloud"),
    ("aws", "AWS"),
    ("amazon", "AWS"),
];

/// Layer 3: address resolution, latency, CDN heuristic and geolocation.
pub struct NetworkProbe {
    settings: Arc<Settings>,
}

impl NetworkProbe {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

impl Probe for NetworkProbe {
    type Output = NetworkLayer;

    fn layer(&self) -> Layer {
        Layer::Network
    }

    async fn analyze(&self, target: &Target) -> NetworkLayer {
        let host = target.hostname();
        info!(host, "Starting network layer probe.");

        let mut opts = ResolverOpts::default();
        opts.timeout = self.settings.timeouts.dns;
        opts.attempts = 1;
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

        let geolocation = geolocate(&self.settings);
        let ip = match resolve_ip(&resolver, host).await {
            Ok(Some(ip)) => ip,
            Ok(None) => {
                return NetworkLayer {
                    geolocation,
                    error: Some(format!("No address records found for {}", host)),
                    ..Default::default()
                };
            }
            Err(e) => {
                return NetworkLayer { geolocation, error: Some(e), ..Default::default() };
            }
        };

        let (ping_latency, cdn_detection) = tokio::join!(
            ping_host(ip, &self.settings),
            detect_cdn(&resolver, ip)
        );

        info!(%ip, ping_latency, cdn = %cdn_detection, "Network layer probe finished.");
        NetworkLayer {
            ip_address: Some(ip.to_string()),
            geolocation,
            ping_latency,
            traceroute: vec![TracerouteHop::skipped()],
            cdn_detection,
            error: None,
        }
    }
}

async fn resolve_ip(resolver: &TokioAsyncResolver, host: &str) -> ScanResult<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(Some(ip));
    }
    debug!(host, "Resolving host address.");
    match resolver.lookup_ip(host).await {
        Ok(lookup) => {
            // Prefer IPv4, it is what most ping binaries handle without flags.
            let mut addresses: Vec<IpAddr> = lookup.iter().collect();
            addresses.sort_by_key(|ip| ip.is_ipv6());
            Ok(addresses.into_iter().next())
        }
        Err(e) => {
            warn!(host, error = %e, "Address resolution failed.");
            Err(format!("DNS resolution failed: {}", e))
        }
    }
}

/// Times one ICMP echo through the system `ping` binary. Returns `-1.0` on
/// any failure, including the timeout.
async fn ping_host(ip: IpAddr, settings: &Settings) -> f64 {
    let count_flag = if cfg!(windows) { "-n" } else { "-c" };
    let address = ip.to_string();
    let mut command = Command::new("ping");
    command
        .args([count_flag, "1", address.as_str()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let started = Instant::now();
    match timeout(settings.timeouts.ping, command.status()).await {
        Ok(Ok(status)) if status.success() => round_ms(started.elapsed().as_secs_f64() * 1000.0),
        Ok(Ok(status)) => {
            debug!(%ip, code = ?status.code(), "Ping exited unsuccessfully.");
            -1.0
        }
        Ok(Err(e)) => {
            warn!(%ip, error = %e, "Could not run ping.");
            -1.0
        }
        Err(_) => {
            debug!(%ip, "Ping timed out.");
            -1.0
        }
    }
}

async fn detect_cdn(resolver: &TokioAsyncResolver, ip: IpAddr) -> String {
    match resolver.reverse_lookup(ip).await {
        Ok(lookup) => {
            let names: Vec<String> = lookup.iter().map(|name| name.to_string()).collect();
            debug!(%ip, ?names, "Reverse lookup answered.");
            names
                .iter()
                .find_map(|name| classify_cdn(name))
                .unwrap_or(CDN_DIRECT)
                .to_string()
        }
        Err(e) => {
            debug!(%ip, error = %e, "Reverse lookup failed.");
            CDN_UNKNOWN.to_string()
        }
    }
}

/// Maps a reverse-DNS name to a known CDN provider.
pub fn classify_cdn(reverse_name: &str) -> Option<&'static str> {
    let lowered = reverse_name.to_ascii_lowercase();
    CDN_FRAGMENTS
        .iter()
        .find(|(fragment, _)| lowered.contains(fragment))
        .map(|(_, provider)| *provider)
}

/// True when `label` names one of the providers `classify_cdn` can return.
pub fn is_known_cdn(label: &str) -> bool {
    CDN_FRAGMENTS.iter().any(|(_, provider)| *provider == label)
}

fn geolocate(settings: &Settings) -> Geolocation {
    match &settings.geoip_database {
        // The database path is accepted but never read; lookups stay unknown.
        Some(path) => {
            debug!(path = %path.display(), "GeoIP database configured but lookups are not supported.");
            Geolocation { country: "Unknown (GeoIP lookup not supported)".to_string(), ..Default::default() }
        }
        None => Geolocation::default(),
    }
}

fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_providers() {
        assert_eq!(classify_cdn("104-16-1-1.cloudflare.com."), Some("Cloudflare"));
        assert_eq!(classify_cdn("a23-1-2-3.deploy.static.AKAMAITECHNOLOGIES.com."), Some("Akamai"));
        assert_eq!(classify_cdn("lhr25s01-in-f14.1e100.net.google.com."), Some("Google Cloud"));
        assert_eq!(classify_cdn("ec2-3-3-3-3.compute-1.amazonaws.com."), Some("AWS"));
        assert_eq!(classify_cdn("server-1.cloudfront.amazon.com."), Some("AWS"));
        assert_eq!(classify_cdn("mail.example.org."), None);
    }

    #[test]
    fn first_fragment_wins() {
        assert_eq!(classify_cdn("cloudflare.google.example."), Some("Cloudflare"));
    }

    #[test]
    fn known_cdn_labels() {
        assert!(is_known_cdn("AWS"));
        assert!(is_known_cdn("Cloudflare"));
        assert!(!is_known_cdn(CDN_DIRECT));
        assert!(!is_known_cdn(CDN_UNKNOWN));
    }

    #[test]
    fn geolocation_is_a_placeholder() {
        let mut settings = Settings::default();
        assert_eq!(geolocate(&settings).country, "Unknown (GeoIP DB missing)");
        settings.geoip_database = Some("/var/lib/geoip.mmdb".into());
        assert_eq!(geolocate(&settings).country, "Unknown (GeoIP lookup not supported)");
    }

    #[test]
    fn latency_is_rounded_to_two_decimals() {
        assert_eq!(round_ms(12.3456), 12.35);
        assert_eq!(round_ms(0.001), 0.0);
    }

    #[tokio::test]
    async fn literal_ip_skips_resolution() {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        let ip = resolve_ip(&resolver, "192.0.2.7").await.unwrap();
        assert_eq!(ip, Some("192.0.2.7".parse().unwrap()));
    }
}
