// src/core/scanner/transport.rs

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::Settings;
use crate::core::models::{Layer, PortStatus, QUIC_UNKNOWN, TransportLayer};
use crate::core::scanner::Probe;
use crate::core::target::Target;

/// Ports probed on every target.
pub const PROBED_PORTS: [u16; 4] = [80, 443, 8080, 8443];

/// Layer 4: TCP reachability and handshake latency.
pub struct TransportProbe {
    settings: Arc<Settings>,
}

impl TransportProbe {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

impl Probe for TransportProbe {
    type Output = TransportLayer;

    fn layer(&self) -> Layer {
        Layer::Transport
    }

    async fn analyze(&self, target: &Target) -> TransportLayer {
        let host = target.hostname();
        info!(host, "Starting transport layer probe.");
        let timeouts = &self.settings.timeouts;

        let (tcp_ports, latency_tcp_handshake) = tokio::join!(
            check_ports(host, &PROBED_PORTS, timeouts.port_check),
            measure_handshake(host, timeouts.tcp_handshake)
        );

        // When every port errored out the host itself was unusable.
        let error = tcp_ports
            .values()
            .all(|status| matches!(status, PortStatus::Error(_)))
            .then(|| format!("No TCP port on {} could be probed", host));

        info!(?tcp_ports, latency_tcp_handshake, "Transport layer probe finished.");
        TransportLayer {
            tcp_ports,
            udp_quic: QUIC_UNKNOWN.to_string(),
            latency_tcp_handshake,
            port_descriptions: None,
            error,
        }
    }
}

/// Connects to every port concurrently, each bounded by its own timeout.
async fn check_ports(host: &str, ports: &[u16], limit: Duration) -> BTreeMap<u16, PortStatus> {
    let checks = ports.iter().map(|&port| async move { (port, check_port(host, port, limit).await) });
    join_all(checks).await.into_iter().collect()
}

async fn check_port(host: &str, port: u16, limit: Duration) -> PortStatus {
    let status = match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => PortStatus::Open,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => PortStatus::ClosedFiltered,
        Ok(Err(e)) => PortStatus::Error(e.to_string()),
        Err(_) => PortStatus::ClosedFiltered,
    };
    debug!(host, port, %status, "Port checked.");
    status
}

/// Times a bare TCP handshake, on 443 first and 80 as the fallback.
/// Returns `-1.0` when neither port accepts a connection.
async fn measure_handshake(host: &str, limit: Duration) -> f64 {
    for port in [443u16, 80] {
        let started = Instant::now();
        match timeout(limit, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => {
                let ms = started.elapsed().as_secs_f64() * 1000.0;
                debug!(host, port, ms, "TCP handshake completed.");
                return (ms * 100.0).round() / 100.0;
            }
            Ok(Err(e)) => debug!(host, port, error = %e, "TCP handshake failed."),
            Err(_) => debug!(host, port, "TCP handshake timed out."),
        }
    }
    -1.0
}
