// src/core/journey.rs

use crate::core::models::{AggregateResult, JourneyStep, Layer};

/// Narrates the request lifecycle in five fixed steps, filling in whatever
/// the probes measured. Missing values fall back to neutral wording.
pub fn generate(aggregate: &AggregateResult) -> Vec<JourneyStep> {
    let http = &aggregate.layer7.http;
    let server = http.server.as_deref().unwrap_or("Target Server");
    let status = http.status_code.map_or_else(|| "unknown".to_string(), |code| code.to_string());
    let ip = aggregate.layer3.ip_address.as_deref().unwrap_or("Unknown IP");
    let tls_version = aggregate.layer6.tls.version.as_deref().unwrap_or("TLS");
    let latency = aggregate.layer4.latency_tcp_handshake;

    let steps = [
        (
            "User Initiates Request",
            Layer::Application,
            "You entered the URL. The browser checks its cache and prepares a request.".to_string(),
        ),
        (
            "DNS Resolution",
            Layer::Network,
            format!("Your computer asked a DNS server to find the IP address for the domain. It returned {}.", ip),
        ),
        (
            "TCP Handshake",
            Layer::Transport,
            format!(
                "A connection was established with the server using a 3-way handshake (SYN, SYN-ACK, ACK). This took {}ms.",
                latency
            ),
        ),
        (
            "TLS Encryption",
            Layer::Presentation,
            format!("The browser and server agreed on encryption keys using {} to secure your data.", tls_version),
        ),
        (
            "HTTP Request/Response",
            Layer::Application,
            format!(
                "Your browser sent a GET request. The server ({}) processed it and sent back a {} response.",
                server, status
            ),
        ),
    ];

    steps
        .into_iter()
        .zip(1u8..)
        .map(|((title, layer, description), step)| JourneyStep {
            step,
            title: title.to_string(),
            layer: layer.to_string(),
            description,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::TlsInfo;

    #[test]
    fn five_steps_even_when_everything_degraded() {
        let journey = generate(&AggregateResult::default());
        assert_eq!(journey.len(), 5);
        assert_eq!(journey.iter().map(|s| s.step).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert!(journey[1].description.contains("Unknown IP"));
        assert!(journey[3].description.contains("using TLS to"));
        assert!(journey[4].description.contains("(Target Server)"));
        assert!(journey[4].description.contains("a unknown response"));
    }

    #[test]
    fn steps_embed_measured_values() {
        let mut aggregate = AggregateResult::default();
        aggregate.layer3.ip_address = Some("93.184.216.34".into());
        aggregate.layer4.latency_tcp_handshake = 12.5;
        aggregate.layer6.tls = TlsInfo { valid: true, version: Some("TLSv1.3".into()), ..Default::default() };
        aggregate.layer7.http.server = Some("nginx".into());
        aggregate.layer7.http.status_code = Some(200);

        let journey = generate(&aggregate);
        assert_eq!(journey[0].layer, "Layer 7 (Application)");
        assert_eq!(journey[1].layer, "Layer 3 (Network)");
        assert_eq!(journey[2].layer, "Layer 4 (Transport)");
        assert_eq!(journey[3].layer, "Layer 6 (Presentation)");
        assert!(journey[1].description.ends_with("It returned 93.184.216.34."));
        assert!(journey[2].description.ends_with("This took 12.5ms."));
        assert!(journey[3].description.contains("TLSv1.3"));
        assert_eq!(
            journey[4].description,
            "Your browser sent a GET request. The server (nginx) processed it and sent back a 200 response."
        );
    }
}
