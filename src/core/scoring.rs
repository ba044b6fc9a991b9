// src/core/scoring.rs

use tracing::{debug, info};

use crate::core::models::{AggregateResult, Finding, PortStatus, RiskLevel, ScoreReport, Severity};
use crate::core::scanner::application::SECURITY_HEADERS;
use crate::core::scanner::network::is_known_cdn;

const STARTING_SCORE: i32 = 100;
const CDN_BONUS: i32 = 5;
const NON_STANDARD_PORTS: [u16; 2] = [8080, 8443];

/// Running score plus the findings that moved it. A finding and its penalty
/// are always recorded together.
#[derive(Debug)]
struct Ledger {
    score: i32,
    findings: Vec<Finding>,
}

impl Ledger {
    fn new() -> Self {
        Self { score: STARTING_SCORE, findings: Vec::new() }
    }

    fn add(&mut self, severity: Severity, message: impl Into<String>, penalty: i32) {
        let finding = Finding::new(severity, message, penalty);
        debug!(severity = %finding.severity, penalty, message = %finding.message, "Finding recorded.");
        self.score -= penalty;
        self.findings.push(finding);
    }

    fn bonus(&mut self, points: i32) {
        self.score += points;
    }
}

type RuleGroup = fn(&AggregateResult, &mut Ledger);

/// Evaluated in this order; findings keep it.
const RULE_GROUPS: [RuleGroup; 5] = [
    application_rules,
    presentation_rules,
    session_rules,
    transport_rules,
    network_rules,
];

/// Scores an aggregate. Pure: the same aggregate always yields the same report.
pub fn evaluate(aggregate: &AggregateResult) -> ScoreReport {
    let ledger = RULE_GROUPS.iter().fold(Ledger::new(), |mut ledger, rules| {
        rules(aggregate, &mut ledger);
        ledger
    });

    let score = ledger.score.clamp(0, 100) as u8;
    let risk_level = RiskLevel::from_score(score);
    let summary = summarize(score, risk_level, &ledger.findings);

    info!(score, %risk_level, findings = ledger.findings.len(), "Risk evaluation complete.");
    ScoreReport { score, findings: ledger.findings, summary, risk_level }
}

// --- Rule Groups ---

fn application_rules(aggregate: &AggregateResult, ledger: &mut Ledger) {
    let layer = &aggregate.layer7;

    // An empty table means the page never loaded; nothing is known about headers.
    for header in SECURITY_HEADERS {
        if layer.security_headers.get(header).is_some_and(|h| !h.present) {
            ledger.add(Severity::Medium, format!("Missing security headers: {}", header), 5);
        }
    }

    if !layer.cms.is_empty() {
        let platforms: Vec<&str> = layer.cms.keys().map(String::as_str).collect();
        ledger.add(
            Severity::Info,
            format!("CMS Detected: {}. Ensure it is patched.", platforms.join(", ")),
            0,
        );
        if layer.cms.contains_key("wordpress") {
            ledger.add(Severity::Low, "WordPress detected. frequent target for bots.", 2);
        }
    }

    if let Some(server) = layer.http.headers.get("Server") {
        ledger.add(Severity::Low, format!("Server header leaked: {}", server), 2);
    }
}

fn presentation_rules(aggregate: &AggregateResult, ledger: &mut Ledger) {
    let tls = &aggregate.layer6.tls;
    if !tls.valid {
        ledger.add(Severity::Critical, "TLS Certificate is invalid or missing.", 50);
        return;
    }

    if let Some(version) = tls.version.as_deref() {
        if version.contains("TLSv1.0") || version.contains("TLSv1.1") {
            ledger.add(Severity::High, format!("Deprecated TLS version detected: {}", version), 30);
        } else if !version.contains("TLSv1.3") && !version.contains("TLSv1.2") {
            ledger.add(Severity::Medium, format!("Older TLS version: {}", version), 10);
        }
    }

    match tls.days_remaining {
        Some(days) if days < 7 => {
            ledger.add(Severity::High, format!("Certificate expires in {} days.", days), 20)
        }
        Some(days) if days < 30 => {
            ledger.add(Severity::Medium, format!("Certificate expires soon ({} days).", days), 10)
        }
        _ => {}
    }
}

fn session_rules(aggregate: &AggregateResult, ledger: &mut Ledger) {
    for (name, cookie) in &aggregate.layer5.cookies {
        if !cookie.secure {
            ledger.add(Severity::Medium, format!("Cookie '{}' missing 'Secure' flag.", name), 10);
        }
        if !cookie.httponly {
            ledger.add(Severity::Low, format!("Cookie '{}' missing 'HttpOnly' flag.", name), 5);
        }
    }
}

fn transport_rules(aggregate: &AggregateResult, ledger: &mut Ledger) {
    for (&port, status) in &aggregate.layer4.tcp_ports {
        if *status != PortStatus::Open {
            continue;
        }
        if NON_STANDARD_PORTS.contains(&port) {
            ledger.add(Severity::Low, format!("Non-standard port {} is open.", port), 5);
        }
        if port == 80 {
            ledger.add(Severity::Info, "Port 80 (HTTP) is open. Ensure redirect to HTTPS.", 0);
        }
    }
}

fn network_rules(aggregate: &AggregateResult, ledger: &mut Ledger) {
    let cdn = aggregate.layer3.cdn_detection.as_str();
    // A failed reverse lookup counts the same as a direct origin.
    if is_known_cdn(cdn) {
        ledger.add(
            Severity::Info,
            format!("Traffic routed through {} CDN. This provides DDoS protection.", cdn),
            0,
        );
        ledger.bonus(CDN_BONUS);
    } else {
        ledger.add(Severity::Low, "No CDN detected. Origin IP might be exposed.", 5);
    }
}

// --- Summary ---

fn summarize(score: u8, risk_level: RiskLevel, findings: &[Finding]) -> Vec<String> {
    let mut summary = vec![format!(
        "Target analysis completed with a Security Score of {}/100 ({}).",
        score, risk_level
    )];

    let urgent: Vec<&str> = findings
        .iter()
        .filter(|f| f.severity >= Severity::High)
        .take(2)
        .map(|f| f.message.as_str())
        .collect();
    if !urgent.is_empty() {
        summary.push(format!("CRITICAL ATTENTION REQUIRED: {}.", urgent.join("; ")));
    }

    if score > 80 {
        summary.push(
            "The target demonstrates strong security posture with modern encryption and security headers."
                .to_string(),
        );
    } else {
        summary.push(
            "Several configuration hardening opportunities were identified across the OSI stack.".to_string(),
        );
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{CDN_DIRECT, CookieInfo, HeaderPresence, TlsInfo};

    fn headers(present: bool) -> std::collections::BTreeMap<String, HeaderPresence> {
        SECURITY_HEADERS
            .iter()
            .map(|name| {
                let value = present.then(|| "set".to_string());
                (name.to_string(), HeaderPresence { present, value })
            })
            .collect()
    }

    fn modern_tls(days: i64) -> TlsInfo {
        TlsInfo {
            valid: true,
            version: Some("TLSv1.3".into()),
            protocol: Some("TLSv1.3".into()),
            cipher_suite: Some("TLS_AES_256_GCM_SHA384".into()),
            days_remaining: Some(days),
            ..Default::default()
        }
    }

    fn hardened_target() -> AggregateResult {
        let mut aggregate = AggregateResult::default();
        aggregate.layer7.security_headers = headers(true);
        aggregate.layer6.tls = modern_tls(200);
        aggregate.layer4.tcp_ports = [(80, PortStatus::ClosedFiltered), (443, PortStatus::Open)].into();
        aggregate.layer3.cdn_detection = "Cloudflare".into();
        aggregate
    }

    fn neglected_target() -> AggregateResult {
        let mut aggregate = AggregateResult::default();
        aggregate.layer7.security_headers = headers(false);
        aggregate.layer6.tls = TlsInfo { version: Some("TLSv1.0".into()), ..modern_tls(200) };
        aggregate.layer5.cookies =
            [("session".to_string(), CookieInfo { secure: false, httponly: false, ..Default::default() })].into();
        aggregate.layer3.cdn_detection = CDN_DIRECT.into();
        aggregate
    }

    fn count(report: &ScoreReport, severity: Severity) -> usize {
        report.findings.iter().filter(|f| f.severity == severity).count()
    }

    #[test]
    fn hardened_target_scores_excellent() {
        let report = evaluate(&hardened_target());
        assert!(report.score >= 95, "score {}", report.score);
        assert_eq!(report.risk_level, RiskLevel::Excellent);
        assert_eq!(count(&report, Severity::Medium), 0);
        assert_eq!(report.summary.len(), 2);
        assert!(report.summary[1].contains("strong security posture"));
    }

    #[test]
    fn neglected_target_scores_failing() {
        let report = evaluate(&neglected_target());
        assert!(report.score < 50);
        assert!(matches!(report.risk_level, RiskLevel::HighRisk | RiskLevel::Critical));
        assert!(report.findings.iter().any(|f| f.severity == Severity::High
            && f.message.starts_with("Deprecated TLS version")));
        assert!(report.findings.iter().any(|f| f.severity == Severity::Medium
            && f.message.starts_with("Missing security headers")));
        assert!(report.summary[1].starts_with("CRITICAL ATTENTION REQUIRED: Deprecated TLS version detected: TLSv1.0"));
    }

    #[test]
    fn invalid_tls_short_circuits_version_and_expiry() {
        let mut aggregate = hardened_target();
        aggregate.layer6.tls = TlsInfo {
            version: Some("TLSv1.0".into()),
            days_remaining: Some(1),
            ..TlsInfo::invalid("handshake failed")
        };
        let report = evaluate(&aggregate);

        let critical: Vec<_> = report.findings.iter().filter(|f| f.severity == Severity::Critical).collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].penalty, 50);
        assert!(!report.findings.iter().any(|f| f.message.contains("TLS version") || f.message.contains("expires")));
    }

    #[test]
    fn unrecognized_tls_versions_are_medium() {
        let tls_findings = |version: &str| {
            let mut aggregate = hardened_target();
            aggregate.layer6.tls = TlsInfo { version: Some(version.into()), ..modern_tls(200) };
            evaluate(&aggregate)
                .findings
                .into_iter()
                .filter(|f| f.message.contains("TLS version"))
                .map(|f| (f.severity, f.penalty, f.message))
                .collect::<Vec<_>>()
        };

        assert_eq!(
            tls_findings("SSLv3"),
            vec![(Severity::Medium, 10, "Older TLS version: SSLv3".to_string())]
        );
        assert_eq!(
            tls_findings("TLSv1.4?"),
            vec![(Severity::Medium, 10, "Older TLS version: TLSv1.4?".to_string())]
        );
        assert_eq!(
            tls_findings("TLSv1.1"),
            vec![(Severity::High, 30, "Deprecated TLS version detected: TLSv1.1".to_string())]
        );
        assert!(tls_findings("TLSv1.2").is_empty());
    }

    #[test]
    fn one_medium_finding_per_missing_header() {
        let mut aggregate = hardened_target();
        aggregate.layer7.security_headers = headers(true);
        aggregate.layer7.security_headers.insert(
            "X-Frame-Options".into(),
            HeaderPresence { present: false, value: None },
        );
        aggregate.layer7.security_headers.insert(
            "Referrer-Policy".into(),
            HeaderPresence { present: false, value: None },
        );
        let report = evaluate(&aggregate);

        let missing: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.message.starts_with("Missing security headers"))
            .collect();
        assert_eq!(missing.len(), 2);
        assert!(missing.iter().all(|f| f.severity == Severity::Medium && f.penalty == 5));
        assert_eq!(missing[0].message, "Missing security headers: X-Frame-Options");
        assert_eq!(missing[1].message, "Missing security headers: Referrer-Policy");

        let all_missing = evaluate(&neglected_target());
        assert_eq!(
            all_missing.findings.iter().filter(|f| f.message.starts_with("Missing security headers")).count(),
            6
        );
    }

    #[test]
    fn degraded_aggregate_is_scored_without_faulting() {
        let report = evaluate(&AggregateResult::default());
        // Invalid TLS and no CDN are the only things known.
        assert_eq!(report.score, 45);
        assert_eq!(report.risk_level, RiskLevel::Critical);
        assert_eq!(report.findings.len(), 2);
    }

    #[test]
    fn expiry_thresholds() {
        let expiring = |days| {
            let mut aggregate = hardened_target();
            aggregate.layer6.tls = modern_tls(days);
            evaluate(&aggregate)
                .findings
                .into_iter()
                .find(|f| f.message.contains("expires"))
        };
        assert_eq!(expiring(6).map(|f| (f.severity, f.penalty)), Some((Severity::High, 20)));
        assert_eq!(expiring(7).map(|f| (f.severity, f.penalty)), Some((Severity::Medium, 10)));
        assert_eq!(expiring(29).map(|f| f.message), Some("Certificate expires soon (29 days).".to_string()));
        assert!(expiring(30).is_none());
    }

    #[test]
    fn score_stays_within_bounds() {
        let mut worst = neglected_target();
        worst.layer6.tls = TlsInfo::invalid("gone");
        for i in 0..20 {
            worst.layer5.cookies.insert(format!("c{}", i), CookieInfo::default());
        }
        let report = evaluate(&worst);
        assert_eq!(report.score, 0);
        assert_eq!(report.risk_level, RiskLevel::Critical);

        let best = evaluate(&hardened_target());
        assert!(best.score <= 100);
    }

    #[test]
    fn wordpress_and_open_ports() {
        let mut aggregate = hardened_target();
        aggregate.layer7.cms = [("wordpress".to_string(), true)].into();
        aggregate.layer4.tcp_ports =
            [(80, PortStatus::Open), (443, PortStatus::Open), (8080, PortStatus::Open)].into();
        let report = evaluate(&aggregate);

        let messages: Vec<&str> = report.findings.iter().map(|f| f.message.as_str()).collect();
        assert!(messages.contains(&"CMS Detected: wordpress. Ensure it is patched."));
        assert!(messages.contains(&"WordPress detected. frequent target for bots."));
        assert!(messages.contains(&"Port 80 (HTTP) is open. Ensure redirect to HTTPS."));
        assert!(messages.contains(&"Non-standard port 8080 is open."));
        // 100 - 2 (wordpress) - 5 (8080) + 5 (cdn)
        assert_eq!(report.score, 98);
    }
}
