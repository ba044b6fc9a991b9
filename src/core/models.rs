// src/core/models.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::{Display, EnumIter, IntoEnumIterator};

// --- Reusable Result Types ---

/// Outcome of a single fallible sub-operation inside a probe: a value, a
/// legitimate absence, or the error text that replaced it.
pub type ScanResult<T> = Result<Option<T>, String>;

/// Shared behaviour of every per-layer record.
///
/// A record can always be produced in a degraded form that carries nothing
/// but an error, which is how the orchestrator fills a layer whose probe did
/// not finish in time.
pub trait LayerReport: Default {
    fn degraded(reason: impl Into<String>) -> Self {
        let mut report = Self::default();
        report.set_error(reason.into());
        report
    }

    fn error(&self) -> Option<&str>;

    fn set_error(&mut self, reason: String);
}

macro_rules! impl_layer_report {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl LayerReport for $ty {
                fn error(&self) -> Option<&str> {
                    self.error.as_deref()
                }

                fn set_error(&mut self, reason: String) {
                    self.error = Some(reason);
                }
            }
        )+
    };
}

// --- Core Analysis Models ---

/// The pseudo-OSI layer a probe, finding or journey step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum Layer {
    #[strum(serialize = "Layer 7 (Application)")]
    Application,
    #[strum(serialize = "Layer 6 (Presentation)")]
    Presentation,
    #[strum(serialize = "Layer 5 (Session)")]
    Session,
    #[strum(serialize = "Layer 4 (Transport)")]
    Transport,
    #[strum(serialize = "Layer 3 (Network)")]
    Network,
    #[strum(serialize = "Layer 1-2 (Physical/Data Link)")]
    PhysicalLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// A single scored observation produced by the risk engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
    pub penalty: i32,
}

impl Finding {
    pub fn new(severity: Severity, message: impl Into<String>, penalty: i32) -> Self {
        Self { severity, message: message.into(), penalty }
    }
}

/// Letter-grade bucket derived from the final clamped score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum RiskLevel {
    #[serde(rename = "A+ (Excellent)")]
    #[strum(serialize = "A+ (Excellent)")]
    Excellent,
    #[serde(rename = "A (Good)")]
    #[strum(serialize = "A (Good)")]
    Good,
    #[serde(rename = "B (Fair)")]
    #[strum(serialize = "B (Fair)")]
    Fair,
    #[serde(rename = "C (Warning)")]
    #[strum(serialize = "C (Warning)")]
    Warning,
    #[serde(rename = "D (High Risk)")]
    #[strum(serialize = "D (High Risk)")]
    HighRisk,
    #[serde(rename = "F (Critical)")]
    #[strum(serialize = "F (Critical)")]
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => RiskLevel::Excellent,
            80..=89 => RiskLevel::Good,
            70..=79 => RiskLevel::Fair,
            60..=69 => RiskLevel::Warning,
            50..=59 => RiskLevel::HighRisk,
            _ => RiskLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreReport {
    pub score: u8,
    pub findings: Vec<Finding>,
    pub summary: Vec<String>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyStep {
    pub step: u8,
    pub title: String,
    pub layer: String,
    pub description: String,
}

// --- Layer 7: Application ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPresence {
    pub present: bool,
    pub value: Option<String>,
}

/// Everything captured from the primary GET against the target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpExchange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub encoding: Option<String>,
    pub content_type: Option<String>,
    pub server: Option<String>,
    pub redirect_history: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsTxt {
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Record type (`A`, `MX`, ...) to the answers found for it, plus the first
/// resolver failure under `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecords {
    #[serde(flatten)]
    pub records: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationLayer {
    pub dns: DnsRecords,
    pub http: HttpExchange,
    /// Only detected platforms are listed, always mapped to `true`.
    pub cms: BTreeMap<String, bool>,
    pub security_headers: BTreeMap<String, HeaderPresence>,
    pub robots_txt: RobotsTxt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_education: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// --- Layer 6: Presentation ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsInfo {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher_suite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub san: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TlsInfo {
    pub fn invalid(error: impl Into<String>) -> Self {
        Self { valid: false, error: Some(error.into()), ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    pub gzip: bool,
    pub br: bool,
    pub deflate: bool,
}

/// Human-readable decomposition of a negotiated cipher suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherBreakdown {
    pub name: String,
    pub protocol: String,
    pub key_exchange: String,
    pub encryption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub mac: String,
    pub strength: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresentationLayer {
    pub tls: TlsInfo,
    pub compression: Compression,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher_breakdown: Option<CipherBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// --- Layer 5: Session ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieInfo {
    pub secure: bool,
    pub httponly: bool,
    pub domain: Option<String>,
    pub path: Option<String>,
    /// Unix seconds, UTC.
    pub expires: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLayer {
    pub keep_alive: bool,
    pub cookies: BTreeMap<String, CookieInfo>,
    pub websocket_support: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_education: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// --- Layer 4: Transport ---

/// Reachability of a single TCP port. Serialized as the plain status text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortStatus {
    Open,
    ClosedFiltered,
    Error(String),
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatus::Open => write!(f, "Open"),
            PortStatus::ClosedFiltered => write!(f, "Closed/Filtered"),
            PortStatus::Error(e) => write!(f, "Error: {}", e),
        }
    }
}

impl From<PortStatus> for String {
    fn from(status: PortStatus) -> Self {
        status.to_string()
    }
}

impl From<String> for PortStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Open" => PortStatus::Open,
            "Closed/Filtered" => PortStatus::ClosedFiltered,
            other => PortStatus::Error(other.strip_prefix("Error: ").unwrap_or(other).to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportLayer {
    pub tcp_ports: BTreeMap<u16, PortStatus>,
    pub udp_quic: String,
    /// Milliseconds, `-1.0` when no handshake succeeded.
    pub latency_tcp_handshake: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_descriptions: Option<BTreeMap<u16, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for TransportLayer {
    fn default() -> Self {
        Self {
            tcp_ports: BTreeMap::new(),
            udp_quic: QUIC_UNKNOWN.to_string(),
            latency_tcp_handshake: -1.0,
            port_descriptions: None,
            error: None,
        }
    }
}

pub const QUIC_UNKNOWN: &str = "Unknown - check the Alt-Svc header in the Application layer";

// --- Layer 3: Network ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geolocation {
    pub country: String,
    pub city: String,
    pub asn: String,
}

impl Default for Geolocation {
    fn default() -> Self {
        Self {
            country: "Unknown (GeoIP DB missing)".to_string(),
            city: "Unknown".to_string(),
            asn: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerouteHop {
    pub hop: u8,
    pub ip: String,
    pub rtt: String,
}

impl TracerouteHop {
    pub fn skipped() -> Self {
        Self { hop: 1, ip: "Traceroute skipped for speed".to_string(), rtt: "0ms".to_string() }
    }
}

pub const CDN_UNKNOWN: &str = "Unknown";
pub const CDN_DIRECT: &str = "Unknown / Direct";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkLayer {
    pub ip_address: Option<String>,
    pub geolocation: Geolocation,
    /// Milliseconds, `-1.0` when the ping failed.
    pub ping_latency: f64,
    pub traceroute: Vec<TracerouteHop>,
    pub cdn_detection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for NetworkLayer {
    fn default() -> Self {
        Self {
            ip_address: None,
            geolocation: Geolocation::default(),
            ping_latency: -1.0,
            traceroute: vec![TracerouteHop::skipped()],
            cdn_detection: CDN_UNKNOWN.to_string(),
            error: None,
        }
    }
}

// --- Layer 1-2: Physical / Data Link ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub mac: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub gateway_ip: String,
    pub interface: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicalLinkLayer {
    pub interfaces: BTreeMap<String, InterfaceInfo>,
    pub default_gateway: Option<Gateway>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl_layer_report!(
    ApplicationLayer,
    PresentationLayer,
    SessionLayer,
    TransportLayer,
    NetworkLayer,
    PhysicalLinkLayer,
);

// --- Main Report ---

/// The merged output of all six probes. Every layer is always present, a
/// degraded layer simply carries its `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateResult {
    pub layer7: ApplicationLayer,
    pub layer6: PresentationLayer,
    pub layer5: SessionLayer,
    pub layer4: TransportLayer,
    pub layer3: NetworkLayer,
    pub layer1_2: PhysicalLinkLayer,
    /// Unix seconds (UTC) at which the probes were joined.
    pub timestamp: f64,
}

impl AggregateResult {
    pub fn layer_error(&self, layer: Layer) -> Option<&str> {
        match layer {
            Layer::Application => self.layer7.error(),
            Layer::Presentation => self.layer6.error(),
            Layer::Session => self.layer5.error(),
            Layer::Transport => self.layer4.error(),
            Layer::Network => self.layer3.error(),
            Layer::PhysicalLink => self.layer1_2.error(),
        }
    }

    /// Layers whose record carries an error, top of the stack first.
    pub fn degraded_layers(&self) -> Vec<Layer> {
        Layer::iter().filter(|&layer| self.layer_error(layer).is_some()).collect()
    }
}

/// The unit returned across the system boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub aggregate: AggregateResult,
    pub ai_analysis: ScoreReport,
    pub journey: Vec<JourneyStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub url: String,
}
