// src/config.rs

use std::path::PathBuf;
use std::time::Duration;

/// Per-operation timeouts used by the layer probes. Each sub-operation gets a
/// single attempt bounded by its timeout.
#[derive(Debug, Clone)]
pub struct ProbeTimeouts {
    pub port_check: Duration,
    pub tcp_handshake: Duration,
    pub ping: Duration,
    pub dns: Duration,
    pub robots: Duration,
    pub compression: Duration,
    pub session: Duration,
    pub tls: Duration,
    pub http: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            port_check: Duration::from_secs(1),
            tcp_handshake: Duration::from_secs(2),
            ping: Duration::from_secs(2),
            dns: Duration::from_secs(5),
            robots: Duration::from_secs(5),
            compression: Duration::from_secs(5),
            session: Duration::from_secs(5),
            tls: Duration::from_secs(5),
            http: Duration::from_secs(10),
        }
    }
}

/// Application settings, constructed once at startup and passed down
/// explicitly.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub api_prefix: String,
    pub bind_addr: String,
    pub debug: bool,
    pub log_to_file: bool,
    pub cors_origins: Vec<String>,
    /// Overall time limit for one analysis; probes still running at the deadline
    /// are reported as degraded.
    pub analysis_deadline: Duration,
    pub geoip_database: Option<PathBuf>,
    pub user_agent: String,
    pub timeouts: ProbeTimeouts,
    /// Problems found while reading the environment, logged once logging is up.
    pub warnings: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Web OSI Intelligence Analyzer".to_string(),
            api_prefix: "/api/v1".to_string(),
            bind_addr: "0.0.0.0:8000".to_string(),
            debug: false,
            log_to_file: false,
            cors_origins: Vec::new(),
            analysis_deadline: Duration::from_secs(20),
            geoip_database: None,
            user_agent: format!("OsiLens/{}", env!("CARGO_PKG_VERSION")),
            timeouts: ProbeTimeouts::default(),
            warnings: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Unparsable values keep
    /// their default and leave a warning behind.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Settings::default();

        if let Some(name) = lookup("OSI_LENS_APP_NAME") {
            settings.app_name = name;
        }
        if let Some(prefix) = lookup("OSI_LENS_API_PREFIX") {
            settings.api_prefix = normalize_prefix(&prefix);
        }
        if let Some(addr) = lookup("OSI_LENS_BIND") {
            settings.bind_addr = addr;
        }
        if let Some(raw) = lookup("OSI_LENS_DEBUG") {
            match parse_bool(&raw) {
                Some(flag) => settings.debug = flag,
                None => settings.warnings.push(format!("OSI_LENS_DEBUG: '{}' is not a boolean", raw)),
            }
        }
        if let Some(raw) = lookup("OSI_LENS_LOG_TO_FILE") {
            match parse_bool(&raw) {
                Some(flag) => settings.log_to_file = flag,
                None => settings.warnings.push(format!("OSI_LENS_LOG_TO_FILE: '{}' is not a boolean", raw)),
            }
        }
        if let Some(raw) = lookup("OSI_LENS_CORS_ORIGINS") {
            settings.cors_origins = raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(raw) = lookup("OSI_LENS_DEADLINE_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => settings.analysis_deadline = Duration::from_secs(secs),
                _ => settings
                    .warnings
                    .push(format!("OSI_LENS_DEADLINE_SECS: '{}' is not a positive integer", raw)),
            }
        }
        if let Some(path) = lookup("OSI_LENS_GEOIP_DB").filter(|p| !p.trim().is_empty()) {
            settings.geoip_database = Some(PathBuf::from(path));
        }

        settings
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Settings {
        let env: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let settings = settings_from(&[]);
        assert_eq!(settings.app_name, "Web OSI Intelligence Analyzer");
        assert_eq!(settings.api_prefix, "/api/v1");
        assert_eq!(settings.analysis_deadline, Duration::from_secs(20));
        assert!(settings.cors_origins.is_empty());
        assert!(settings.warnings.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let settings = settings_from(&[
            ("OSI_LENS_APP_NAME", "Lens"),
            ("OSI_LENS_API_PREFIX", "api/v2/"),
            ("OSI_LENS_DEBUG", "yes"),
            ("OSI_LENS_CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("OSI_LENS_DEADLINE_SECS", "7"),
        ]);
        assert_eq!(settings.app_name, "Lens");
        assert_eq!(settings.api_prefix, "/api/v2");
        assert!(settings.debug);
        assert_eq!(settings.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(settings.analysis_deadline, Duration::from_secs(7));
    }

    #[test]
    fn bad_values_keep_defaults_and_warn() {
        let settings = settings_from(&[("OSI_LENS_DEBUG", "maybe"), ("OSI_LENS_DEADLINE_SECS", "0")]);
        assert!(!settings.debug);
        assert_eq!(settings.analysis_deadline, Duration::from_secs(20));
        assert_eq!(settings.warnings.len(), 2);
    }
}
