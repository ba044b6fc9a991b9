//! Static, read-only explanations for the raw values the probes collect.
//! Everything here is a table lookup or a string heuristic; nothing touches
//! the network, so enrichment can run on any aggregate, degraded or not.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::models::{AggregateResult, CipherBreakdown};

/// One explainable value and the text shown for it.
struct Explanation<K: 'static> {
    key: K,
    text: &'static str,
}

static HEADER_EXPLANATIONS: &[Explanation<&str>] = &[
    Explanation {
        key: "Server",
        text: "Reveals the software used by the web server (e.g., Nginx, Apache). Attackers use this to find specific vulnerabilities.",
    },
    Explanation {
        key: "X-Powered-By",
        text: "Indicates the technology stack (e.g., PHP, Express). Hiding this reduces the attack surface.",
    },
    Explanation {
        key: "Strict-Transport-Security",
        text: "Enforces the use of HTTPS. Prevents downgrade attacks where a hacker forces a user to use HTTP.",
    },
    Explanation {
        key: "Content-Security-Policy",
        text: "A powerful allow-list for content sources. Prevents Cross-Site Scripting (XSS) attacks.",
    },
    Explanation {
        key: "X-Frame-Options",
        text: "Prevents 'Clickjacking' attacks by stopping the site from being embedded in an iframe.",
    },
    Explanation {
        key: "Set-Cookie",
        text: "Delivers a small piece of data to be stored by the browser. Secure flags are crucial here.",
    },
];

static PORT_EXPLANATIONS: &[Explanation<u16>] = &[
    Explanation {
        key: 21,
        text: "FTP (File Transfer Protocol). Unencrypted file transfer. Highly insecure.",
    },
    Explanation {
        key: 22,
        text: "SSH (Secure Shell). Encrypted remote login. The standard for server administration.",
    },
    Explanation {
        key: 25,
        text: "SMTP (Simple Mail Transfer Protocol). Used for sending emails.",
    },
    Explanation {
        key: 53,
        text: "DNS (Domain Name System). Translates domain names to IP addresses.",
    },
    Explanation {
        key: 80,
        text: "HTTP (HyperText Transfer Protocol). Unencrypted web traffic. Vulnerable to eavesdropping.",
    },
    Explanation {
        key: 443,
        text: "HTTPS (HTTP Secure). Encrypted web traffic using TLS/SSL. The standard for secure web browsing.",
    },
    Explanation {
        key: 8080,
        text: "Alternative HTTP port. Often used for web proxies or caching servers.",
    },
    Explanation {
        key: 8443,
        text: "Alternative HTTPS port. Often used for management interfaces or Tomcat servers.",
    },
];

static COOKIE_FLAG_EXPLANATIONS: &[Explanation<&str>] = &[
    Explanation {
        key: "Secure",
        text: "Ensures the cookie is only sent over encrypted (HTTPS) connections. Prevents theft via packet sniffing.",
    },
    Explanation {
        key: "HttpOnly",
        text: "Prevents JavaScript from accessing the cookie. Crucial defense against XSS cookie theft.",
    },
    Explanation {
        key: "SameSite",
        text: "Controls when cookies are sent with cross-site requests. Protects against CSRF attacks.",
    },
];

/// Cookie flags attached to every session layer.
const EDUCATED_COOKIE_FLAGS: [&str; 2] = ["Secure", "HttpOnly"];

const GENERIC_HEADER: &str = "A standard HTTP header used for metadata exchange.";
const GENERIC_PORT: &str =
    "A network port used for specific services. Non-standard ports may indicate custom applications.";
const GENERIC_COOKIE_FLAG: &str = "A security attribute for cookies.";

fn lookup<K: PartialEq<Q>, Q>(table: &'static [Explanation<K>], key: &Q) -> Option<&'static str> {
    table.iter().find(|e| e.key == *key).map(|e| e.text)
}

pub fn explain_header(name: &str) -> &'static str {
    lookup(HEADER_EXPLANATIONS, &name).unwrap_or(GENERIC_HEADER)
}

pub fn explain_port(port: u16) -> &'static str {
    lookup(PORT_EXPLANATIONS, &port).unwrap_or(GENERIC_PORT)
}

pub fn explain_cookie_flag(flag: &str) -> &'static str {
    lookup(COOKIE_FLAG_EXPLANATIONS, &flag).unwrap_or(GENERIC_COOKIE_FLAG)
}

// --- Cipher Suites ---

/// Splits a suite name such as `TLS_AES_128_GCM_SHA256` or
/// `ECDHE-RSA-AES128-GCM-SHA256` into readable parts. Categories that no
/// heuristic recognizes are reported as `Unknown`; an empty name yields `None`.
pub fn decode_cipher_suite(suite: &str, bits: Option<u16>) -> Option<CipherBreakdown> {
    let suite = suite.trim();
    if suite.is_empty() {
        return None;
    }
    let normalized = suite.to_ascii_uppercase().replace('_', "-");
    let has = |needle: &str| normalized.contains(needle);

    let key_exchange = if has("ECDHE") {
        "ECDHE (Elliptic Curve Diffie-Hellman Ephemeral) - Forward Secrecy"
    } else if has("RSA") {
        "RSA - No Forward Secrecy (Older)"
    } else {
        "Unknown"
    };

    let encryption = if has("AES-128") || has("AES128") {
        "AES-128 (Advanced Encryption Standard)"
    } else if has("AES-256") || has("AES256") {
        "AES-256 (Military Grade)"
    } else if has("CHACHA20") {
        "ChaCha20 (High Performance Mobile)"
    } else {
        "Unknown"
    };

    let mode = if has("GCM") {
        Some("GCM (Galois/Counter Mode) - Authenticated Encryption")
    } else if has("CBC") {
        Some("CBC (Cipher Block Chaining) - Older, potentially vulnerable")
    } else {
        None
    };

    let mac = if has("SHA256") {
        "SHA-256"
    } else if has("SHA384") {
        "SHA-384"
    } else {
        "Unknown"
    };

    Some(CipherBreakdown {
        name: suite.to_string(),
        protocol: "TLS".to_string(),
        key_exchange: key_exchange.to_string(),
        encryption: encryption.to_string(),
        mode: mode.map(String::from),
        mac: mac.to_string(),
        strength: bits.map_or_else(|| "Unknown".to_string(), |b| format!("{}-bit", b)),
    })
}

// --- Enrichment ---

/// Attaches explanations to the aggregate in place. Degraded layers simply
/// get fewer annotations.
pub fn enrich(aggregate: &mut AggregateResult) {
    let tls = &aggregate.layer6.tls;
    aggregate.layer6.cipher_breakdown =
        tls.cipher_suite.as_deref().and_then(|suite| decode_cipher_suite(suite, tls.bits));

    aggregate.layer5.cookie_education = Some(
        EDUCATED_COOKIE_FLAGS
            .iter()
            .map(|flag| (flag.to_string(), explain_cookie_flag(flag).to_string()))
            .collect(),
    );

    aggregate.layer4.port_descriptions = Some(
        aggregate
            .layer4
            .tcp_ports
            .keys()
            .map(|&port| (port, explain_port(port).to_string()))
            .collect(),
    );

    let seen = &aggregate.layer7.http.headers;
    let header_education: BTreeMap<String, String> = seen
        .keys()
        .filter(|name| HEADER_EXPLANATIONS.iter().any(|e| e.key == name.as_str()))
        .map(|name| (name.clone(), explain_header(name).to_string()))
        .collect();
    aggregate.layer7.header_education = Some(header_education);

    debug!(
        cipher = aggregate.layer6.cipher_breakdown.is_some(),
        headers = aggregate.layer7.header_education.as_ref().map_or(0, BTreeMap::len),
        "Enrichment attached."
    );
}
