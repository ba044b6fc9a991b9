// src/core/scanner/application.rs

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderMap, SERVER};
use reqwest::redirect::Policy;
use scraper::{Html, Selector};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::core::models::{
    ApplicationLayer, DnsRecords, HeaderPresence, HttpExchange, Layer, RobotsTxt, ScanResult,
};
use crate::core::scanner::{MAX_REDIRECTS, Probe, build_client};
use crate::core::target::Target;

/// Security headers every response is checked for, in reporting order.
pub const SECURITY_HEADERS: [&str; 6] = [
    "Content-Security-Policy",
    "Strict-Transport-Security",
    "X-Frame-Options",
    "X-Content-Type-Options",
    "Referrer-Policy",
    "Permissions-Policy",
];

/// Record types collected for the `dns` section.
const DNS_RECORD_TYPES: [RecordType; 5] =
    [RecordType::A, RecordType::AAAA, RecordType::CNAME, RecordType::MX, RecordType::TXT];

const ROBOTS_PREVIEW_CHARS: usize = 500;

/// Defines where a platform marker is looked for.
enum Check<'a> {
    /// Pattern in the value of a specific response header.
    Header(&'a str, &'a Lazy<Regex>),
    /// Pattern in the `content` of a `<meta name=...>` tag.
    MetaTag(&'a str, &'a Lazy<Regex>),
    /// Pattern anywhere in the response body.
    Body(&'a Lazy<Regex>),
    /// Exact name of a cookie the response set.
    CookieName(&'a str),
}

/// A rule that flags one platform when its check matches.
struct CmsRule<'a> {
    /// Key reported in the `cms` map.
    platform: &'a str,
    check: Check<'a>,
}

static RE_WORDPRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)wordpress").unwrap());
static RE_WP_CONTENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)wp-content").unwrap());
static RE_LARAVEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)laravel").unwrap());
static RE_NEXTJS_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)next\.js").unwrap());
static RE_NEXTJS_BODY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)_next").unwrap());
static RE_ANY: Lazy<Regex> = Lazy::new(|| Regex::new(r".").unwrap());

static CMS_RULES: &[CmsRule] = &[
    CmsRule { platform: "wordpress", check: Check::Body(&RE_WP_CONTENT) },
    CmsRule { platform: "wordpress", check: Check::Header("x-powered-by", &RE_WORDPRESS) },
    CmsRule { platform: "wordpress", check: Check::MetaTag("generator", &RE_WORDPRESS) },
    CmsRule { platform: "laravel", check: Check::Header("x-powered-by", &RE_LARAVEL) },
    CmsRule { platform: "laravel", check: Check::CookieName("laravel_session") },
    // `_next` also covers the `__next` root element.
    CmsRule { platform: "nextjs", check: Check::Body(&RE_NEXTJS_BODY) },
    CmsRule { platform: "nextjs", check: Check::Header("x-powered-by", &RE_NEXTJS_HEADER) },
    CmsRule { platform: "nextjs", check: Check::Header("x-nextjs-cache", &RE_ANY) },
    CmsRule { platform: "django", check: Check::CookieName("csrftoken") },
];

/// Layer 7: the HTTP exchange itself plus everything inferred from it.
pub struct ApplicationProbe {
    settings: Arc<Settings>,
}

impl ApplicationProbe {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

impl Probe for ApplicationProbe {
    type Output = ApplicationLayer;

    fn layer(&self) -> Layer {
        Layer::Application
    }

    async fn analyze(&self, target: &Target) -> ApplicationLayer {
        info!(url = %target.url(), "Starting application layer probe.");

        let (dns, fetched, robots_txt) = tokio::join!(
            lookup_records(target.hostname(), &self.settings),
            fetch_page(target, &self.settings),
            fetch_robots_txt(target, &self.settings)
        );

        let mut layer = ApplicationLayer { dns, robots_txt, ..Default::default() };
        match fetched {
            Ok(page) => {
                layer.cms = detect_cms(&page.body, &page.headers, &page.cookie_names);
                layer.security_headers = check_security_headers(&page.headers);
                layer.http = page.exchange;
            }
            Err(e) => {
                layer.http.error = Some(e.clone());
                layer.error = Some(e);
            }
        }

        info!(
            status = ?layer.http.status_code,
            cms = ?layer.cms.keys().collect::<Vec<_>>(),
            "Application layer probe finished."
        );
        layer
    }
}

/// The parts of the primary response the analysis needs beyond the
/// serialized exchange.
struct FetchedPage {
    exchange: HttpExchange,
    headers: HeaderMap,
    cookie_names: Vec<String>,
    body: String,
}

async fn fetch_page(target: &Target, settings: &Settings) -> Result<FetchedPage, String> {
    // Every hop the client follows is recorded, the final URL excluded.
    let history: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&history);
    let policy = Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        if let Ok(mut hops) = recorder.lock() {
            *hops = attempt.previous().iter().map(|url| url.to_string()).collect();
        }
        attempt.follow()
    });

    let client = build_client(settings, settings.timeouts.http, policy)?;
    let url = target.url().as_str();
    let response = client.get(url).send().await.map_err(|e| {
        error!(url, error = %e, "HTTP request failed.");
        format!("HTTP request failed: {}", e)
    })?;
    info!(status = %response.status(), final_url = %response.url(), "Received HTTP response.");

    let status_code = response.status().as_u16();
    let headers = response.headers().clone();
    let cookies: BTreeMap<String, String> = response
        .cookies()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect();
    let body = response.text().await.map_err(|e| {
        error!(error = %e, "Failed to read response body.");
        format!("Failed to read response body: {}", e)
    })?;
    debug!(bytes = body.len(), "Read response body.");

    let content_type = header_text(&headers, CONTENT_TYPE.as_str());
    let redirect_history = history.lock().map(|hops| hops.clone()).unwrap_or_default();
    let exchange = HttpExchange {
        status_code: Some(status_code),
        headers: flatten_headers(&headers),
        encoding: content_type.as_deref().and_then(charset_of),
        content_type,
        server: header_text(&headers, SERVER.as_str()),
        cookies: cookies.clone(),
        redirect_history,
        error: None,
    };

    Ok(FetchedPage {
        exchange,
        headers,
        cookie_names: cookies.into_keys().collect(),
        body,
    })
}

async fn lookup_records(host: &str, settings: &Settings) -> DnsRecords {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return DnsRecords::default();
    }

    let mut opts = ResolverOpts::default();
    opts.timeout = settings.timeouts.dns;
    opts.attempts = 1;
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

    let answers = join_all(
        DNS_RECORD_TYPES
            .iter()
            .map(|&record_type| lookup_record(&resolver, host, record_type)),
    )
    .await;

    collect_answers(DNS_RECORD_TYPES.into_iter().zip(answers))
}

/// Keeps the types that answered and the first resolver failure.
fn collect_answers(answers: impl IntoIterator<Item = (RecordType, ScanResult<Vec<String>>)>) -> DnsRecords {
    let mut dns = DnsRecords::default();
    for (record_type, answer) in answers {
        match answer {
            Ok(Some(values)) => {
                dns.records.insert(record_type.to_string(), values);
            }
            Ok(None) => {}
            Err(e) => {
                dns.error.get_or_insert(e);
            }
        }
    }
    dns
}

async fn lookup_record(
    resolver: &TokioAsyncResolver,
    host: &str,
    record_type: RecordType,
) -> ScanResult<Vec<String>> {
    debug!(host, %record_type, "Looking up DNS records.");
    match resolver.lookup(host, record_type).await {
        Ok(lookup) => {
            let values: Vec<String> = lookup
                .iter()
                .filter(|rdata| rdata.record_type() == record_type)
                .map(|rdata| rdata.to_string())
                .collect();
            Ok((!values.is_empty()).then_some(values))
        }
        Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(None),
        Err(e) => {
            warn!(host, %record_type, error = %e, "DNS lookup failed.");
            Err(format!("DNS Error: {}", e))
        }
    }
}

async fn fetch_robots_txt(target: &Target, settings: &Settings) -> RobotsTxt {
    let robots_url = format!("{}/robots.txt", target.origin());
    let client = match build_client(settings, settings.timeouts.robots, Policy::default()) {
        Ok(client) => client,
        Err(_) => return RobotsTxt { error: Some("Failed to fetch".to_string()), ..Default::default() },
    };

    match client.get(&robots_url).send().await {
        Ok(response) if response.status().as_u16() == 200 => match response.text().await {
            Ok(text) => RobotsTxt {
                present: true,
                content: Some(truncate_preview(&text)),
                url: Some(robots_url),
                ..Default::default()
            },
            Err(e) => {
                debug!(url = %robots_url, error = %e, "robots.txt body unreadable.");
                RobotsTxt { error: Some("Failed to fetch".to_string()), ..Default::default() }
            }
        },
        Ok(response) => RobotsTxt { status: Some(response.status().as_u16()), ..Default::default() },
        Err(e) => {
            debug!(url = %robots_url, error = %e, "robots.txt request failed.");
            RobotsTxt { error: Some("Failed to fetch".to_string()), ..Default::default() }
        }
    }
}

/// Keeps the first 500 characters and marks the cut with an ellipsis.
pub fn truncate_preview(text: &str) -> String {
    if text.chars().count() > ROBOTS_PREVIEW_CHARS {
        let head: String = text.chars().take(ROBOTS_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Applies the CMS rule table. Only matched platforms are returned.
pub fn detect_cms(body: &str, headers: &HeaderMap, cookie_names: &[String]) -> BTreeMap<String, bool> {
    let document = Html::parse_document(body);
    let mut found = BTreeMap::new();

    for rule in CMS_RULES {
        if found.contains_key(rule.platform) {
            continue;
        }
        let matched = match &rule.check {
            Check::Header(name, re) => header_text(headers, name).is_some_and(|v| re.is_match(&v)),
            Check::MetaTag(name, re) => meta_content(&document, name).is_some_and(|c| re.is_match(&c)),
            Check::Body(re) => re.is_match(body),
            Check::CookieName(name) => cookie_names.iter().any(|c| c == name),
        };
        if matched {
            debug!(platform = rule.platform, "CMS rule matched.");
            found.insert(rule.platform.to_string(), true);
        }
    }
    found
}

fn meta_content(document: &Html, name: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[name='{}']", name)).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(String::from)
}

/// Reports presence and value of each header in `SECURITY_HEADERS`.
pub fn check_security_headers(headers: &HeaderMap) -> BTreeMap<String, HeaderPresence> {
    SECURITY_HEADERS
        .iter()
        .map(|name| {
            let value = header_text(headers, &name.to_ascii_lowercase());
            debug!(header_name = name, present = value.is_some(), "Checked security header.");
            (name.to_string(), HeaderPresence { present: value.is_some(), value })
        })
        .collect()
}

/// Header value as text; repeated headers are joined with `, ` and non-UTF-8
/// values are replaced by a marker.
fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .map(|v| v.to_str().unwrap_or("[Invalid UTF-8]"))
        .collect();
    (!values.is_empty()).then(|| values.join(", "))
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .filter_map(|name| {
            header_text(headers, name.as_str()).map(|value| (canonical_header_name(name.as_str()), value))
        })
        .collect()
}

/// `content-type` -> `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim().eq_ignore_ascii_case("charset").then(|| value.trim().trim_matches('"').to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::canned;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.append(name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn all_security_headers_present() {
        let map = headers(&[
            ("content-security-policy", "default-src 'self'"),
            ("strict-transport-security", "max-age=31536000"),
            ("x-frame-options", "DENY"),
            ("x-content-type-options", "nosniff"),
            ("referrer-policy", "no-referrer"),
            ("permissions-policy", "camera=()"),
        ]);
        let report = check_security_headers(&map);
        assert_eq!(report.len(), 6);
        assert!(report.values().all(|h| h.present));
        assert_eq!(report["X-Frame-Options"].value.as_deref(), Some("DENY"));
    }

    #[test]
    fn missing_security_headers_are_reported_absent() {
        let report = check_security_headers(&headers(&[("x-frame-options", "SAMEORIGIN")]));
        assert_eq!(report.len(), 6);
        assert_eq!(report.values().filter(|h| !h.present).count(), 5);
        assert_eq!(report["Referrer-Policy"], HeaderPresence { present: false, value: None });
    }

    #[test]
    fn detects_wordpress_from_body() {
        let body = r#"<html><link href="/wp-content/themes/x/style.css"></html>"#;
        let cms = detect_cms(body, &HeaderMap::new(), &[]);
        assert_eq!(cms.keys().collect::<Vec<_>>(), vec!["wordpress"]);
    }

    #[test]
    fn detects_wordpress_from_generator_meta() {
        let body = r#"<html><head><meta name="generator" content="WordPress 6.5"></head></html>"#;
        assert!(detect_cms(body, &HeaderMap::new(), &[]).contains_key("wordpress"));
    }

    #[test]
    fn multiple_platforms_can_coexist() {
        let body = r#"<div id="__next"></div>"#;
        let map = headers(&[("x-powered-by", "Laravel")]);
        let cookies = vec!["csrftoken".to_string()];
        let cms = detect_cms(body, &map, &cookies);
        assert_eq!(cms.keys().collect::<Vec<_>>(), vec!["django", "laravel", "nextjs"]);
        assert!(cms.values().all(|v| *v));
    }

    #[test]
    fn laravel_session_cookie() {
        let cms = detect_cms("<html></html>", &HeaderMap::new(), &["laravel_session".to_string()]);
        assert!(cms.contains_key("laravel"));
    }

    #[test]
    fn plain_page_has_no_cms() {
        assert!(detect_cms("<html><body>hello</body></html>", &HeaderMap::new(), &[]).is_empty());
    }

    #[test]
    fn robots_preview_is_truncated() {
        let long = "a".repeat(501);
        let preview = truncate_preview(&long);
        assert_eq!(preview.len(), 503);
        assert!(preview.ends_with("..."));
        assert_eq!(truncate_preview("User-agent: *"), "User-agent: *");
        assert_eq!(truncate_preview(&"b".repeat(500)), "b".repeat(500));
    }

    #[test]
    fn header_names_are_canonicalized() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("server"), "Server");
        assert_eq!(canonical_header_name("x-xss-protection"), "X-Xss-Protection");
    }

    #[test]
    fn repeated_headers_are_joined() {
        let map = headers(&[("vary", "Accept"), ("vary", "Origin"), ("server", "nginx")]);
        let flat = flatten_headers(&map);
        assert_eq!(flat["Vary"], "Accept, Origin");
        assert_eq!(flat["Server"], "nginx");
    }

    #[test]
    fn charset_from_content_type() {
        assert_eq!(charset_of("text/html; charset=UTF-8").as_deref(), Some("UTF-8"));
        assert_eq!(charset_of("text/html; Charset=\"iso-8859-1\"").as_deref(), Some("iso-8859-1"));
        assert_eq!(charset_of("application/json"), None);
    }

    #[test]
    fn dns_failure_is_a_single_error_string() {
        let dns = collect_answers([
            (RecordType::A, Ok(Some(vec!["93.184.216.34".to_string()]))),
            (RecordType::AAAA, Ok(None)),
            (RecordType::MX, Err("DNS Error: request timed out".to_string())),
            (RecordType::TXT, Err("DNS Error: connection refused".to_string())),
        ]);

        assert_eq!(dns.records.keys().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(dns.error.as_deref(), Some("DNS Error: request timed out"));
        assert_eq!(
            serde_json::to_value(&dns).unwrap(),
            serde_json::json!({ "A": ["93.184.216.34"], "error": "DNS Error: request timed out" })
        );
    }

    #[tokio::test]
    async fn redirect_chain_is_recorded_in_order() {
        let addr = canned::serve(vec![
            ("/", canned::response(302, &[("Location", "/a")], "")),
            ("/a", canned::response(301, &[("Location", "/b")], "")),
            (
                "/b",
                canned::response(
                    200,
                    &[
                        ("Content-Type", "text/html; charset=utf-8"),
                        ("X-Frame-Options", "DENY"),
                        ("Set-Cookie", "csrftoken=t0k; Path=/"),
                    ],
                    "<html><body>landed</body></html>",
                ),
            ),
        ])
        .await;
        let target = Target::parse(&format!("http://{}/", addr)).unwrap();

        let page = fetch_page(&target, &Settings::default()).await.unwrap();

        assert_eq!(
            page.exchange.redirect_history,
            vec![format!("http://{}/", addr), format!("http://{}/a", addr)]
        );
        assert_eq!(page.exchange.status_code, Some(200));
        assert_eq!(page.exchange.encoding.as_deref(), Some("utf-8"));
        assert_eq!(page.exchange.headers["X-Frame-Options"], "DENY");
        assert_eq!(page.exchange.cookies["csrftoken"], "t0k");
        assert_eq!(page.cookie_names, vec!["csrftoken".to_string()]);
        assert!(page.body.contains("landed"));
    }

    #[tokio::test]
    async fn robots_txt_present() {
        let addr = canned::serve(vec![(
            "/robots.txt",
            canned::response(200, &[("Content-Type", "text/plain")], "User-agent: *\nDisallow: /admin"),
        )])
        .await;
        let target = Target::parse(&format!("http://{}/", addr)).unwrap();

        let robots = fetch_robots_txt(&target, &Settings::default()).await;

        assert!(robots.present);
        assert_eq!(robots.content.as_deref(), Some("User-agent: *\nDisallow: /admin"));
        assert_eq!(robots.url, Some(format!("http://{}/robots.txt", addr)));
        assert_eq!(robots.status, None);
        assert_eq!(robots.error, None);
    }

    #[tokio::test]
    async fn robots_txt_missing_keeps_the_status() {
        let addr = canned::serve(Vec::new()).await;
        let target = Target::parse(&format!("http://{}/", addr)).unwrap();

        let robots = fetch_robots_txt(&target, &Settings::default()).await;

        assert_eq!(robots, RobotsTxt { status: Some(404), ..Default::default() });
    }

    #[tokio::test]
    async fn robots_txt_unreachable_is_a_fetch_error() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = Target::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();

        let robots = fetch_robots_txt(&target, &Settings::default()).await;

        assert_eq!(robots, RobotsTxt { error: Some("Failed to fetch".to_string()), ..Default::default() });
    }
}
