// src/core/scanner/session.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{CONNECTION, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Response, Version};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;
use crate::core::models::{CookieInfo, Layer, SessionLayer};
use crate::core::scanner::{MAX_REDIRECTS, Probe, build_client};
use crate::core::target::Target;

/// Layer 5: connection persistence and cookie hygiene.
pub struct SessionProbe {
    settings: Arc<Settings>,
}

impl SessionProbe {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

impl Probe for SessionProbe {
    type Output = SessionLayer;

    fn layer(&self) -> Layer {
        Layer::Session
    }

    async fn analyze(&self, target: &Target) -> SessionLayer {
        let url = target.url().as_str();
        info!(url, "Starting session layer probe.");

        // Redirects are walked by hand so cookies set on every hop are seen.
        let client = match build_client(&self.settings, self.settings.timeouts.session, Policy::none()) {
            Ok(client) => client,
            Err(e) => return SessionLayer { error: Some(e), ..Default::default() },
        };

        let keep_alive = match client.head(url).send().await {
            Ok(response) => {
                let connection = response.headers().get(CONNECTION).and_then(|v| v.to_str().ok());
                infer_keep_alive(response.version(), connection)
            }
            Err(e) => {
                debug!(url, error = %e, "HEAD request failed, assuming no keep-alive.");
                false
            }
        };

        let (cookies, error) = match harvest_cookies(&client, target.url()).await {
            Ok(cookies) => (cookies, None),
            Err(e) => {
                warn!(url, error = %e, "Cookie analysis request failed.");
                (BTreeMap::new(), Some(format!("Cookie analysis failed: {}", e)))
            }
        };

        info!(keep_alive, cookies = cookies.len(), "Session layer probe finished.");
        SessionLayer {
            keep_alive,
            cookies,
            // Upgrading an arbitrary root path is too intrusive to try.
            websocket_support: false,
            cookie_education: None,
            error,
        }
    }
}

/// Keep-alive is explicit through `Connection`, or implied by HTTP/1.1 unless
/// the server asked to close. HTTP/2 and later always multiplex one
/// persistent connection.
pub fn infer_keep_alive(version: Version, connection: Option<&str>) -> bool {
    let connection = connection.unwrap_or_default().to_ascii_lowercase();
    if connection.contains("keep-alive") {
        return true;
    }
    if connection.contains("close") {
        return false;
    }
    version == Version::HTTP_11 || version == Version::HTTP_2 || version == Version::HTTP_3
}

/// GETs `start` and follows up to `MAX_REDIRECTS` `Location` hops, merging
/// the cookies each response sets. A later hop overrides an earlier cookie of
/// the same name.
async fn harvest_cookies(client: &Client, start: &Url) -> Result<BTreeMap<String, CookieInfo>, reqwest::Error> {
    let mut cookies = BTreeMap::new();
    let mut url = start.clone();

    for _ in 0..=MAX_REDIRECTS {
        let response = client.get(url.clone()).send().await?;
        cookies.extend(collect_cookies(&response));

        if !response.status().is_redirection() {
            break;
        }
        let next = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| response.url().join(location).ok());
        match next {
            Some(next) => {
                debug!(from = %url, to = %next, "Following redirect for cookies.");
                url = next;
            }
            None => break,
        }
    }
    Ok(cookies)
}

fn collect_cookies(response: &Response) -> BTreeMap<String, CookieInfo> {
    response
        .cookies()
        .map(|cookie| {
            let info = CookieInfo {
                secure: cookie.secure(),
                httponly: cookie.http_only(),
                domain: cookie.domain().map(String::from),
                path: cookie.path().map(String::from),
                expires: cookie.expires().map(|at| DateTime::<Utc>::from(at).timestamp()),
            };
            debug!(name = cookie.name(), ?info, "Captured cookie.");
            (cookie.name().to_string(), info)
        })
        .collect()
}
