//! Relay Engine: rewrites and forwards a request upstream, injecting an
//! OAuth2 bearer token when the relay is configured for client credentials.

use crate::config::RelayConfig;
use crate::oauth2_cache::TokenCache;
use crate::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Per-attempt upstream timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Upstream connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Headers dropped from both the inbound request (before forwarding) and the
/// upstream response (before returning to the client).
const HOP_BY_HOP: &[&str] = &["host", "connection", "content-length", "transfer-encoding", "authorization"];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// The upstream response, verbatim aside from hop-by-hop header filtering.
pub struct RelayResponse {
    /// Upstream HTTP status code.
    pub status: u16,
    /// Upstream response headers, hop-by-hop entries already stripped.
    pub headers: Vec<(String, String)>,
    /// Raw upstream response body.
    pub body: Vec<u8>,
}

/// Forward `method path+query headers body` upstream per `cfg` and return the
/// upstream response. Any failure (token fetch, connect, TLS, read) is
/// surfaced as an [`Error::RelayError`]; rendering it as HTTP 502 is the
/// Dispatcher's responsibility, not this engine's.
pub async fn relay(
    cfg: &RelayConfig,
    token_cache: &TokenCache,
    method: reqwest::Method,
    path_and_query: &str,
    headers: &HashMap<String, String>,
    body: Vec<u8>,
) -> Result<RelayResponse> {
    let url = format!("{}{}", cfg.remote_url.trim_end_matches('/'), path_and_query);

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .danger_accept_invalid_certs(cfg.ignore_ssl_errors)
        .build()
        .map_err(|e| Error::relay(format!("failed to build relay client: {e}")))?;

    let mut request = client.request(method, &url);

    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            request = request.header(name, value);
        }
    }
    if let Some(overrides) = &cfg.headers {
        for (name, value) in overrides {
            request = request.header(name, value);
        }
    }
    if cfg.has_oauth2() {
        let token = token_cache.get_token(cfg).await?;
        request = request.header("Authorization", format!("Bearer {token}"));
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let response = request.send().await.map_err(|e| Error::relay(format!("upstream request failed: {e}")))?;

    let status = response.status().as_u16();
    let response_headers = response
        .headers()
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect();
    let body = response.bytes().await.map_err(|e| Error::relay(format!("failed to read upstream body: {e}")))?;

    Ok(RelayResponse { status, headers: response_headers, body: body.to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_list_matches_spec() {
        for name in ["Host", "Connection", "Content-Length", "Transfer-Encoding", "Authorization"] {
            assert!(is_hop_by_hop(name));
        }
        assert!(!is_hop_by_hop("X-Custom"));
    }

    #[test]
    fn url_preserves_query_string() {
        let cfg = RelayConfig {
            remote_url: "http://upstream".to_string(),
            token_url: None,
            client_id: None,
            client_secret: None,
            scope: None,
            grant_type: None,
            headers: None,
            ignore_ssl_errors: false,
        };
        let url = format!("{}{}", cfg.remote_url.trim_end_matches('/'), "/foo?x=1&y=2");
        assert_eq!(url, "http://upstream/foo?x=1&y=2");
    }
}
