//! OAuth2 Token Cache: client-credentials grant, keyed by `(tokenUrl, clientId)`,
//! with single-flight coalescing of concurrent cache misses.

use crate::config::RelayConfig;
use crate::{Error, Result};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// TTL assumed when the token endpoint omits `expires_in`.
const DEFAULT_TTL_SECS: u64 = 3300;
/// Refresh guard band: refresh when `remaining < max(60s, 5% of ttl)`.
const MIN_GUARD_BAND_SECS: u64 = 60;

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    issued_at: Instant,
    ttl: Duration,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        let guard_band = Duration::from_secs(MIN_GUARD_BAND_SECS).max(self.ttl / 20);
        let remaining = self.ttl.saturating_sub(self.issued_at.elapsed());
        remaining > guard_band
    }
}

type Slot = Arc<AsyncMutex<Option<CachedToken>>>;

/// Caches access tokens per `(tokenUrl, clientId)`. A per-key [`AsyncMutex`]
/// provides single-flight semantics: concurrent misses on the same key block
/// on the in-flight fetch rather than issuing duplicate upstream calls.
pub struct TokenCache {
    slots: std::sync::Mutex<HashMap<(String, String), Slot>>,
    http: reqwest::Client,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    /// An empty cache with no cached or in-flight tokens.
    pub fn new() -> Self {
        Self { slots: std::sync::Mutex::new(HashMap::new()), http: reqwest::Client::new() }
    }

    fn slot_for(&self, token_url: &str, client_id: &str) -> Slot {
        let key = (token_url.to_string(), client_id.to_string());
        let mut slots = self.slots.lock().expect("slots mutex poisoned");
        slots.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(None))).clone()
    }

    /// Return a cached, unexpired access token for `cfg`, or fetch a fresh one.
    /// On network failure the error is surfaced to the caller unchanged and
    /// the cache is left untouched (failed fetches are never stored).
    pub async fn get_token(&self, cfg: &RelayConfig) -> Result<String> {
        let token_url =
            cfg.token_url.as_deref().ok_or_else(|| Error::relay("relay has no tokenUrl configured"))?;
        let client_id = cfg.client_id.as_deref().unwrap_or_default();

        // Recorded before the lock is acquired: any token issued at or after
        // this instant was fetched on this caller's behalf, even if its own
        // guard band has already elapsed by the time the lock is granted.
        let arrived_at = Instant::now();

        let slot = self.slot_for(token_url, client_id);
        let mut guard = slot.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.is_fresh() || cached.issued_at >= arrived_at {
                return Ok(cached.access_token.clone());
            }
        }

        let fetched = self.fetch(cfg, token_url).await?;
        let access_token = fetched.access_token.clone();
        *guard = Some(fetched);
        Ok(access_token)
    }

    /// Drop every cached token associated with this relay's token endpoint,
    /// e.g. when the owning instance is deleted.
    pub fn invalidate(&self, token_url: &str, client_id: &str) {
        let mut slots = self.slots.lock().expect("slots mutex poisoned");
        slots.remove(&(token_url.to_string(), client_id.to_string()));
    }

    async fn fetch(&self, cfg: &RelayConfig, token_url: &str) -> Result<CachedToken> {
        let client_id = ClientId::new(cfg.client_id.clone().unwrap_or_default());
        let client_secret = ClientSecret::new(cfg.client_secret.clone().unwrap_or_default());
        let auth_url = AuthUrl::new(token_url.to_string()).map_err(|e| Error::relay(e.to_string()))?;
        let token_endpoint = TokenUrl::new(token_url.to_string()).map_err(|e| Error::relay(e.to_string()))?;

        let client = BasicClient::new(client_id, Some(client_secret), auth_url, Some(token_endpoint))
            .set_auth_type(oauth2::AuthType::RequestBody);

        let mut request = client.exchange_client_credentials();
        if let Some(scope) = &cfg.scope {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        if let Some(grant_type) = &cfg.grant_type {
            if grant_type != "client_credentials" {
                request = request.add_extra_param("grant_type", grant_type.clone());
            }
        }

        let response = request
            .request_async(|req| async {
                let mut builder = self.http.request(
                    reqwest::Method::from_bytes(req.method.as_str().as_bytes())
                        .unwrap_or(reqwest::Method::POST),
                    req.url.as_str(),
                );
                for (name, value) in &req.headers {
                    builder = builder.header(name.as_str(), value.as_bytes());
                }
                let resp = builder.body(req.body).send().await?;
                let status = resp.status().as_u16();
                let headers = resp.headers().clone();
                let body = resp.bytes().await?;
                Ok::<_, reqwest::Error>(oauth2::HttpResponse {
                    status_code: oauth2::http::StatusCode::from_u16(status)
                        .unwrap_or(oauth2::http::StatusCode::INTERNAL_SERVER_ERROR),
                    headers,
                    body: body.to_vec(),
                })
            })
            .await
            .map_err(|e| Error::relay(format!("token fetch failed: {e}")))?;

        let ttl = response
            .expires_in()
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_TTL_SECS));
        Ok(CachedToken {
            access_token: response.access_token().secret().clone(),
            issued_at: Instant::now(),
            ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_respects_guard_band() {
        let fresh = CachedToken { access_token: "t".into(), issued_at: Instant::now(), ttl: Duration::from_secs(3300) };
        assert!(fresh.is_fresh());

        let stale = CachedToken {
            access_token: "t".into(),
            issued_at: Instant::now() - Duration::from_secs(3300 - 30),
            ttl: Duration::from_secs(3300),
        };
        assert!(!stale.is_fresh());
    }

    #[test]
    fn short_ttl_uses_minimum_guard_band() {
        // ttl=60s -> guard band is max(60, 3)=60s, so a 10s-old token is already stale.
        let token =
            CachedToken { access_token: "t".into(), issued_at: Instant::now() - Duration::from_secs(10), ttl: Duration::from_secs(60) };
        assert!(!token.is_fresh());
    }
}
