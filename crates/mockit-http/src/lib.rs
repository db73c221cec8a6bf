//! # mockit-http
//!
//! The axum binding for mockit: one `axum::Router` per live instance,
//! bound directly to its own TCP port with optional TLS/mTLS, plus the
//! control-plane REST adapter that drives `mockit_core::registry::Registry`
//! at runtime.
//!
//! Everything protocol-agnostic — matching, strategies, relay, the OAuth2
//! token cache, TLS material validation — lives in `mockit-core`. This
//! crate only knows how to turn an axum request into a
//! `mockit_core::matcher::MatchRequest` + `TemplateContext`, and a
//! `DispatchOutcome`/`Error` back into an axum `Response`.

pub mod management;
pub mod tls;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use mockit_core::config::{HttpMethod, InstanceSpec};
use mockit_core::dispatcher::{DispatchOutcome, Dispatcher};
use mockit_core::matcher::MatchRequest;
use mockit_core::oauth2_cache::TokenCache;
use mockit_core::registry::{ListenerFactory, ListenerHandle, ResolvedTls};
use mockit_core::templating::TemplateContext;
use mockit_core::{Error, Result};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Drain interval honored between the admin shutdown signal and a forced
/// close: in-flight requests get this long to finish before the listener
/// is torn down.
pub const DEFAULT_DRAIN: Duration = Duration::from_secs(5);

/// Map from instance id to its live `Dispatcher`, shared between the
/// listener factory (which populates it at bind time) and the
/// control-plane adapter (which reads/writes expectations through it).
/// The lifecycle itself — creation, deletion, port/id uniqueness — stays
/// the `Registry`'s job; this map only exists because the `Dispatcher`
/// is an HTTP-layer concern the registry never needs to see.
pub type DispatcherMap = Arc<RwLock<HashMap<String, Arc<Dispatcher>>>>;

/// Binds an axum listener per instance and installs its `Dispatcher` as
/// the request handler, implementing `mockit_core::registry::ListenerFactory`.
pub struct AxumListenerFactory {
    token_cache: Arc<TokenCache>,
    dispatchers: DispatcherMap,
}

impl AxumListenerFactory {
    /// A factory with no bound instances yet, sharing `token_cache` across all of them.
    pub fn new(token_cache: Arc<TokenCache>) -> Self {
        Self { token_cache, dispatchers: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// The shared dispatcher map, handed to the control-plane adapter so it
    /// can mutate a live instance's expectations.
    pub fn dispatchers(&self) -> DispatcherMap {
        self.dispatchers.clone()
    }

    fn dispatcher_for(&self, id: &str) -> Option<Arc<Dispatcher>> {
        self.dispatchers.read().expect("dispatcher map poisoned").get(id).cloned()
    }
}

#[async_trait]
impl ListenerFactory for AxumListenerFactory {
    async fn bind(&self, spec: &InstanceSpec, tls: Option<ResolvedTls>) -> Result<Arc<dyn ListenerHandle>> {
        let dispatcher = Arc::new(Dispatcher::new(
            spec.basic_auth.clone(),
            spec.relay_config.clone(),
            spec.global_headers.clone(),
            self.token_cache.clone(),
        ));
        self.dispatchers.write().expect("dispatcher map poisoned").insert(spec.server_id.clone(), dispatcher.clone());

        let router = Router::new()
            .fallback(any(handle_request))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(dispatcher);
        let addr = SocketAddr::from(([0, 0, 0, 0], spec.port));
        let handle = axum_server::Handle::new();
        let done = Arc::new(tokio::sync::Notify::new());

        match tls {
            Some(resolved) => {
                let rustls_config = tls::build_rustls_config(&resolved).await?;
                let server = axum_server::bind_rustls(addr, rustls_config).handle(handle.clone());
                let done = done.clone();
                tokio::spawn(async move {
                    let _ = server.serve(router.into_make_service()).await;
                    done.notify_waiters();
                });
            }
            None => {
                let server = axum_server::bind(addr).handle(handle.clone());
                let done = done.clone();
                tokio::spawn(async move {
                    let _ = server.serve(router.into_make_service()).await;
                    done.notify_waiters();
                });
            }
        }

        // Give the accept loop a moment to either bind or fail; axum-server
        // surfaces bind errors through the handle rather than the spawn.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if handle.listening().await.is_none() {
            return Err(Error::creation_failed(format!("failed to bind port {}", spec.port)));
        }

        Ok(Arc::new(AxumListenerHandle {
            handle,
            done,
            dispatchers: self.dispatchers.clone(),
            server_id: spec.server_id.clone(),
        }))
    }

    async fn set_expectations(&self, server_id: &str, expectations: Vec<mockit_core::config::Expectation>) {
        if let Some(dispatcher) = self.dispatcher_for(server_id) {
            dispatcher.set_expectations(expectations).await;
        }
    }
}

struct AxumListenerHandle {
    handle: axum_server::Handle,
    done: Arc<tokio::sync::Notify>,
    dispatchers: DispatcherMap,
    server_id: String,
}

#[async_trait]
impl ListenerHandle for AxumListenerHandle {
    async fn shutdown(&self, timeout: Duration) {
        self.handle.graceful_shutdown(Some(timeout));
        let _ = tokio::time::timeout(timeout + Duration::from_secs(1), self.done.notified()).await;
        self.dispatchers.write().expect("dispatcher map poisoned").remove(&self.server_id);
    }
}

/// The single fallback handler every instance's router installs: builds a
/// `MatchRequest` + `TemplateContext` from the axum request, runs the auth
/// gate, dispatches, and renders the outcome.
async fn handle_request(
    State(dispatcher): State<Arc<Dispatcher>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(http_method) = HttpMethod::parse(method.as_str()) else {
        return not_matched();
    };

    let authorization = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if !dispatcher.check_basic_auth(authorization) {
        return (
            StatusCode::UNAUTHORIZED,
            [("WWW-Authenticate", "Basic realm=\"mock\"")],
            axum::Json(json!({"errorCode": "UNAUTHORIZED", "message": "missing or invalid credentials"})),
        )
            .into_response();
    }

    let query_params: HashMap<String, String> =
        url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes()).into_owned().collect();
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();
    let cookies = parse_cookies(headers.get(axum::http::header::COOKIE).and_then(|v| v.to_str().ok()));
    let body_json = serde_json::from_slice::<serde_json::Value>(&body).ok();

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or_else(|| uri.path());
    let request = MatchRequest {
        method: http_method,
        path: uri.path(),
        path_and_query,
        query_params: &query_params,
        headers: &header_map,
        body: if body.is_empty() { None } else { Some(&body) },
    };
    let ctx = TemplateContext { path_variables: HashMap::new(), headers: header_map.clone(), body: body_json, cookies };

    match dispatcher.dispatch(&request, &ctx).await {
        Ok(DispatchOutcome::Response(r)) => render(r.status, r.headers, r.body),
        Ok(DispatchOutcome::NotMatched) => not_matched(),
        Err(e) => error_response(&e),
    }
}

fn parse_cookies(header: Option<&str>) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let Some(header) = header else { return cookies };
    for pair in header.split(';') {
        if let Some((k, v)) = pair.trim().split_once('=') {
            cookies.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    cookies
}

fn not_matched() -> Response {
    (StatusCode::NOT_FOUND, axum::Json(json!({"errorCode": "NOT_MATCHED"}))).into_response()
}

fn render(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Response {
    let mut builder = Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK));
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.body(axum::body::Body::from(body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Render a core `Error` as the control-plane error body: every error
/// carries a stable `errorCode` tag and the status `Error::status_code`
/// prescribes (relay failures as 502, strategy failures as 500, and so on).
pub fn error_response(error: &Error) -> Response {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "errorCode": error.error_code(),
        "message": error.to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    });
    (status, axum::Json(body)).into_response()
}
