//! Per-Instance Dispatcher: the protocol-agnostic request-in/response-out
//! flow shared by every bound instance — auth gate, relay short-circuit,
//! matching, strategy execution, and global-header merge.

use crate::config::{BasicAuthConfig, Expectation, GlobalHeader, RelayConfig};
use crate::matcher::{self, MatchRequest};
use crate::oauth2_cache::TokenCache;
use crate::relay;
use crate::strategy::{self, RenderedResponse, StrategyOutcome};
use crate::templating::TemplateContext;
use base64::Engine as _;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Response body kinds a Dispatcher can hand back: either a plain rendered
/// response or one the relay produced, both already status+headers+body.
pub enum DispatchOutcome {
    Response(RenderedResponse),
    /// No instance-level relay and no expectation matched.
    NotMatched,
}

/// Holds one instance's live, swappable configuration. Expectations are
/// republished as a whole new `Vec` on every write, so a request in flight
/// always observes one consistent snapshot for its duration.
pub struct Dispatcher {
    basic_auth: Option<BasicAuthConfig>,
    instance_relay: Option<RelayConfig>,
    global_headers: Vec<GlobalHeader>,
    expectations: RwLock<Arc<Vec<Expectation>>>,
    token_cache: Arc<TokenCache>,
}

impl Dispatcher {
    /// Build a dispatcher for one instance, starting with no expectations installed.
    pub fn new(
        basic_auth: Option<BasicAuthConfig>,
        instance_relay: Option<RelayConfig>,
        global_headers: Vec<GlobalHeader>,
        token_cache: Arc<TokenCache>,
    ) -> Self {
        Self { basic_auth, instance_relay, global_headers, expectations: RwLock::new(Arc::new(Vec::new())), token_cache }
    }

    /// Replace the full expectation set with a new snapshot.
    pub async fn set_expectations(&self, expectations: Vec<Expectation>) {
        *self.expectations.write().await = Arc::new(expectations);
    }

    /// The currently installed expectation snapshot.
    pub async fn expectations(&self) -> Arc<Vec<Expectation>> {
        self.expectations.read().await.clone()
    }

    /// Check an `Authorization: Basic ...` header against configured
    /// credentials. Returns `true` when no basic auth is configured.
    pub fn check_basic_auth(&self, authorization_header: Option<&str>) -> bool {
        let Some(auth) = &self.basic_auth else { return true };
        let Some(header) = authorization_header else { return false };
        let Some(encoded) = header.strip_prefix("Basic ") else { return false };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else { return false };
        let Ok(decoded) = String::from_utf8(decoded) else { return false };
        match decoded.split_once(':') {
            Some((user, pass)) => user == auth.username && pass == auth.password,
            None => false,
        }
    }

    /// Run the full dispatch flow for a single request, short of the
    /// auth gate (callers check [`check_basic_auth`] first so they can
    /// render the 401 with their own HTTP types).
    pub async fn dispatch(&self, request: &MatchRequest<'_>, ctx: &TemplateContext) -> crate::Result<DispatchOutcome> {
        if let Some(relay_cfg) = &self.instance_relay {
            let relayed = self.invoke_relay(relay_cfg, request).await?;
            return Ok(DispatchOutcome::Response(relayed));
        }

        let expectations = self.expectations().await;
        let Some(matched) = matcher::find_match(&expectations, request) else {
            return Ok(DispatchOutcome::NotMatched);
        };

        let mut ctx = ctx.clone();
        ctx.path_variables = matched.path_variables.clone();

        let outcome = strategy::execute(&matched.expectation.response, &ctx).await?;
        match outcome {
            StrategyOutcome::Rendered(mut rendered) => {
                merge_global_headers(&mut rendered, &self.global_headers);
                Ok(DispatchOutcome::Response(rendered))
            }
            // Relay responses bypass global-header merging entirely.
            StrategyOutcome::Relay(relay_cfg) => {
                let relayed = self.invoke_relay(&relay_cfg, request).await?;
                Ok(DispatchOutcome::Response(relayed))
            }
        }
    }

    async fn invoke_relay(&self, relay_cfg: &RelayConfig, request: &MatchRequest<'_>) -> crate::Result<RenderedResponse> {
        let body = request.body.map(|b| b.to_vec()).unwrap_or_default();
        let response = relay::relay(
            relay_cfg,
            &self.token_cache,
            method_to_reqwest(request.method),
            request.path_and_query,
            request.headers,
            body,
        )
        .await?;
        Ok(RenderedResponse { status: response.status, headers: response.headers, body: response.body })
    }
}

fn method_to_reqwest(method: crate::config::HttpMethod) -> reqwest::Method {
    use crate::config::HttpMethod as M;
    match method {
        M::Get => reqwest::Method::GET,
        M::Post => reqwest::Method::POST,
        M::Put => reqwest::Method::PUT,
        M::Delete => reqwest::Method::DELETE,
        M::Patch => reqwest::Method::PATCH,
        M::Head => reqwest::Method::HEAD,
        M::Options => reqwest::Method::OPTIONS,
    }
}

/// Add each global header only if the response doesn't already carry one of
/// the same name, case-insensitively. Expectation-set headers always win.
fn merge_global_headers(response: &mut RenderedResponse, global_headers: &[GlobalHeader]) {
    for header in global_headers {
        let already_present = response.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(&header.name));
        if !already_present {
            response.headers.push((header.name.clone(), header.value.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Expectation, ExpectationMatch, HttpMethod, ResponseStrategy};
    use std::collections::HashMap;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(None, None, vec![], Arc::new(TokenCache::new()))
    }

    fn request<'a>(path: &'a str, headers: &'a HashMap<String, String>) -> MatchRequest<'a> {
        MatchRequest {
            method: HttpMethod::Get,
            path,
            path_and_query: path,
            query_params: &HashMap::new(),
            headers,
            body: None,
        }
    }

    #[tokio::test]
    async fn not_matched_when_no_expectation_fits() {
        let dispatcher = dispatcher();
        let headers = HashMap::new();
        let outcome = dispatcher.dispatch(&request("/missing", &headers), &TemplateContext::default()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::NotMatched));
    }

    #[tokio::test]
    async fn matched_expectation_merges_global_headers() {
        let dispatcher = Dispatcher::new(
            None,
            None,
            vec![GlobalHeader { name: "X-Global".to_string(), value: "g".to_string() }],
            Arc::new(TokenCache::new()),
        );
        dispatcher
            .set_expectations(vec![Expectation {
                match_: ExpectationMatch {
                    method: None,
                    path: "/hi".to_string(),
                    query_params: HashMap::new(),
                    headers: HashMap::new(),
                    body_predicate: None,
                },
                response: ResponseStrategy::Static { status: 200, headers: HashMap::new(), body: "ok".into() },
            }])
            .await;
        let headers = HashMap::new();
        let outcome = dispatcher.dispatch(&request("/hi", &headers), &TemplateContext::default()).await.unwrap();
        match outcome {
            DispatchOutcome::Response(r) => {
                assert!(r.headers.iter().any(|(k, v)| k == "X-Global" && v == "g"));
            }
            _ => panic!("expected response"),
        }
    }

    #[tokio::test]
    async fn expectation_header_wins_over_global_header() {
        let dispatcher = Dispatcher::new(
            None,
            None,
            vec![GlobalHeader { name: "X-Trace".to_string(), value: "global".to_string() }],
            Arc::new(TokenCache::new()),
        );
        let mut response_headers = HashMap::new();
        response_headers.insert("X-Trace".to_string(), "expectation".to_string());
        dispatcher
            .set_expectations(vec![Expectation {
                match_: ExpectationMatch {
                    method: None,
                    path: "/hi".to_string(),
                    query_params: HashMap::new(),
                    headers: HashMap::new(),
                    body_predicate: None,
                },
                response: ResponseStrategy::Static { status: 200, headers: response_headers, body: "ok".into() },
            }])
            .await;
        let headers = HashMap::new();
        let outcome = dispatcher.dispatch(&request("/hi", &headers), &TemplateContext::default()).await.unwrap();
        match outcome {
            DispatchOutcome::Response(r) => {
                let matching: Vec<_> = r.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("X-Trace")).collect();
                assert_eq!(matching.len(), 1);
                assert_eq!(matching[0].1, "expectation");
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn basic_auth_accepts_correct_credentials() {
        let dispatcher = Dispatcher::new(
            Some(BasicAuthConfig { username: "alice".to_string(), password: "secret".to_string() }),
            None,
            vec![],
            Arc::new(TokenCache::new()),
        );
        let header = format!("Basic {}", base64::engine::general_purpose::STANDARD.encode("alice:secret"));
        assert!(dispatcher.check_basic_auth(Some(&header)));
        assert!(!dispatcher.check_basic_auth(Some("Basic bm9wZQ==")));
        assert!(!dispatcher.check_basic_auth(None));
    }

    #[test]
    fn basic_auth_absent_config_allows_all() {
        let dispatcher = dispatcher();
        assert!(dispatcher.check_basic_auth(None));
    }
}
