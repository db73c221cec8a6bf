//! The data model: instances, expectations, relay configuration, and the
//! multi-instance configuration document schema parsed by the loader.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP method an expectation may restrict on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    /// Parse from an HTTP method string, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            _ => return None,
        })
    }
}

/// Lowest and highest port an instance may bind, inclusive.
pub const MIN_PORT: u16 = 1024;
/// See [`MIN_PORT`].
pub const MAX_PORT: u16 = 65535;

/// mTLS configuration nested inside [`TlsConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct MtlsConfig {
    /// PEM-encoded CA certificate used to verify client certificates.
    #[serde(rename = "caCertificate")]
    pub ca_certificate: String,
    /// Whether the TLS handshake requires a client certificate. Defaults to `true`.
    #[serde(rename = "requireClientAuth", default = "default_true")]
    pub require_client_auth: bool,
}

fn default_true() -> bool {
    true
}

/// TLS material declared for an instance, as received over the wire (PEM blobs).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct TlsConfig {
    /// PEM-encoded server certificate.
    pub certificate: String,
    /// PEM-encoded server private key.
    #[serde(rename = "privateKey")]
    pub private_key: String,
    /// Mutual-TLS settings; absent means no client certificate is required.
    #[serde(rename = "mtlsConfig", default, skip_serializing_if = "Option::is_none")]
    pub mtls_config: Option<MtlsConfig>,
}

/// Instance-level HTTP Basic auth gate.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct BasicAuthConfig {
    /// Required username.
    pub username: String,
    /// Required password.
    pub password: String,
}

/// A single `(name, value)` global header. Multiple entries may share a name.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct GlobalHeader {
    /// Header name, matched case-insensitively against response headers.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// Upstream relay configuration, at instance or expectation level.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct RelayConfig {
    /// Base URL the incoming request's path and query are appended to.
    #[serde(rename = "remoteUrl")]
    pub remote_url: String,
    /// OAuth2 token endpoint; presence enables client-credentials token injection.
    #[serde(rename = "tokenUrl", default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// OAuth2 client id.
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// OAuth2 client secret.
    #[serde(rename = "clientSecret", default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Optional OAuth2 scope to request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// OAuth2 grant type; defaults to `client_credentials`.
    #[serde(rename = "grantType", default, skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,
    /// Static headers added to every forwarded request, overwriting same-name inbound headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Disable upstream TLS certificate verification for this relay only.
    #[serde(rename = "ignoreSSLErrors", default)]
    pub ignore_ssl_errors: bool,
}

impl RelayConfig {
    /// Whether this relay is configured to acquire an OAuth2 token.
    pub fn has_oauth2(&self) -> bool {
        self.token_url.is_some()
    }
}

/// How an expectation's body predicate is evaluated.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BodyPredicate {
    /// The raw request body must equal this string exactly.
    Exact { value: String },
    /// The raw request body must contain this string.
    Substring { value: String },
    /// The request body, parsed as JSON, must contain this value as a subset
    /// (every key/value in `value` must be present and equal in the request body).
    JsonSubset { value: serde_json::Value },
}

/// Match criteria for an [`Expectation`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ExpectationMatch {
    /// HTTP method to require; any method matches when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    /// Path pattern, e.g. `/users/{id}`.
    pub path: String,
    /// Query parameters that must be present with matching values.
    #[serde(rename = "queryParams", default, skip_serializing_if = "HashMap::is_empty")]
    pub query_params: HashMap<String, String>,
    /// Request headers that must be present with matching values (case-insensitive names).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Optional predicate the request body must satisfy.
    #[serde(rename = "bodyPredicate", default, skip_serializing_if = "Option::is_none")]
    pub body_predicate: Option<BodyPredicate>,
}

/// A single SSE event, concatenated in order into the response body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct SseMessage {
    /// The event payload, written verbatim after `data: `.
    pub data: String,
    /// Metadata only — see the Response Strategy design notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

/// A single part of a `multipart/*` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct MultipartFilePart {
    /// The form field name for this part.
    pub name: String,
    /// Filesystem path to the file served as this part's body.
    pub path: String,
    /// MIME type advertised for this part; defaults to `application/octet-stream`.
    #[serde(rename = "contentType", default = "default_octet_stream")]
    pub content_type: String,
}

fn default_octet_stream() -> String {
    "application/octet-stream".to_string()
}

/// The response half of an [`Expectation`]: a tagged variant over the five
/// strategies, tried in priority order Relay > SSE > MultipartFile > Template > Static.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseStrategy {
    Static {
        #[serde(default = "default_status")]
        status: u16,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: String,
    },
    Template {
        #[serde(default = "default_status")]
        status: u16,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
        body: String,
    },
    Sse {
        messages: Vec<SseMessage>,
    },
    MultipartFile {
        parts: Vec<MultipartFilePart>,
    },
    Relay {
        relay: RelayConfig,
    },
}

fn default_status() -> u16 {
    200
}

/// A declarative `match -> response` rule attached to an instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Expectation {
    /// The conditions a request must satisfy for this expectation to apply.
    #[serde(rename = "match")]
    pub match_: ExpectationMatch,
    /// The response strategy to execute once matched.
    pub response: ResponseStrategy,
}

/// Lifecycle state of a live [`crate::registry::Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Starting,
    Running,
    Stopped,
}

/// The declarative spec passed to `create`, i.e. the `server` object of the
/// configuration document (and the body of `POST /api/servers`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct InstanceSpec {
    /// Unique identifier for the instance across the whole registry.
    #[serde(rename = "serverId")]
    pub server_id: String,
    /// TCP port the instance binds to; must be unique across the registry.
    pub port: u16,
    /// Free-form human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// TLS/mTLS material for this instance, if it should serve HTTPS.
    #[serde(rename = "tlsConfig", default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
    /// HTTP Basic Auth credentials gating every request to this instance.
    #[serde(rename = "basicAuth", default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuthConfig>,
    /// Headers merged into every response that doesn't already set them.
    #[serde(rename = "globalHeaders", default, skip_serializing_if = "Vec::is_empty")]
    pub global_headers: Vec<GlobalHeader>,
    /// Instance-level relay: when set, every request is forwarded upstream
    /// and expectation matching never runs.
    #[serde(rename = "relayConfig", default, skip_serializing_if = "Option::is_none")]
    pub relay_config: Option<RelayConfig>,
}

impl InstanceSpec {
    /// Validate the static fields of a spec (those which don't require I/O).
    /// Port range and id-blankness are checked here; certificate sanity is
    /// checked separately by the Certificate Validator.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server_id.trim().is_empty() {
            return Err(crate::Error::validation("serverId must not be blank"));
        }
        if !(MIN_PORT..=MAX_PORT).contains(&self.port) {
            return Err(crate::Error::validation(format!(
                "port {} out of range [{MIN_PORT}, {MAX_PORT}]",
                self.port
            )));
        }
        if let Some(tls) = &self.tls_config {
            if let Some(mtls) = &tls.mtls_config {
                if mtls.ca_certificate.trim().is_empty() {
                    return Err(crate::Error::validation(
                        "mtlsConfig.caCertificate must not be blank when mTLS is configured",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One entry in the configuration document's `servers` array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ServerDeclaration {
    /// The instance to bring up.
    pub server: InstanceSpec,
    /// Expectations to install on it once it's live.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expectations: Vec<Expectation>,
}

/// Top-level shape of a JsonMC configuration document: `{ "servers": [...] }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ConfigDocument {
    /// Every server declared in the document, brought up in order.
    pub servers: Vec<ServerDeclaration>,
}

/// Read-only snapshot of an instance's public state, as returned by the
/// control-plane `ServerInfo` contract.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ServerInfo {
    /// Unique identifier for the instance.
    #[serde(rename = "serverId")]
    pub server_id: String,
    /// TCP port the instance is bound to.
    pub port: u16,
    /// Free-form human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// RFC 3339 timestamp the instance was created at.
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Whether the instance is serving over TLS.
    #[serde(rename = "tlsEnabled")]
    pub tls_enabled: bool,
    /// Whether the instance forwards every request to an upstream relay.
    #[serde(rename = "relayEnabled")]
    pub relay_enabled: bool,
    /// Number of expectations currently installed.
    #[serde(rename = "expectationCount")]
    pub expectation_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_id() {
        let spec = InstanceSpec {
            server_id: "   ".to_string(),
            port: 9000,
            description: None,
            tls_config: None,
            basic_auth: None,
            global_headers: vec![],
            relay_config: None,
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_port() {
        let mut spec = InstanceSpec {
            server_id: "s1".to_string(),
            port: 1023,
            description: None,
            tls_config: None,
            basic_auth: None,
            global_headers: vec![],
            relay_config: None,
        };
        assert!(spec.validate().is_err());
        spec.port = MAX_PORT;
        assert!(spec.validate().is_ok());
        spec.port = MIN_PORT;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn mtls_requires_ca_certificate() {
        let spec = InstanceSpec {
            server_id: "s1".to_string(),
            port: 9000,
            description: None,
            tls_config: Some(TlsConfig {
                certificate: "cert".to_string(),
                private_key: "key".to_string(),
                mtls_config: Some(MtlsConfig { ca_certificate: String::new(), require_client_auth: true }),
            }),
            basic_auth: None,
            global_headers: vec![],
            relay_config: None,
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn parses_config_document() {
        let doc = r#"{
            "servers": [
                {
                    "server": { "serverId": "s1", "port": 9100 },
                    "expectations": [
                        { "match": { "method": "GET", "path": "/hello" },
                          "response": { "type": "static", "status": 200, "body": "hi" } }
                    ]
                }
            ]
        }"#;
        let parsed: ConfigDocument = serde_json::from_str(doc).unwrap();
        assert_eq!(parsed.servers.len(), 1);
        assert_eq!(parsed.servers[0].server.server_id, "s1");
        assert_eq!(parsed.servers[0].expectations.len(), 1);
    }
}
