//! Response Strategy Set: turns a matched expectation's tagged response into
//! bytes on the wire (or, for `Relay`, defers to the caller to invoke the
//! Relay Engine). Modeled as a tagged variant rather than dynamic dispatch,
//! per the documented design notes.

use crate::config::{MultipartFilePart, RelayConfig, ResponseStrategy, SseMessage};
use crate::templating::{self, TemplateContext};
use crate::{Error, Result};

/// A fully-rendered response, ready for the Dispatcher to merge global
/// headers into and hand back to the protocol layer.
pub struct RenderedResponse {
    /// HTTP status code to send.
    pub status: u16,
    /// Response headers to send, in order.
    pub headers: Vec<(String, String)>,
    /// Response body bytes.
    pub body: Vec<u8>,
}

/// What running a strategy produced: either a response ready to send, or a
/// relay configuration the Dispatcher must hand to the Relay Engine. Relay
/// responses bypass global-header merging entirely (see the Dispatcher).
pub enum StrategyOutcome {
    Rendered(RenderedResponse),
    Relay(RelayConfig),
}

/// Relative ordering among strategies, documented for extensibility; with a
/// tagged-variant response this reduces to a lookup, not a scan.
pub fn priority(response: &ResponseStrategy) -> u8 {
    match response {
        ResponseStrategy::Relay { .. } => 0,
        ResponseStrategy::Sse { .. } => 1,
        ResponseStrategy::MultipartFile { .. } => 2,
        ResponseStrategy::Template { .. } => 3,
        ResponseStrategy::Static { .. } => 4,
    }
}

/// Execute a matched expectation's response strategy.
pub async fn execute(response: &ResponseStrategy, ctx: &TemplateContext) -> Result<StrategyOutcome> {
    match response {
        ResponseStrategy::Static { status, headers, body } => Ok(StrategyOutcome::Rendered(RenderedResponse {
            status: *status,
            headers: headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            body: body.clone().into_bytes(),
        })),

        ResponseStrategy::Template { status, headers, body } => {
            let rendered = templating::render(body, ctx)?;
            Ok(StrategyOutcome::Rendered(RenderedResponse {
                status: *status,
                headers: headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                body: rendered.into_bytes(),
            }))
        }

        ResponseStrategy::Sse { messages } => Ok(StrategyOutcome::Rendered(render_sse(messages))),

        ResponseStrategy::MultipartFile { parts } => render_multipart(parts).await.map(StrategyOutcome::Rendered),

        ResponseStrategy::Relay { relay } => Ok(StrategyOutcome::Relay(relay.clone())),
    }
}

/// Serialize messages as `data: <message>\n\n`, concatenated. Any declared
/// `interval` is metadata only — all messages are flushed synchronously in
/// a single response body rather than paced over time (see Open Questions).
fn render_sse(messages: &[SseMessage]) -> RenderedResponse {
    let mut body = String::new();
    for message in messages {
        body.push_str("data: ");
        body.push_str(&message.data);
        body.push_str("\n\n");
    }
    RenderedResponse {
        status: 200,
        headers: vec![
            ("Content-Type".to_string(), "text/event-stream".to_string()),
            ("Cache-Control".to_string(), "no-cache".to_string()),
            ("Connection".to_string(), "keep-alive".to_string()),
        ],
        body: body.into_bytes(),
    }
}

async fn render_multipart(parts: &[MultipartFilePart]) -> Result<RenderedResponse> {
    let boundary = format!("mockit-{}", uuid::Uuid::new_v4());
    let mut body = Vec::new();
    for part in parts {
        let bytes = tokio::fs::read(&part.path)
            .await
            .map_err(|e| Error::generic(format!("failed to read multipart file {}: {e}", part.path)))?;
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.name,
                filename_of(&part.path)
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes());
        body.extend_from_slice(&bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Ok(RenderedResponse {
        status: 200,
        headers: vec![("Content-Type".to_string(), format!("multipart/form-data; boundary={boundary}"))],
        body,
    })
}

fn filename_of(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string()
}
