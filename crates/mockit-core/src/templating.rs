//! Response template context and rendering.
//!
//! The template language itself is an external collaborator treated as a
//! pure function `render(template, context) -> String`; this module owns the
//! context shape `{ pathVariables, headers, body, cookies }` and a `${...}`
//! token-substitution renderer compatible with that contract. `${...}` is
//! disjoint from the JsonMC parser's `@{...}` env-expansion syntax by design.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Everything a response template may reference while rendering.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    /// Values bound to `{name}` path segments by the matcher.
    pub path_variables: HashMap<String, String>,
    /// Request headers, keyed by their original case.
    pub headers: HashMap<String, String>,
    /// The request body, parsed as JSON if it was valid JSON; `None` otherwise.
    pub body: Option<Value>,
    /// Cookies parsed from the request's `Cookie` header.
    pub cookies: HashMap<String, String>,
}

impl TemplateContext {
    /// Look up a dotted reference like `pathVariables.id` or `body.user.name`.
    fn resolve(&self, path: &str) -> Option<String> {
        let mut parts = path.splitn(2, '.');
        let root = parts.next()?;
        let rest = parts.next();
        match root {
            "pathVariables" => rest.and_then(|k| self.path_variables.get(k)).cloned(),
            "headers" => rest.and_then(|k| self.headers.get(k)).cloned(),
            "cookies" => rest.and_then(|k| self.cookies.get(k)).cloned(),
            "body" => {
                let body = self.body.as_ref()?;
                match rest {
                    None => Some(stringify(body)),
                    Some(jsonpath) => stringify_at(body, jsonpath),
                }
            }
            _ => None,
        }
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn stringify_at(v: &Value, dotted: &str) -> Option<String> {
    let mut cur = v;
    for segment in dotted.split('.') {
        cur = cur.get(segment)?;
    }
    Some(stringify(cur))
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\s*([A-Za-z0-9_.\-]+)\s*\}").expect("valid regex"))
}

/// Render a template string against a context. Unresolvable references are
/// left as an empty string rather than failing the whole render — a template
/// render failure (e.g. malformed `${...}`) is the only case that produces
/// an error, surfaced by the Dispatcher as `INTERNAL_SERVER_ERROR`.
pub fn render(template: &str, ctx: &TemplateContext) -> crate::Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in token_regex().captures_iter(template) {
        let m = caps.get(0).expect("full match present");
        out.push_str(&template[last..m.start()]);
        let reference = caps.get(1).expect("capture group present").as_str();
        out.push_str(&ctx.resolve(reference).unwrap_or_default());
        last = m.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}
