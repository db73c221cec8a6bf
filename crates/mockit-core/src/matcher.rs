//! Expectation Matcher: finds the first expectation whose match criteria are
//! satisfied by an incoming request, binding path variables along the way.

use crate::config::{BodyPredicate, Expectation, HttpMethod};
use std::collections::HashMap;

/// The parts of an incoming request the matcher cares about. Protocol
/// adapters (e.g. the axum binding in mockit-http) build this from the real
/// request; the matcher itself has no dependency on any HTTP crate.
#[derive(Debug, Clone)]
pub struct MatchRequest<'a> {
    /// HTTP method of the incoming request.
    pub method: HttpMethod,
    /// Request path, unescaped and without query string.
    pub path: &'a str,
    /// Request path plus its raw, unparsed query string (`?` included when
    /// present), exactly as received. Used by the Relay Engine, which must
    /// preserve the query string verbatim rather than re-encode it from
    /// `query_params`.
    pub path_and_query: &'a str,
    /// Parsed query-string parameters.
    pub query_params: &'a HashMap<String, String>,
    /// Request headers, keyed by their original case.
    pub headers: &'a HashMap<String, String>,
    /// Raw request body, if any was sent.
    pub body: Option<&'a [u8]>,
}

/// Result of a successful match: which expectation, and the path variables
/// it bound, ready to be published into the strategy's template context.
pub struct Matched<'a> {
    /// The expectation that matched.
    pub expectation: &'a Expectation,
    /// Values bound to `{name}` path segments in the expectation's pattern.
    pub path_variables: HashMap<String, String>,
}

/// Scan `expectations` in order and return the first one that matches.
/// Ties are broken by insertion order (the first satisfying rule wins,
/// intentionally, per the documented tie-break rule).
pub fn find_match<'a>(expectations: &'a [Expectation], request: &MatchRequest<'_>) -> Option<Matched<'a>> {
    for expectation in expectations {
        if let Some(path_variables) = matches(&expectation.match_, request) {
            return Some(Matched { expectation, path_variables });
        }
    }
    None
}

fn matches(m: &crate::config::ExpectationMatch, request: &MatchRequest<'_>) -> Option<HashMap<String, String>> {
    if let Some(method) = m.method {
        if method != request.method {
            return None;
        }
    }

    let path_variables = match_path(&m.path, request.path)?;

    for (name, expected) in &m.query_params {
        match request.query_params.get(name) {
            Some(actual) if actual == expected => {}
            _ => return None,
        }
    }

    for (name, expected) in &m.headers {
        let found = request
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v);
        match found {
            Some(actual) if actual == expected => {}
            _ => return None,
        }
    }

    if let Some(predicate) = &m.body_predicate {
        if !body_matches(predicate, request.body) {
            return None;
        }
    }

    Some(path_variables)
}

/// Split both pattern and path on `/`, ignoring a single trailing slash on
/// either side, and match segment by segment. A `{name}` segment binds the
/// corresponding request segment; all other segments must be literal-equal.
fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segments: Vec<&str> = trim_trailing_slash(pattern).split('/').collect();
    let path_segments: Vec<&str> = trim_trailing_slash(path).split('/').collect();

    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut vars = HashMap::new();
    for (p, s) in pattern_segments.iter().zip(path_segments.iter()) {
        if let Some(name) = p.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
            vars.insert(name.to_string(), (*s).to_string());
        } else if p != s {
            return None;
        }
    }
    Some(vars)
}

fn trim_trailing_slash(s: &str) -> &str {
    if s.len() > 1 { s.strip_suffix('/').unwrap_or(s) } else { s }
}

fn body_matches(predicate: &BodyPredicate, body: Option<&[u8]>) -> bool {
    let body_str = match body {
        Some(b) => String::from_utf8_lossy(b),
        None => return false,
    };
    match predicate {
        BodyPredicate::Exact { value } => body_str.as_ref() == value,
        BodyPredicate::Substring { value } => body_str.contains(value.as_str()),
        BodyPredicate::JsonSubset { value } => {
            serde_json::from_str::<serde_json::Value>(&body_str).is_ok_and(|actual| is_subset(value, &actual))
        }
    }
}

/// `expected` is a subset of `actual`: every key/value pair in `expected`
/// (recursively, for nested objects) must be present and equal in `actual`.
fn is_subset(expected: &serde_json::Value, actual: &serde_json::Value) -> bool {
    match (expected, actual) {
        (serde_json::Value::Object(exp_map), serde_json::Value::Object(act_map)) => exp_map
            .iter()
            .all(|(k, v)| act_map.get(k).is_some_and(|av| is_subset(v, av))),
        _ => expected == actual,
    }
}
