//! Template execution engine
//!
//! Turns a tool call into one upstream HTTP request: the tool's
//! [`RequestTemplate`](crate::store::RequestTemplate) is rendered against the
//! call arguments, the destination host is checked against the tenant's
//! egress allowlist, and the response is returned as JSON.
//!
//! Placeholders have the form `{{name}}`. Rendering is a single left-to-right
//! pass: substituted text is never scanned again, so the result does not
//! depend on argument order. Placeholders without a matching argument are
//! left verbatim.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Method, Url};
use serde_json::{Map, Value};

use crate::store::{RequestTemplate, Server, Tenant, Tool};

/// Default bound on a single upstream call
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(20);

/// Why an upstream call could not be completed
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("server has no upstream base URL")]
    MissingUpstream,

    #[error("invalid upstream URL: {0}")]
    InvalidUpstreamUrl(String),

    #[error("egress to host '{0}' is not allowed")]
    EgressDenied(String),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid request URL: {0}")]
    InvalidRequestUrl(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("failed to read upstream response: {0}")]
    ReadBody(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Upstream response as handed back to the caller
#[derive(Debug, Clone)]
pub struct UpstreamResult {
    pub status: u16,
    /// Parsed JSON, or `{"text": <raw body>}` when the body is not JSON
    pub body: Value,
    pub headers: BTreeMap<String, String>,
}

/// Executes tool calls against upstream HTTP services
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    client: reqwest::Client,
}

impl ExecutionEngine {
    /// Engine with the default 20 second upstream timeout
    pub fn new() -> Result<Self, ExecutionError> {
        Self::with_timeout(DEFAULT_UPSTREAM_TIMEOUT)
    }

    /// Redirects are never followed: the allowlist check covers only the
    /// first hop.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ExecutionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| ExecutionError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Render `tool`'s template with `arguments` and call the server's upstream.
    pub async fn execute(
        &self,
        server: &Server,
        tenant: &Tenant,
        tool: &Tool,
        arguments: &Map<String, Value>,
    ) -> Result<UpstreamResult, ExecutionError> {
        let base = server
            .upstream_base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(ExecutionError::MissingUpstream)?;
        let base_url =
            Url::parse(base).map_err(|e| ExecutionError::InvalidUpstreamUrl(e.to_string()))?;
        check_egress(&base_url, &tenant.egress_allowlist)?;

        let template = &tool.mapping;
        let method = parse_method(&template.method)?;
        let url = build_url(base, template, arguments)?;
        // Rendered arguments must not move the request to another host
        check_egress(&url, &tenant.egress_allowlist)?;
        let mut headers = render_headers(template, arguments)?;

        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(body) = &template.body {
            let body = serde_json::to_vec(&resolve_body(body, arguments))
                .map_err(|e| ExecutionError::Request(e.to_string()))?;
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            request = request.body(body);
        }

        tracing::debug!(
            tool = %tool.name,
            method = %method,
            host = url.host_str().unwrap_or_default(),
            path = url.path(),
            "Calling upstream"
        );

        let response = request.headers(headers).send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutionError::Timeout
            } else if e.is_builder() {
                ExecutionError::InvalidRequestUrl(e.to_string())
            } else {
                ExecutionError::Request(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let mut response_headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                response_headers
                    .entry(name.as_str().to_string())
                    .and_modify(|v: &mut String| {
                        v.push_str(", ");
                        v.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ExecutionError::Timeout
            } else {
                ExecutionError::ReadBody(e.to_string())
            }
        })?;

        Ok(UpstreamResult {
            status,
            body: parse_body(&bytes),
            headers: response_headers,
        })
    }
}

/// The URL's host (IPv6 brackets stripped) must equal an allowlist entry,
/// compared case-insensitively.
pub fn check_egress(url: &Url, allowlist: &[String]) -> Result<(), ExecutionError> {
    let host = url
        .host_str()
        .map(normalize_host)
        .ok_or_else(|| ExecutionError::InvalidUpstreamUrl("URL has no host".to_string()))?;

    if allowlist.iter().any(|entry| normalize_host(entry) == host) {
        Ok(())
    } else {
        tracing::warn!(host = %host, "Egress denied by tenant allowlist");
        Err(ExecutionError::EgressDenied(host))
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim();
    host.strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host)
        .to_ascii_lowercase()
}

fn parse_method(method: &str) -> Result<Method, ExecutionError> {
    let method = method.trim();
    if method.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ExecutionError::InvalidMethod(method.to_string()))
}

/// Base URL (trailing `/` trimmed) + rendered path, then the rendered query
/// parameters, which replace same-named parameters already on the URL.
pub fn build_url(
    base: &str,
    template: &RequestTemplate,
    arguments: &Map<String, Value>,
) -> Result<Url, ExecutionError> {
    let path = render_template(&template.path, arguments);
    let separator = if path.is_empty() || path.starts_with('/') || path.starts_with('?') {
        ""
    } else {
        "/"
    };
    let raw = format!("{}{}{}", base.trim_end_matches('/'), separator, path);
    let mut url = Url::parse(&raw).map_err(|e| ExecutionError::InvalidRequestUrl(e.to_string()))?;

    if !template.query.is_empty() {
        let rendered: Vec<(String, String)> = template
            .query
            .iter()
            .map(|(k, v)| (k.clone(), render_template(v, arguments)))
            .collect();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !template.query.contains_key(k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .extend_pairs(rendered);
    }
    Ok(url)
}

fn render_headers(
    template: &RequestTemplate,
    arguments: &Map<String, Value>,
) -> Result<HeaderMap, ExecutionError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &template.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ExecutionError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(&render_template(value, arguments)).map_err(
            |e| ExecutionError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            },
        )?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Replace every `{{name}}` in `template` with the text of `arguments[name]`.
///
/// String arguments are inserted as-is, any other JSON value as its JSON
/// text. Unknown names are left in place.
pub fn render_template(template: &str, arguments: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        if name.contains("{{") {
            // Stray opener: emit it and rescan from the next one
            out.push_str("{{");
            rest = after;
            continue;
        }

        match arguments.get(name) {
            Some(value) => out.push_str(&value_text(value)),
            None => {
                out.push_str("{{");
                out.push_str(name);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render every string leaf of a body template; objects are walked
/// recursively and all other values are kept as they are.
pub fn resolve_body(body: &Value, arguments: &Map<String, Value>) -> Value {
    match body {
        Value::String(s) => Value::String(render_template(s, arguments)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_body(v, arguments)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn parse_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or_else(|_| {
        serde_json::json!({ "text": String::from_utf8_lossy(bytes) })
    })
}
