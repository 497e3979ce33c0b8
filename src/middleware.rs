//! Per-request telemetry middleware
//!
//! Wraps every inbound request: assigns or propagates a trace id, consults
//! the rate limiter for API paths, narrates the request/response pair, and
//! attaches the fixed security headers. CORS is layered separately in the
//! router (see `server::build_router`).

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Map, Value};

use crate::app_state::AppState;
use crate::errors::TelemetryError;
use crate::logger::{generate_trace_id, sanitize_headers, RequestInfo};

const API_PREFIX: &str = "/api/";

/// Slow-request thresholds in milliseconds, matched by path prefix. Paths
/// without an entry use the configured API default.
const PERFORMANCE_THRESHOLDS_MS: &[(&str, u64)] = &[
    ("/api/menu", 500),
    ("/api/orders", 800),
    ("/api/members", 500),
    ("/api/update", 1000),
];

pub async fn telemetry_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let is_api = path.starts_with(API_PREFIX);

    let trace_id =
        header_str(req.headers(), "x-trace-id").unwrap_or_else(generate_trace_id);

    if is_api {
        let identifier = client_identifier(req.headers());

        if !state.limiter.is_allowed(&identifier).await {
            let mut response =
                TelemetryError::rate_limited("request rate limit exceeded").into_response();
            attach_security_headers(response.headers_mut());
            set_header(response.headers_mut(), "x-trace-id", &trace_id);
            return response;
        }

        state.logger.log_request(
            "Middleware",
            &trace_id,
            RequestInfo {
                method: &method,
                path: &path,
                query: query_value(req.uri().query()),
                headers: sanitize_headers(
                    req.headers()
                        .iter()
                        .filter_map(|(name, value)| {
                            value.to_str().ok().map(|v| (name.as_str(), v))
                        }),
                ),
                user_agent: header_str(req.headers(), "user-agent"),
                referer: header_str(req.headers(), "referer"),
                client_addr: Some(identifier),
            },
        );
    }

    let mut response = next.run(req).await;
    let duration = start.elapsed().as_millis() as u64;

    if is_api {
        let threshold = threshold_for(&path, state.config.perf_threshold_api_ms);
        if duration > threshold {
            state.logger.warn(
                "Request processing slow",
                Some(json!({
                    "module": "Middleware",
                    "traceId": trace_id,
                    "method": method,
                    "path": path,
                    "duration": duration,
                    "threshold": threshold,
                })),
            );
        }

        state
            .logger
            .log_response(&trace_id, "Middleware", response.status().as_u16(), duration);
        set_header(
            response.headers_mut(),
            "x-response-time",
            &format!("{duration}ms"),
        );
    }

    attach_security_headers(response.headers_mut());
    set_header(response.headers_mut(), "x-trace-id", &trace_id);
    response
}

fn attach_security_headers(headers: &mut HeaderMap) {
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "x-xss-protection",
        HeaderValue::from_static("1; mode=block"),
    );
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Client identity for rate limiting: forwarded address when present,
/// otherwise a shared bucket.
fn client_identifier(headers: &HeaderMap) -> String {
    header_str(headers, "x-forwarded-for")
        .or_else(|| header_str(headers, "x-real-ip"))
        .unwrap_or_else(|| "unknown".to_string())
}

fn threshold_for(path: &str, default_ms: u64) -> u64 {
    PERFORMANCE_THRESHOLDS_MS
        .iter()
        .find(|(prefix, _)| path.starts_with(prefix))
        .map(|&(_, threshold)| threshold)
        .unwrap_or(default_ms)
}

/// Shallow key=value parse of the raw query string; values are logged
/// verbatim, without percent-decoding.
fn query_value(query: Option<&str>) -> Value {
    let mut map = Map::new();
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("");
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_lookup_prefers_specific_prefixes() {
        assert_eq!(threshold_for("/api/menu", 1000), 500);
        assert_eq!(threshold_for("/api/menu/categories", 1000), 500);
        assert_eq!(threshold_for("/api/orders", 1000), 800);
        assert_eq!(threshold_for("/api/logs", 1000), 1000);
        assert_eq!(threshold_for("/api/logs", 750), 750);
    }

    #[test]
    fn query_strings_parse_into_objects() {
        let parsed = query_value(Some("action=export&start=2025-07-01&flag"));
        assert_eq!(parsed["action"], "export");
        assert_eq!(parsed["start"], "2025-07-01");
        assert_eq!(parsed["flag"], "");

        assert_eq!(query_value(None), Value::Object(Map::new()));
    }

    #[test]
    fn client_identifier_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_identifier(&headers), "10.0.0.2");

        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        assert_eq!(client_identifier(&headers), "10.0.0.1");
    }
}
