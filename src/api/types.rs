//! Response helpers and request parsing utilities for the management API.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::ServerConfig;

/// Limit for incoming basket configuration bodies.
pub const CONFIG_BODY_LIMIT: usize = 2048;
/// Limit for incoming response configuration bodies.
pub const RESPONSE_BODY_LIMIT: usize = 64 * 1024;

/// Builds an HTTP response with the given status and body.
pub fn build_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}

/// Builds a response with just a status code and no body.
pub fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    build_response(status, Bytes::new())
}

/// Builds a JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json; charset=UTF-8")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}

/// Builds an error response with a JSON error body.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message }))
}

/// Not-found response for unrecognized API routes.
pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

/// Collects a request body up to `limit` bytes.
///
/// Exceeding the limit (or an interrupted read) is reported as an error
/// rather than a truncated body.
pub async fn collect_body(req: Request<Incoming>, limit: usize) -> Result<Bytes, String> {
    Limited::new(req.into_body(), limit)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| format!("failed to read request body: {e}"))
}

/// Extracts the bearer credential from the `Authorization` header.
pub fn auth_token(headers: &hyper::HeaderMap) -> &str {
    headers
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Parses a query string into single-valued parameters; first value wins.
pub fn query_params(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.entry(key.into_owned()).or_insert(value.into_owned());
        }
    }
    params
}

/// Paging window requested by a client, clamped to service bounds.
#[derive(Debug, PartialEq, Eq)]
pub struct PageParams {
    pub max: usize,
    pub skip: usize,
}

impl PageParams {
    /// Reads `max` and `skip` with defaults and clamping: `max` stays within
    /// `[1, page_size * 10]` defaulting to the page size, `skip` within
    /// `[0, max_capacity]` defaulting to zero.
    pub fn parse(params: &HashMap<String, String>, config: &ServerConfig) -> Self {
        let parse = |name: &str, default: usize| {
            params
                .get(name)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(default)
        };

        Self {
            max: parse("max", config.page_size).clamp(1, config.page_size * 10),
            skip: parse("skip", 0).min(config.max_capacity),
        }
    }
}
