//! Handlers for per-method canned responses of a basket.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;

use super::get_and_auth_basket;
use crate::api::types::*;
use crate::basket::ResponseConfigPatch;
use crate::server::AppContext;

const HTTP_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS", "TRACE",
];

fn is_known_method(method: &str) -> bool {
    HTTP_METHODS.contains(&method)
}

/// GET /api/baskets/:name/responses/:method - effective response for a method.
///
/// Returns the default response when none is configured.
pub async fn handle_get(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
    name: &str,
    method: &str,
) -> Response<Full<Bytes>> {
    let basket = match get_and_auth_basket(&ctx, name, req.headers()) {
        Ok(basket) => basket,
        Err(response) => return response,
    };

    let method = method.to_uppercase();
    if !is_known_method(&method) {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("unknown HTTP method: {method}"),
        );
    }

    let response = basket.get_response(&method).unwrap_or_default();
    json_response(StatusCode::OK, &response)
}

/// PUT /api/baskets/:name/responses/:method - create or replace a response.
pub async fn handle_update(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
    name: &str,
    method: &str,
) -> Response<Full<Bytes>> {
    let basket = match get_and_auth_basket(&ctx, name, req.headers()) {
        Ok(basket) => basket,
        Err(response) => return response,
    };

    let method = method.to_uppercase();
    if !is_known_method(&method) {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("unknown HTTP method: {method}"),
        );
    }

    let body = match collect_body(req, RESPONSE_BODY_LIMIT).await {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    if body.is_empty() {
        return empty_response(StatusCode::NOT_MODIFIED);
    }

    let patch: ResponseConfigPatch = match serde_json::from_slice(&body) {
        Ok(patch) => patch,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let response = match patch.apply(basket.get_response(&method).unwrap_or_default()) {
        Ok(response) => response,
        Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    };

    basket.set_response(&method, response);
    empty_response(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_methods() {
        for method in HTTP_METHODS {
            assert!(is_known_method(method));
        }
        assert!(!is_known_method("get"));
        assert!(!is_known_method("BREW"));
        assert!(!is_known_method(""));
    }
}
