//! Handlers for requests collected by a basket.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;

use super::get_and_auth_basket;
use crate::api::types::*;
use crate::server::AppContext;

/// GET /api/baskets/:name/requests - collected requests, with optional search.
///
/// Query parameters: `q` (substring), `in` (`body`, `query`, `headers` or
/// `any`), plus the paging window.
pub async fn handle_get(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
    name: &str,
) -> Response<Full<Bytes>> {
    let basket = match get_and_auth_basket(&ctx, name, req.headers()) {
        Ok(basket) => basket,
        Err(response) => return response,
    };

    let params = query_params(req.uri().query());
    let page = PageParams::parse(&params, &ctx.config);

    match params.get("q") {
        Some(query) if !query.is_empty() => {
            let scope = params.get("in").map(String::as_str).unwrap_or("any");
            json_response(
                StatusCode::OK,
                &basket.find_requests(query, scope, page.max, page.skip),
            )
        }
        _ => json_response(StatusCode::OK, &basket.get_requests(page.max, page.skip)),
    }
}

/// DELETE /api/baskets/:name/requests - drop all collected requests.
pub async fn handle_clear(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
    name: &str,
) -> Response<Full<Bytes>> {
    match get_and_auth_basket(&ctx, name, req.headers()) {
        Ok(basket) => {
            basket.clear();
            empty_response(StatusCode::NO_CONTENT)
        }
        Err(response) => response,
    }
}
