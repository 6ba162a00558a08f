//! Route dispatch for the management API.
//!
//! Routes live under `/api/baskets/...` with the older `/api/...` layout kept
//! as an alias. The basket name segment is not validated here; creation
//! validates it and every other handler resolves it against the store.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::sync::Arc;
use tracing::debug;

use crate::api::handlers::{baskets, requests, responses};
use crate::api::types::not_found;
use crate::server::AppContext;

/// Parsed management route, from path segments after the API root.
#[derive(Debug, PartialEq, Eq)]
enum ApiRoute {
    /// GET /api/baskets (and legacy GET /api)
    Baskets,
    /// /api/baskets/:name (and legacy /api/:name)
    Basket(String),
    /// /api/baskets/:name/requests
    Requests(String),
    /// /api/baskets/:name/responses/:method
    Responses(String, String),
}

impl ApiRoute {
    fn parse(segments: &[&str]) -> Option<Self> {
        match segments {
            [] | ["baskets"] => Some(ApiRoute::Baskets),
            ["baskets", name] => Some(ApiRoute::Basket(name.to_string())),
            ["baskets", name, "requests"] => Some(ApiRoute::Requests(name.to_string())),
            ["baskets", name, "responses", method] => {
                Some(ApiRoute::Responses(name.to_string(), method.to_string()))
            }
            // legacy layout without the "baskets" segment
            [name] => Some(ApiRoute::Basket(name.to_string())),
            [name, "requests"] => Some(ApiRoute::Requests(name.to_string())),
            [name, "responses", method] => {
                Some(ApiRoute::Responses(name.to_string(), method.to_string()))
            }
            _ => None,
        }
    }
}

/// Dispatches a management API request.
pub async fn route_request(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("management API: {method} {path}");

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    // the first segment is the API root, checked by the server dispatch
    let route = match ApiRoute::parse(&segments[1..]) {
        Some(route) => route,
        None => return not_found(),
    };

    match (method, route) {
        (Method::GET, ApiRoute::Baskets) => baskets::handle_list(req, ctx).await,

        (Method::POST, ApiRoute::Basket(name)) => baskets::handle_create(req, ctx, &name).await,
        (Method::GET, ApiRoute::Basket(name)) => baskets::handle_get(req, ctx, &name).await,
        (Method::PUT, ApiRoute::Basket(name)) => baskets::handle_update(req, ctx, &name).await,
        (Method::DELETE, ApiRoute::Basket(name)) => baskets::handle_delete(req, ctx, &name).await,

        (Method::GET, ApiRoute::Requests(name)) => requests::handle_get(req, ctx, &name).await,
        (Method::DELETE, ApiRoute::Requests(name)) => requests::handle_clear(req, ctx, &name).await,

        (Method::GET, ApiRoute::Responses(name, method)) => {
            responses::handle_get(req, ctx, &name, &method).await
        }
        (Method::PUT, ApiRoute::Responses(name, method)) => {
            responses::handle_update(req, ctx, &name, &method).await
        }

        _ => not_found(),
    }
}
