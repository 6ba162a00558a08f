//! Basket CRUD handlers.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::info;

use super::get_and_auth_basket;
use crate::api::types::*;
use crate::basket::{BasketConfig, BasketConfigPatch};
use crate::config::{basket_name_pattern, is_reserved_name, is_valid_basket_name};
use crate::server::AppContext;
use crate::storage::StoreError;
use crate::token::secure_compare;

/// GET /api/baskets - list basket names, with optional substring search.
pub async fn handle_list(req: Request<Incoming>, ctx: Arc<AppContext>) -> Response<Full<Bytes>> {
    if !secure_compare(auth_token(req.headers()), &ctx.config.master_token) {
        return empty_response(StatusCode::UNAUTHORIZED);
    }

    let params = query_params(req.uri().query());
    let page = PageParams::parse(&params, &ctx.config);

    match params.get("q") {
        Some(query) if !query.is_empty() => json_response(
            StatusCode::OK,
            &ctx.db.find_names(query, page.max, page.skip),
        ),
        _ => json_response(StatusCode::OK, &ctx.db.get_names(page.max, page.skip)),
    }
}

/// POST /api/baskets/:name - create a new basket.
///
/// Unauthenticated; the response carries the basket token exactly once.
pub async fn handle_create(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
    name: &str,
) -> Response<Full<Bytes>> {
    // reserved names satisfy the pattern, check them first
    if is_reserved_name(name) {
        return error_response(
            StatusCode::FORBIDDEN,
            &format!("basket name may not clash with system path: {name}"),
        );
    }
    if !is_valid_basket_name(name) {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("basket name does not match pattern: {}", basket_name_pattern()),
        );
    }

    info!("creating basket: {name}");

    let body = match collect_body(req, CONFIG_BODY_LIMIT).await {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let mut config = BasketConfig::with_capacity(ctx.config.init_capacity);
    if !body.is_empty() {
        let patch: BasketConfigPatch = match serde_json::from_slice(&body) {
            Ok(patch) => patch,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        };
        config = match patch.apply(config, ctx.config.max_capacity) {
            Ok(config) => config,
            Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
        };
    }

    match ctx.db.create(name, config) {
        Ok(auth) => json_response(StatusCode::CREATED, &auth),
        Err(e @ StoreError::NameConflict(_)) => {
            error_response(StatusCode::CONFLICT, &e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// GET /api/baskets/:name - get basket configuration.
pub async fn handle_get(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
    name: &str,
) -> Response<Full<Bytes>> {
    match get_and_auth_basket(&ctx, name, req.headers()) {
        Ok(basket) => json_response(StatusCode::OK, &basket.config()),
        Err(response) => response,
    }
}

/// PUT /api/baskets/:name - update basket configuration.
pub async fn handle_update(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
    name: &str,
) -> Response<Full<Bytes>> {
    let basket = match get_and_auth_basket(&ctx, name, req.headers()) {
        Ok(basket) => basket,
        Err(response) => return response,
    };

    let body = match collect_body(req, CONFIG_BODY_LIMIT).await {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    };
    if body.is_empty() {
        return empty_response(StatusCode::NOT_MODIFIED);
    }

    let patch: BasketConfigPatch = match serde_json::from_slice(&body) {
        Ok(patch) => patch,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let config = match patch.apply(basket.config(), ctx.config.max_capacity) {
        Ok(config) => config,
        Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    };

    basket.update(config);
    empty_response(StatusCode::NO_CONTENT)
}

/// DELETE /api/baskets/:name - delete a basket with everything it holds.
pub async fn handle_delete(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
    name: &str,
) -> Response<Full<Bytes>> {
    match get_and_auth_basket(&ctx, name, req.headers()) {
        Ok(_) => {
            info!("deleting basket: {name}");
            ctx.db.delete(name);
            empty_response(StatusCode::NO_CONTENT)
        }
        Err(response) => response,
    }
}
