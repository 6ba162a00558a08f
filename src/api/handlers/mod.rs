//! Management API handlers.

pub mod baskets;
pub mod requests;
pub mod responses;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;

use crate::api::types::{auth_token, empty_response};
use crate::server::AppContext;
use crate::storage::Basket;
use crate::token::secure_compare;

/// Resolves a basket and authorizes access with the basket or master token.
///
/// Errors are ready-made responses: `404` for an unknown basket, `401` for a
/// bad credential.
pub fn get_and_auth_basket(
    ctx: &AppContext,
    name: &str,
    headers: &hyper::HeaderMap,
) -> Result<Arc<dyn Basket>, Response<Full<Bytes>>> {
    let Some(basket) = ctx.db.get(name) else {
        return Err(empty_response(StatusCode::NOT_FOUND));
    };

    let token = auth_token(headers);
    if basket.authorize(token) || secure_compare(token, &ctx.config.master_token) {
        Ok(basket)
    } else {
        Err(empty_response(StatusCode::UNAUTHORIZED))
    }
}
