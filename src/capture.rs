//! Capture pipeline: the handler path for requests addressed to a basket.
//!
//! Any request whose first path segment names an existing basket is recorded
//! into that basket's ring, answered with the basket's effective response for
//! the HTTP method, and optionally forwarded to the configured upstream -
//! either synchronously with the upstream response proxied back, or on a
//! detached task whose result is discarded.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

use crate::api::types::{build_response, empty_response};
use crate::basket::{RequestData, ResponseConfig};
use crate::forward::{forward, is_do_not_forward};
use crate::server::AppContext;
use crate::template::render_template;

/// Accepts and handles an HTTP request passed to a basket.
pub async fn accept_basket_request(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
) -> Response<Full<Bytes>> {
    let path = req.uri().path().to_string();
    let name = path.split('/').nth(1).unwrap_or("").to_string();

    let Some(basket) = ctx.db.get(&name) else {
        return empty_response(StatusCode::NOT_FOUND);
    };

    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    let do_not_forward = is_do_not_forward(&headers);

    // the body is read eagerly; a broken read stores what arrived
    let body = match req.into_body().collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        Err(e) => {
            debug!("failed to read request body for basket: {name} - {e}");
            String::new()
        }
    };

    let data = basket.add(RequestData::from_parts(&method, &uri, &headers, body));
    let query = data.query.clone();

    let mut response = basket
        .get_response(&method.as_str().to_uppercase())
        .unwrap_or_default();

    let config = basket.config();
    if !config.forward_url.is_empty() && !do_not_forward {
        if config.proxy_response {
            match forward(&data, &config, &name).await {
                Ok(upstream) => {
                    response = ResponseConfig {
                        status: upstream.status,
                        headers: upstream.headers,
                        body: String::from_utf8_lossy(&upstream.body).into_owned(),
                        is_template: false,
                    };
                }
                Err(e) => {
                    return build_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Bytes::from(e.to_string()),
                    )
                }
            }
        } else {
            // capture latency stays independent of the upstream: forward on a
            // detached task and discard the drained upstream response
            tokio::spawn(async move {
                let _ = forward(&data, &config, &name).await;
            });
        }
    }

    write_response(&response, &query)
}

/// Renders the effective response configuration into an HTTP response.
fn write_response(response: &ResponseConfig, query: &str) -> Response<Full<Bytes>> {
    let body = if response.is_template && !response.body.is_empty() {
        match render_template(&response.body, query) {
            Ok(rendered) => Bytes::from(rendered),
            Err(e) => {
                return build_response(StatusCode::INTERNAL_SERVER_ERROR, Bytes::from(e.to_string()))
            }
        }
    } else {
        Bytes::from(response.body.clone())
    };

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK));
    for (name, values) in &response.headers {
        for value in values {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}
