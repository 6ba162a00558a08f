//! Forwarding of captured requests to a configured upstream URL.

use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use crate::basket::{BasketConfig, Headers, RequestData};

/// Header marking a request that must not be forwarded again.
pub const DO_NOT_FORWARD_HEADER: &str = "X-Do-Not-Forward";

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
static HTTP_INSECURE_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Process-wide outbound HTTP client; the insecure one skips TLS verification.
fn http_client(insecure: bool) -> &'static reqwest::Client {
    if insecure {
        HTTP_INSECURE_CLIENT.get_or_init(|| {
            reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default()
        })
    } else {
        HTTP_CLIENT.get_or_init(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default()
        })
    }
}

/// Fully read upstream response, or the synthetic 502 replacing it.
#[derive(Debug)]
pub struct ForwardedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// The only hard forwarding failure reported back to the caller.
#[derive(Debug, thiserror::Error)]
#[error("invalid forward URL: {url} - {reason}")]
pub struct InvalidForwardUrl {
    pub url: String,
    pub reason: String,
}

/// Forwards captured request data to the upstream configured for the basket.
///
/// Any dispatch failure is converted into a synthetic `502 Bad Gateway`
/// response; only an unparseable forward URL surfaces as an error.
pub async fn forward(
    data: &RequestData,
    config: &BasketConfig,
    basket: &str,
) -> Result<ForwardedResponse, InvalidForwardUrl> {
    let mut forward_url =
        url::Url::parse(&config.forward_url).map_err(|e| InvalidForwardUrl {
            url: config.forward_url.clone(),
            reason: e.to_string(),
        })?;

    if config.expand_path && data.path.len() > basket.len() + 1 {
        let path = expand_url(forward_url.path(), &data.path, basket);
        forward_url.set_path(&path);
    }

    if !data.query.is_empty() {
        let merged = match forward_url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{}", data.query),
            _ => data.query.clone(),
        };
        forward_url.set_query(Some(&merged));
    }

    let method =
        reqwest::Method::from_bytes(data.method.as_bytes()).unwrap_or(reqwest::Method::GET);
    let request = http_client(config.insecure_tls)
        .request(method, forward_url.clone())
        .headers(outbound_headers(&data.header))
        .body(data.body.clone());

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let mut headers = Headers::new();
            for (name, value) in response.headers().iter() {
                headers
                    .entry(name.to_string())
                    .or_default()
                    .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
            }
            let body = response.bytes().await.unwrap_or_default();

            Ok(ForwardedResponse {
                status,
                headers,
                body,
            })
        }
        Err(e) => {
            // HTTP issue during forwarding - HTTP 502 Bad Gateway
            warn!("failed to forward request for basket: {basket} - {e}");
            let mut headers = Headers::new();
            headers.insert(
                "Content-Type".to_string(),
                vec!["text/plain".to_string()],
            );
            Ok(ForwardedResponse {
                status: 502,
                headers,
                body: Bytes::from(format!("Failed to forward request: {e}")),
            })
        }
    }
}

/// Appends the inbound path beyond the basket name to the forward URL path.
fn expand_url(forward_path: &str, original_path: &str, basket: &str) -> String {
    let trimmed = forward_path.trim_end_matches('/');
    let suffix = original_path
        .strip_prefix(&format!("/{basket}"))
        .unwrap_or(original_path);
    format!("{trimmed}{suffix}")
}

/// Builds the outbound header set from captured headers.
///
/// Headers are copied verbatim apart from hop-by-hop fields that must not
/// appear in HTTP/2 (`Connection`, `Upgrade`, `TE`), the recomputed `Host`
/// and `Content-Length`, and the loop-prevention marker which is always set.
fn outbound_headers(captured: &Headers) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();

    for (name, values) in captured {
        let lower = name.to_lowercase();
        if matches!(
            lower.as_str(),
            "connection" | "upgrade" | "te" | "host" | "content-length"
        ) {
            continue;
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(header_value) = HeaderValue::from_str(value) {
                headers.append(header_name.clone(), header_value);
            }
        }
    }

    headers.insert(
        HeaderName::from_static("x-do-not-forward"),
        HeaderValue::from_static("1"),
    );

    headers
}

/// Checks whether the inbound request carries the loop-prevention marker.
pub fn is_do_not_forward(headers: &hyper::HeaderMap) -> bool {
    headers
        .get(DO_NOT_FORWARD_HEADER)
        .map(|v| v.as_bytes() == b"1")
        .unwrap_or(false)
}
