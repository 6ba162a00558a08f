//! HTTP server wiring: listener, request dispatch and startup baskets.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::basket::BasketConfig;
use crate::config::{is_reserved_name, is_valid_basket_name, ServerConfig, API_ROOT};
use crate::storage::BasketsDatabase;
use crate::{api, capture};

/// Everything a handler needs: service configuration plus the baskets store.
///
/// Passed explicitly into handlers at construction time; tests inject a fresh
/// context per case.
pub struct AppContext {
    pub config: ServerConfig,
    pub db: Arc<dyn BasketsDatabase>,
}

impl AppContext {
    pub fn new(config: ServerConfig, db: Arc<dyn BasketsDatabase>) -> Self {
        Self { config, db }
    }
}

/// A running server bound to its address.
pub struct ServerHandle {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Stops accepting connections.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

/// Binds the configured address and starts serving requests.
pub async fn start(ctx: Arc<AppContext>) -> anyhow::Result<ServerHandle> {
    let listener = TcpListener::bind((ctx.config.listen_addr.as_str(), ctx.config.listen_port))
        .await?;
    let addr = listener.local_addr()?;
    info!("HTTP server is listening on {addr}");

    create_startup_baskets(&ctx);

    let serve_ctx = Arc::clone(&ctx);
    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let io = TokioIo::new(stream);
                    let ctx = Arc::clone(&serve_ctx);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let ctx = Arc::clone(&ctx);
                            async move { route_request(req, ctx).await }
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("connection error: {e}");
                        }
                    });
                }
                Err(e) => error!("accept error: {e}"),
            }
        }
    });

    Ok(ServerHandle { addr, task })
}

/// Top-level dispatch: the management namespace goes to the API router,
/// everything else is treated as a basket capture.
async fn route_request(
    req: Request<Incoming>,
    ctx: Arc<AppContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let first_segment = req
        .uri()
        .path()
        .split('/')
        .find(|s| !s.is_empty())
        .unwrap_or("");

    let response = if first_segment == API_ROOT {
        api::route_request(req, ctx).await
    } else {
        capture::accept_basket_request(req, ctx).await
    };

    Ok(response)
}

/// Creates the baskets requested on the command line.
///
/// Conflicts are expected across restarts with a persistent backend and are
/// only logged.
fn create_startup_baskets(ctx: &AppContext) {
    for name in &ctx.config.baskets {
        if is_reserved_name(name) || !is_valid_basket_name(name) {
            warn!("cannot auto-create basket with invalid name: {name}");
            continue;
        }

        match ctx
            .db
            .create(name, BasketConfig::with_capacity(ctx.config.init_capacity))
        {
            Ok(auth) => info!("auto-created basket: {name}, token: {}", auth.token),
            Err(e) => warn!("failed to auto-create basket: {name} - {e}"),
        }
    }
}
