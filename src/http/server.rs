//! HTTP server hosting the throttled origin.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{bot_throttle_middleware, BotThrottle};
use crate::error::{BotThrottleError, Result};

/// Wrap `origin` so every request goes through the bot filter first.
pub fn throttled_router(origin: Router, throttle: Arc<BotThrottle>) -> Router {
    origin.layer(middleware::from_fn_with_state(throttle, bot_throttle_middleware))
}

/// HTTP server for the throttled origin.
pub struct HttpServer {
    /// Bound listener
    listener: TcpListener,
    /// Router with the bot filter applied
    router: Router,
}

impl HttpServer {
    /// Bind the listener.
    pub async fn bind(addr: SocketAddr, router: Router) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!(
            addr = %self.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            self.listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            BotThrottleError::Io(e)
        })
    }
}
