//! HTTP server plumbing.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tracing::info;

/// Serves a router until the shutdown future resolves, then drains
/// in-flight requests.
///
/// # Errors
///
/// Returns an error when binding or serving fails.
pub async fn serve(
    router: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "http server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
