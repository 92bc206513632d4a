pub mod handlers;
pub mod schemas;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::Result;
use crate::manager::AbstractManager;

/// Serve the HTTP API until `shutdown` is notified.
pub async fn serve(
    listen: SocketAddr,
    manager: Arc<dyn AbstractManager>,
    shutdown: Arc<Notify>,
    logger: slog::Logger,
) -> Result<()> {
    let logger = logger.new(o!("module" => "web"));
    let routes = handlers::filters(manager);
    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(listen, async move { shutdown.notified().await })?;
    info!(logger, "Serving"; "address" => addr.to_string());
    server.await;
    debug!(logger, "Shutting down");
    Ok(())
}
