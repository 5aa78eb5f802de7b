//! Accept loop with graceful shutdown.

use std::future::Future;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::handler::SsoHandler;
use crate::service::SsoHttpService;

/// Serve connections from `listener` until `shutdown` resolves, then wait for
/// in-flight requests to finish.
///
/// Returns the number of connections accepted.
pub async fn serve<H, S>(listener: TcpListener, service: SsoHttpService<H>, shutdown: S) -> u64
where
    H: SsoHandler,
    S: Future<Output = ()>,
{
    let graceful = GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());
    let mut accepted: u64 = 0;

    tokio::pin!(shutdown);

    loop {
        let (stream, peer_addr) = tokio::select! {
            () = &mut shutdown => break,
            result = listener.accept() => match result {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
        };
        accepted += 1;
        debug!(%peer_addr, accepted, "accepted connection");

        let conn = graceful.watch(
            http.serve_connection(TokioIo::new(stream), service.clone())
                .into_owned(),
        );
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                error!(%peer_addr, error = %e, "connection error");
            }
        });
    }

    info!(accepted, "stopped accepting, draining connections");
    graceful.shutdown().await;
    info!("all connections drained");
    accepted
}
