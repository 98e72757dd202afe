//! Status server

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;

use super::routes::{routes, HttpState};
use crate::observability::{Event, Logger};

/// Serve the routes on `addr` until `shutdown` flips to true.
pub async fn serve(
    addr: SocketAddr,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    Logger::event(
        Event::Serving,
        &[("addr", &local.to_string()), ("surface", "http")],
    );

    axum::serve(listener, routes(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}
