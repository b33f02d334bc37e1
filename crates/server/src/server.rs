//! HTTP server lifecycle

use crate::router::Router;
use crate::state::AppState;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Serve until `shutdown` resolves, then drain in-flight requests
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()>,
) -> Result<(), hyper::Error> {
    let router = Arc::new(Router::new(state));

    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let router = Arc::clone(&router);
        let remote_addr = conn.remote_addr();

        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let router = Arc::clone(&router);
                async move { Ok::<_, Infallible>(router.route(req, remote_addr.ip()).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!("remote cache listening on http://{}", server.local_addr());

    match server.with_graceful_shutdown(shutdown).await {
        Ok(()) => {
            info!("server stopped");
            Ok(())
        }
        Err(e) => {
            error!("server error: {}", e);
            Err(e)
        }
    }
}
