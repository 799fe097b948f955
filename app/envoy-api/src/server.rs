//! HTTP server loop.

use crate::api::{create_router, AppState};
use crate::error::{ApiError, Result};
use envoy_core::CoreError;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::Service;

/// API server bound to a TCP port.
pub struct ApiServer {
    addr: SocketAddr,
    state: AppState,
}

impl ApiServer {
    /// Creates a server for the given address and state.
    #[must_use]
    pub const fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Runs the accept loop forever.
    ///
    /// Connections are served with upgrade support so the terminal
    /// endpoints can switch to WebSocket framing.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or accept.
    pub async fn run(&self) -> Result<()> {
        let app = create_router(self.state.clone());

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ApiError::Core(CoreError::external(format!("bind {}: {e}", self.addr))))?;
        tracing::info!("envoy API listening on {}", self.addr);

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| ApiError::Core(CoreError::external(format!("accept: {e}"))))?;

            let tower_service = app.clone();
            tokio::spawn(async move {
                let hyper_service =
                    hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        tower_service.clone().call(request)
                    });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), hyper_service)
                    .with_upgrades()
                    .await
                {
                    let err_str = err.to_string().to_lowercase();
                    if !err_str.contains("shutting down")
                        && !err_str.contains("connection reset")
                        && !err_str.contains("broken pipe")
                    {
                        tracing::error!("error serving connection: {err}");
                    }
                }
            });
        }
    }
}
