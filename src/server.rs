//! HTTP server and graceful shutdown.
//!
//! # Shutdown
//!
//! The server stops on whichever comes first: SIGTERM or Ctrl-C from the
//! OS, or a [`ShutdownReason`] the application sends through its shutdown
//! channel (see [`App::signal_shutdown`]). Either way it:
//!
//! 1. Stops `listener.accept()` so no new connections are made.
//! 2. Asks every open connection to finish its in-flight request and close.
//! 3. Returns from [`Server::serve`] once all connection tasks are done.
//!
//! Set `terminationGracePeriodSeconds` in the pod manifest to a value longer
//! than your slowest request.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::request::Request;
use crate::response::Response;
use crate::router::{App, ShutdownReason};

/// The HTTP server.
pub struct Server {
    listener: TcpListener,
    request_timeout: Option<Duration>,
}

impl Server {
    /// Binds the listening socket.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn run() -> Result<(), tollgate::ServerError> {
    /// let server = tollgate::Server::bind("0.0.0.0:3000".parse().unwrap()).await?;
    /// # Ok(()) }
    /// ```
    pub async fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, request_timeout: None })
    }

    /// Every request gets a deadline this far from the moment it arrives.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections and dispatches them through `app` until the OS
    /// or the application asks for shutdown, then drains.
    pub async fn serve(
        self,
        app: App,
        mut shutdown: mpsc::Receiver<ShutdownReason>,
    ) -> Result<(), ServerError> {
        let Self { listener, request_timeout } = self;
        let app = Arc::new(app);
        let stopping = CancellationToken::new();
        let mut tasks = tokio::task::JoinSet::new();

        let os_signal = shutdown_signal();
        tokio::pin!(os_signal);

        info!(addr = %listener.local_addr()?, "tollgate listening");

        loop {
            tokio::select! {
                // Shutdown arms first so a signal stops accepting immediately,
                // even if more connections are queued.
                biased;

                () = &mut os_signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                Some(ShutdownReason(reason)) = shutdown.recv() => {
                    warn!(%reason, in_flight = tasks.len(), "application requested shutdown, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let stopping = stopping.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { handle(app, req, remote_addr, request_timeout).await }
                        });

                        let builder = ConnBuilder::new(TokioExecutor::new());
                        let conn = builder.serve_connection(io, svc);
                        tokio::pin!(conn);

                        let res = tokio::select! {
                            res = conn.as_mut() => res,
                            () = stopping.cancelled() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = res {
                            debug!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        stopping.cancel();
        while tasks.join_next().await.is_some() {}

        info!("tollgate stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Collects the body and runs the pipeline on its own task.
///
/// hyper drops this future when the client disconnects. The drop guard then
/// cancels the request's token, so the pipeline sees the disconnect instead
/// of being torn down mid-await.
async fn handle(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    timeout: Option<Duration>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(peer = %remote_addr, "reading request body: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_inner());
        }
    };
    let req = Request::from_http(http::Request::from_parts(parts, body), Some(remote_addr));

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let task = tokio::spawn(async move { app.dispatch_with(req, cancel, deadline).await });

    let response = match task.await {
        Ok(response) => response,
        Err(e) => {
            error!(peer = %remote_addr, "request task failed: {e}");
            Response::status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    guard.disarm();

    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. A signal that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("installing Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("installing SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
