//! # tollgate
//!
//! A request pipeline for HTTP services behind a reverse proxy: ordered
//! middleware, bearer-token authentication, policy-driven authorization and
//! per-request database transactions.
//!
//! ## The contract
//!
//! Every request flows through the same fixed chain:
//!
//! ```text
//! logging → errors → metrics → panics → [authenticate → authorize → transaction] → handler
//! ```
//!
//! Handlers write at most one response into a [`ResponseWriter`] and return
//! `Ok(())` or a classified [`Error`]. The error layer turns every failure
//! into exactly one JSON response. Only [`Error::Shutdown`] travels past it,
//! and that asks the process to stop.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use http::{Method, StatusCode};
//! use tokio::sync::mpsc;
//! use tollgate::{App, BoxFuture, Context, Metrics, Request, ResponseWriter, Server, middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let metrics = Arc::new(Metrics::new());
//!     let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
//!
//!     let app = App::new(shutdown_tx, middleware::defaults(metrics))
//!         .handle(Method::GET, "v1", "/hello/:name", hello, []);
//!
//!     Server::bind("0.0.0.0:3000".parse()?).await?.serve(app, shutdown_rx).await?;
//!     Ok(())
//! }
//!
//! fn hello<'a>(ctx: &'a mut Context, w: &'a mut ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
//!     Box::pin(async move {
//!         let name = req.param("name").unwrap_or("world");
//!         w.respond(ctx, StatusCode::OK, &serde_json::json!({ "hello": name }))
//!     })
//! }
//! ```

mod context;
mod error;
mod handler;
mod metrics;
mod request;
mod response;
mod router;
mod server;

pub mod auth;
pub mod config;
pub mod health;
pub mod middleware;
pub mod order;
pub mod transaction;

pub use context::Context;
pub use error::{BoxError, Error, ErrorDocument, FieldError, ServerError};
pub use handler::{BoxFuture, BoxedHandler, Handler};
pub use metrics::{Metrics, Snapshot, Vars};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder, ResponseWriter};
pub use router::{App, ShutdownReason};
pub use server::Server;
