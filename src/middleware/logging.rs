//! Request start / completion events.

use tracing::info;

use crate::context::Context;
use crate::handler::{BoxFuture, Handler};
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Logs "request started" before the chain runs and "request completed"
/// after it, whatever the outcome.
#[derive(Clone, Copy, Debug, Default)]
pub struct Logging;

impl Middleware for Logging {
    fn name(&self) -> &'static str { "logging" }

    fn call<'a>(
        &'a self,
        next: &'a dyn Handler,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let path = req.path_and_query();
            let remote_addr = req.remote_addr().map(|a| a.to_string()).unwrap_or_default();

            info!(
                trace_id = %ctx.trace_id(),
                method = %req.method(),
                path = %path,
                remote_addr = %remote_addr,
                "request started"
            );

            let out = next.call(ctx, w, req).await;

            info!(
                trace_id = %ctx.trace_id(),
                method = %req.method(),
                path = %path,
                remote_addr = %remote_addr,
                status = ctx.status().map(|s| s.as_u16()).unwrap_or_default(),
                elapsed = ?ctx.started().elapsed(),
                "request completed"
            );

            out
        })
    }
}
