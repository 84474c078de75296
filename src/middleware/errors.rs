//! Translation of classified failures into responses.

use tracing::{error, info, warn};

use crate::context::Context;
use crate::handler::{BoxFuture, Handler};
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Turns an [`Error`](crate::Error) coming out of the chain into exactly one
/// JSON error response.
///
/// Every failure is absorbed here except [`Error::Shutdown`](crate::Error::Shutdown),
/// which is answered and then passed up so the dispatcher can stop the
/// process. A client that disconnected before the error body could be written
/// is logged and otherwise ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct Errors;

impl Middleware for Errors {
    fn name(&self) -> &'static str { "errors" }

    fn call<'a>(
        &'a self,
        next: &'a dyn Handler,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let Err(err) = next.call(ctx, w, req).await else {
                return Ok(());
            };

            if err.is_broken_connection() {
                info!(trace_id = %ctx.trace_id(), error = %err, "client went away");
                return Ok(());
            }

            if err.should_log() {
                error!(trace_id = %ctx.trace_id(), error = %err, source = ?err, "request failed");
            }

            if w.is_written() {
                warn!(
                    trace_id = %ctx.trace_id(),
                    status = err.status().as_u16(),
                    "response already written, error body dropped"
                );
            } else if let Err(write_err) = w.respond(ctx, err.status(), &err.document()) {
                if write_err.is_broken_connection() {
                    info!(trace_id = %ctx.trace_id(), error = %write_err, "client went away before error response");
                } else if !err.is_shutdown() {
                    return Err(write_err);
                }
            }

            if err.is_shutdown() {
                return Err(err);
            }
            Ok(())
        })
    }
}
