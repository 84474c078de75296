//! Transaction scoping.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{error, warn};

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxFuture, Handler};
use crate::middleware::Middleware;
use crate::middleware::panics::Unwound;
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::transaction::Beginner;

/// Runs the wrapped handler inside a storage transaction.
///
/// Commits on success and rolls back on any failure, exactly once. A failed
/// commit turns the request into an internal error and withdraws the success
/// response; a failed rollback is logged and the handler's own error is kept.
/// A panic below rolls back and then keeps unwinding to [`Panics`](super::Panics).
#[derive(Clone)]
pub struct Transact {
    beginner: Arc<dyn Beginner>,
}

impl Transact {
    pub fn new(beginner: Arc<dyn Beginner>) -> Self {
        Self { beginner }
    }
}

impl std::fmt::Debug for Transact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transact").finish_non_exhaustive()
    }
}

impl Middleware for Transact {
    fn name(&self) -> &'static str { "transaction" }

    fn call<'a>(
        &'a self,
        next: &'a dyn Handler,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let tx = ctx
                .cancellable(self.beginner.begin())
                .await?
                .map_err(|e| Error::internal(format!("begin transaction: {e}")))?;
            ctx.attach_transaction(tx)?;

            let caught = AssertUnwindSafe(next.call(ctx, w, req)).catch_unwind().await;
            let out = match caught {
                Ok(out) => out,
                Err(payload) => {
                    let payload = Unwound::capture(payload);
                    if let Some(tx) = ctx.take_transaction() {
                        if let Err(e) = tx.rollback().await {
                            error!(trace_id = %ctx.trace_id(), error = %e, "rollback after panic failed");
                        }
                    }
                    panic::resume_unwind(payload);
                }
            };

            let Some(tx) = ctx.take_transaction() else {
                warn!(trace_id = %ctx.trace_id(), "transaction vanished from request context");
                return out;
            };

            match out {
                Ok(()) => {
                    if let Err(e) = tx.commit().await {
                        w.retract();
                        return Err(Error::internal(format!("commit transaction: {e}")));
                    }
                    Ok(())
                }
                Err(err) => {
                    if let Err(e) = tx.rollback().await {
                        error!(
                            trace_id = %ctx.trace_id(),
                            error = %e,
                            outcome = %err,
                            "rollback transaction failed"
                        );
                    }
                    Err(err)
                }
            }
        })
    }
}
