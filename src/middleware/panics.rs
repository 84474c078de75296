//! Panic containment.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use futures_util::FutureExt;
use tracing::error;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxFuture, Handler};
use crate::metrics::Metrics;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;

thread_local! {
    // Trace of the most recent panic on this thread. A panic unwinds on the
    // thread that polled the handler, which is the thread that catches it.
    static LAST_PANIC: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Chains a hook that records the panic site trace before the previous hook
/// runs.
fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

/// A panic caught below [`Panics`] that is being resumed after cleanup. It
/// carries the message and the panic site trace so they survive the thread
/// hop of an `.await` between the catch and the resume.
pub(crate) struct Unwound {
    message: String,
    trace: Option<String>,
}

impl Unwound {
    /// Captures the current thread's panic trace. Call right after catching.
    pub(crate) fn capture(payload: Box<dyn Any + Send>) -> Box<dyn Any + Send> {
        if payload.is::<Unwound>() {
            return payload;
        }
        let trace = LAST_PANIC.with(|slot| slot.borrow_mut().take()).map(|bt| bt.to_string());
        Box::new(Unwound { message: panic_message(payload.as_ref()), trace })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(unwound) = payload.downcast_ref::<Unwound>() {
        return unwound.message.clone();
    }
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

/// Converts a panic anywhere below into an internal error, counts it and logs
/// it with the trace captured at the panic site.
#[derive(Debug)]
pub struct Panics {
    metrics: Arc<Metrics>,
}

impl Panics {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        install_hook();
        Self { metrics }
    }
}

impl Middleware for Panics {
    fn name(&self) -> &'static str { "panics" }

    fn call<'a>(
        &'a self,
        next: &'a dyn Handler,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let trace_id = ctx.trace_id();
            match AssertUnwindSafe(next.call(ctx, w, req)).catch_unwind().await {
                Ok(out) => out,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    let trace = match payload.downcast_ref::<Unwound>() {
                        Some(unwound) => unwound.trace.clone(),
                        None => LAST_PANIC.with(|slot| slot.borrow_mut().take()).map(|bt| bt.to_string()),
                    }
                    .unwrap_or_default();

                    self.metrics.add_panics();
                    error!(trace_id = %trace_id, panic = %message, trace = %trace, "handler panicked");

                    Err(Error::internal(format!("PANIC [{message}]")))
                }
            }
        })
    }
}
