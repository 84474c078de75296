//! Middleware layer.
//!
//! A [`Middleware`] sees every request before the handler it wraps and every
//! outcome after it. [`Pipeline`] composes an ordered list of them around a
//! handler once, at route registration, so the order of a route is fixed and
//! can be inspected without sending traffic.
//!
//! The stages [`defaults`] returns are applied to every route, outermost
//! first:
//!
//! ```text
//! logging → errors → metrics → panics → [route stages] → handler
//! ```
//!
//! Route stages usually are [`Authenticate`] → [`Authorize`] → [`Transact`].

mod authenticate;
mod authorize;
mod errors;
mod logging;
mod metrics;
mod panics;
mod transact;

use std::sync::Arc;

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::metrics::Metrics;
use crate::request::Request;
use crate::response::ResponseWriter;

pub use authenticate::Authenticate;
pub use authorize::Authorize;
pub use errors::Errors;
pub use logging::Logging;
pub use metrics::MetricsLayer;
pub use panics::Panics;
pub use transact::Transact;

/// A cross-cutting behaviour wrapped around a handler.
///
/// `call` receives the next stage. It must call it at most once, must not
/// write more than one response, and must return failures it does not fully
/// handle.
pub trait Middleware: Send + Sync + 'static {
    /// Stable stage name used for inspection and logs.
    fn name(&self) -> &'static str;

    fn call<'a>(
        &'a self,
        next: &'a dyn Handler,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a>;
}

/// The global stage set: logging, errors, metrics, panics.
pub fn defaults(metrics: Arc<Metrics>) -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(Logging),
        Arc::new(Errors),
        Arc::new(MetricsLayer::new(Arc::clone(&metrics))),
        Arc::new(Panics::new(metrics)),
    ]
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Ordered list of stages; the first stage is the outermost.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage inside every stage already added.
    pub fn stage(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.stages.push(middleware);
        self
    }

    pub fn stages(mut self, middlewares: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        self.stages.extend(middlewares);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|m| m.name()).collect()
    }

    /// Wraps `handler` so that stage 0 runs first and unwinds last.
    pub fn build(&self, handler: BoxedHandler) -> BoxedHandler {
        self.stages.iter().rev().fold(handler, |next, middleware| -> BoxedHandler {
            Arc::new(Layered { middleware: Arc::clone(middleware), next })
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// One middleware bound to the handler it wraps.
struct Layered {
    middleware: Arc<dyn Middleware>,
    next: BoxedHandler,
}

impl Handler for Layered {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a> {
        self.middleware.call(self.next.as_ref(), ctx, w, req)
    }
}
