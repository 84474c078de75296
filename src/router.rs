//! Route registration and per-request dispatch.
//!
//! One radix tree per HTTP method. Every route is registered with its final,
//! fully composed handler: global stages wrap route stages wrap the business
//! handler. Dispatch only has to look the route up, build a fresh
//! [`Context`], and call it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info_span, warn};

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{Middleware, Pipeline};
use crate::request::Request;
use crate::response::{Response, ResponseWriter};

/// Why the application asked the process to stop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShutdownReason(pub String);

struct Route {
    handler: BoxedHandler,
    stages: Vec<&'static str>,
}

/// The application: routes, global middleware and the shutdown channel.
///
/// Build it once at startup, register routes, then pass it to
/// [`Server::serve`](crate::Server::serve) or call [`App::dispatch`] directly.
pub struct App {
    routes: HashMap<Method, MatchitRouter<Route>>,
    global: Vec<Arc<dyn Middleware>>,
    shutdown: mpsc::Sender<ShutdownReason>,
    shutdown_sent: AtomicBool,
}

impl App {
    /// `global` stages wrap every route registered with [`App::handle`];
    /// the first one is the outermost.
    pub fn new(shutdown: mpsc::Sender<ShutdownReason>, global: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            routes: HashMap::new(),
            global,
            shutdown,
            shutdown_sent: AtomicBool::new(false),
        }
    }

    /// Registers `handler` wrapped by the global stages and then by `stages`,
    /// so execution runs global → route → handler.
    ///
    /// `group` is a path prefix such as `"v1"`; pass `""` for none. Path
    /// parameters may be written `:name` or `{name}`.
    ///
    /// # Panics
    ///
    /// Panics if the path is invalid or conflicts with an existing route.
    pub fn handle(
        self,
        method: Method,
        group: &str,
        path: &str,
        handler: impl Handler,
        stages: impl IntoIterator<Item = Arc<dyn Middleware>>,
    ) -> Self {
        let pipeline = Pipeline::new().stages(self.global.iter().cloned()).stages(stages);
        self.add(method, group, path, Arc::new(handler), pipeline)
    }

    /// Registers `handler` with no middleware at all, for probes that must
    /// not carry auth or logging overhead.
    pub fn handle_no_middleware(self, method: Method, group: &str, path: &str, handler: impl Handler) -> Self {
        self.add(method, group, path, Arc::new(handler), Pipeline::new())
    }

    fn add(mut self, method: Method, group: &str, path: &str, handler: BoxedHandler, pipeline: Pipeline) -> Self {
        let path = route_path(group, path);
        let route = Route { handler: pipeline.build(handler), stages: pipeline.names() };
        self.routes
            .entry(method)
            .or_default()
            .insert(path.as_str(), route)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Ordered stage names of a registered route, outermost first.
    pub fn stages(&self, method: &Method, path: &str) -> Option<&[&'static str]> {
        let matched = self.routes.get(method)?.at(path).ok()?;
        Some(&matched.value.stages)
    }

    /// Sends the shutdown notification. Only the first call of an episode
    /// reaches the channel; later calls, and a full channel, are ignored.
    pub fn signal_shutdown(&self, reason: impl Into<String>) {
        if self.shutdown_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.shutdown.try_send(ShutdownReason(reason.into())) {
            warn!(error = %e, "shutdown notification not delivered");
        }
    }

    /// Routes one request and produces exactly one response.
    pub async fn dispatch(&self, req: Request) -> Response {
        self.dispatch_with(req, CancellationToken::new(), None).await
    }

    /// Like [`dispatch`](App::dispatch), with the request's cancellation
    /// token and optional deadline.
    pub async fn dispatch_with(
        &self,
        mut req: Request,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> Response {
        let handler = match self.lookup(&req) {
            Ok((handler, params)) => {
                req.set_params(params);
                handler
            }
            Err(status) => return not_routed(status),
        };

        let mut ctx = Context::new(cancel.clone(), deadline);
        let mut w = ResponseWriter::new(cancel);
        let span = info_span!("request", trace_id = %ctx.trace_id());

        let out = handler.call(&mut ctx, &mut w, &req).instrument(span).await;

        if let Err(err) = out {
            if err.is_shutdown() {
                error!(trace_id = %ctx.trace_id(), error = %err, "shutdown requested by request pipeline");
                self.signal_shutdown(err.to_string());
            } else if err.is_broken_connection() {
                warn!(trace_id = %ctx.trace_id(), error = %err, "client went away");
            } else {
                error!(trace_id = %ctx.trace_id(), error = %err, "unhandled error reached dispatcher");
                if !w.is_written() {
                    let _ = w.respond(&mut ctx, err.status(), &err.document());
                }
            }
        }

        w.into_response()
    }

    /// Finds the route for the request, or the status to answer with:
    /// 404 for an unknown path, 405 for a path known under other methods.
    fn lookup(&self, req: &Request) -> Result<(&BoxedHandler, HashMap<String, String>), StatusCode> {
        if let Some(matched) = self.routes.get(req.method()).and_then(|t| t.at(req.path()).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Ok((&matched.value.handler, params));
        }

        let elsewhere = self.routes.iter()
            .any(|(method, tree)| method != req.method() && tree.at(req.path()).is_ok());
        Err(if elsewhere { StatusCode::METHOD_NOT_ALLOWED } else { StatusCode::NOT_FOUND })
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("global", &Pipeline::new().stages(self.global.iter().cloned()))
            .field("shutdown_sent", &self.shutdown_sent)
            .finish_non_exhaustive()
    }
}

fn not_routed(status: StatusCode) -> Response {
    let body = serde_json::json!({ "error": status.canonical_reason().unwrap_or("Error") });
    Response::builder().status(status).json(body.to_string())
}

/// Joins the group prefix and rewrites `:name` segments to `{name}`.
fn route_path(group: &str, path: &str) -> String {
    let group = group.trim_matches('/');
    let full = if group.is_empty() {
        path.to_owned()
    } else {
        format!("/{group}/{}", path.trim_start_matches('/'))
    };

    full.split('/')
        .map(|seg| match seg.strip_prefix(':') {
            Some(name) => format!("{{{name}}}"),
            None => seg.to_owned(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_paths_are_normalised() {
        assert_eq!(route_path("v1", "/users/:user_id"), "/v1/users/{user_id}");
        assert_eq!(route_path("", "/users/{user_id}"), "/users/{user_id}");
        assert_eq!(route_path("/v1/", "readiness"), "/v1/readiness");
    }

    #[tokio::test]
    async fn shutdown_is_sent_once() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = App::new(tx, Vec::new());
        app.signal_shutdown("first");
        app.signal_shutdown("second");
        assert_eq!(rx.recv().await, Some(ShutdownReason("first".into())));
        assert!(rx.try_recv().is_err());
    }
}
