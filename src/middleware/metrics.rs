//! Request / error counting.

use std::sync::Arc;

use crate::context::Context;
use crate::handler::{BoxFuture, Handler};
use crate::metrics::Metrics;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Default request interval at which the concurrency sample is requested.
pub const DEFAULT_SAMPLE_EVERY: u64 = 1000;

/// Counts every completed invocation and every failed one.
#[derive(Debug)]
pub struct MetricsLayer {
    metrics: Arc<Metrics>,
    sample_every: u64,
}

impl MetricsLayer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics, sample_every: DEFAULT_SAMPLE_EVERY }
    }

    pub fn sample_every(mut self, requests: u64) -> Self {
        self.sample_every = requests.max(1);
        self
    }
}

impl Middleware for MetricsLayer {
    fn name(&self) -> &'static str { "metrics" }

    fn call<'a>(
        &'a self,
        next: &'a dyn Handler,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let out = next.call(ctx, w, req).await;

            let n = self.metrics.add_requests();
            if n % self.sample_every == 0 {
                self.metrics.sample_concurrency(n);
            }
            if out.is_err() {
                self.metrics.add_errors();
            }

            out
        })
    }
}
