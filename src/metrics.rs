//! Process-wide request counters.
//!
//! One [`Metrics`] value is built at startup and shared by handle with the
//! metrics and panic stages. All updates are relaxed atomic operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use http::StatusCode;
use serde::Serialize;

use crate::context::Context;
use crate::handler::{BoxFuture, Handler};
use crate::request::Request;
use crate::response::ResponseWriter;

/// Default refresh interval of the concurrency sample, in requests.
pub const DEFAULT_REFRESH_EVERY: u64 = 100;

#[derive(Debug)]
pub struct Metrics {
    requests: AtomicU64,
    errors: AtomicU64,
    panics: AtomicU64,
    concurrency: AtomicU64,
    refresh_every: u64,
}

/// Point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub requests: u64,
    pub errors: u64,
    pub panics: u64,
    pub concurrency: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::with_refresh_every(DEFAULT_REFRESH_EVERY)
    }

    /// The concurrency sample only refreshes when the request count is a
    /// multiple of `refresh_every`.
    pub fn with_refresh_every(refresh_every: u64) -> Self {
        Self {
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            concurrency: AtomicU64::new(0),
            refresh_every: refresh_every.max(1),
        }
    }

    /// Returns the new request count.
    pub fn add_requests(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_errors(&self) -> u64 {
        self.errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_panics(&self) -> u64 {
        self.panics.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Resamples the number of live runtime tasks for request number
    /// `requests`, as returned by [`add_requests`](Self::add_requests).
    /// Returns the new sample, or `None` when that count is not on a refresh
    /// boundary or no runtime is running.
    pub fn sample_concurrency(&self, requests: u64) -> Option<u64> {
        if requests % self.refresh_every != 0 {
            return None;
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let alive = handle.metrics().num_alive_tasks() as u64;
        self.concurrency.store(alive, Ordering::Relaxed);
        Some(alive)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            concurrency: self.concurrency.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self { Self::new() }
}

/// Serves the counters as JSON for scraping. Register it without middleware
/// so scrapes do not count as requests.
pub struct Vars(pub Arc<Metrics>);

impl Handler for Vars {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        _req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move { w.respond(ctx, StatusCode::OK, &self.0.snapshot()) })
    }
}
