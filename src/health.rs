//! Kubernetes health-check handlers.
//!
//! | Probe | Question | Failure |
//! |---|---|---|
//! | **Liveness** | Is the process alive? | restart |
//! | **Readiness** | Can the pod serve traffic? | pulled from the load balancer |
//!
//! Register both without middleware so probes stay cheap and never need a
//! token:
//!
//! ```rust,ignore
//! let checks = Checks::new(config.build.clone(), Arc::new(pool));
//! app.handle_no_middleware(Method::GET, "v1", "/readiness", checks.readiness())
//!    .handle_no_middleware(Method::GET, "v1", "/liveness", checks.liveness())
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use serde::Serialize;
use tracing::info;

use crate::context::Context;
use crate::error::BoxError;
use crate::handler::{BoxFuture, Handler};
use crate::request::Request;
use crate::response::ResponseWriter;

/// How long readiness waits for the database before giving up.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(1);

/// A dependency that can report whether it is reachable.
#[async_trait]
pub trait StatusCheck: Send + Sync + 'static {
    async fn status_check(&self) -> Result<(), BoxError>;
}

#[async_trait]
impl StatusCheck for sqlx::PgPool {
    async fn status_check(&self) -> Result<(), BoxError> {
        sqlx::query("SELECT true").execute(self).await?;
        Ok(())
    }
}

/// Shared state of the probe handlers.
pub struct Checks {
    build: String,
    db: Arc<dyn StatusCheck>,
}

#[derive(Debug, Serialize)]
struct ReadyStatus {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct LiveStatus {
    status: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    build: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(rename = "podIP", skip_serializing_if = "String::is_empty")]
    pod_ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    node: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    workers: Option<usize>,
}

impl Checks {
    pub fn new(build: impl Into<String>, db: Arc<dyn StatusCheck>) -> Arc<Self> {
        Arc::new(Self { build: build.into(), db })
    }

    pub fn readiness(self: &Arc<Self>) -> Readiness {
        Readiness(Arc::clone(self))
    }

    pub fn liveness(self: &Arc<Self>) -> Liveness {
        Liveness(Arc::clone(self))
    }

    async fn ready(&self) -> (StatusCode, ReadyStatus) {
        let db = tokio::time::timeout(READINESS_TIMEOUT, self.db.status_check()).await;
        match db {
            Ok(Ok(())) => (StatusCode::OK, ReadyStatus { status: "ok" }),
            Ok(Err(e)) => {
                info!(error = %e, "readiness failure");
                (StatusCode::INTERNAL_SERVER_ERROR, ReadyStatus { status: "db not ready" })
            }
            Err(_) => {
                info!("readiness failure: database check timed out");
                (StatusCode::INTERNAL_SERVER_ERROR, ReadyStatus { status: "db not ready" })
            }
        }
    }

    fn live(&self) -> LiveStatus {
        let env = |key: &str| std::env::var(key).unwrap_or_default();
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unavailable".to_owned());
        LiveStatus {
            status: "up",
            build: self.build.clone(),
            host,
            name: env("KUBERNETES_NAME"),
            pod_ip: env("KUBERNETES_POD_IP"),
            node: env("KUBERNETES_NODE_NAME"),
            namespace: env("KUBERNETES_NAMESPACE"),
            workers: std::thread::available_parallelism().ok().map(|n| n.get()),
        }
    }
}

impl std::fmt::Debug for Checks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checks").field("build", &self.build).finish_non_exhaustive()
    }
}

/// Answers `{"status":"ok"}` when the database responds within
/// [`READINESS_TIMEOUT`], `500 {"status":"db not ready"}` otherwise. Never
/// returns an error, so a failing probe is not mistaken for a server fault.
pub struct Readiness(Arc<Checks>);

impl Handler for Readiness {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        _req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let (status, body) = self.0.ready().await;
            info!(status = body.status, "readiness");
            w.respond(ctx, status, &body)
        })
    }
}

/// Build and pod details. Always `200`.
pub struct Liveness(Arc<Checks>);

impl Handler for Liveness {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        _req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move { w.respond(ctx, StatusCode::OK, &self.0.live()) })
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;

    struct Db(Option<Duration>);

    #[async_trait]
    impl StatusCheck for Db {
        async fn status_check(&self) -> Result<(), BoxError> {
            match self.0 {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
                None => Err("connection refused".into()),
            }
        }
    }

    async fn probe(handler: &dyn Handler) -> (StatusCode, serde_json::Value) {
        let mut ctx = Context::new(CancellationToken::new(), None);
        let mut w = ResponseWriter::new(CancellationToken::new());
        let req = Request::from_http(http::Request::new(bytes::Bytes::new()), None);
        handler.call(&mut ctx, &mut w, &req).await.unwrap();
        let res = w.into_response();
        (res.status_code(), serde_json::from_slice(res.body()).unwrap())
    }

    #[tokio::test]
    async fn ready_database_answers_ok() {
        let checks = Checks::new("test", Arc::new(Db(Some(Duration::ZERO))));
        let (status, body) = probe(&checks.readiness()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn failing_database_is_not_ready() {
        let checks = Checks::new("test", Arc::new(Db(None)));
        let (status, body) = probe(&checks.readiness()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "db not ready");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_database_times_out() {
        let checks = Checks::new("test", Arc::new(Db(Some(Duration::from_secs(5)))));
        let (status, _) = probe(&checks.readiness()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn liveness_reports_build() {
        let checks = Checks::new("1.2.3", Arc::new(Db(None)));
        let (status, body) = probe(&checks.liveness()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "up");
        assert_eq!(body["build"], "1.2.3");
    }
}
