mod common;

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use http::{Method, StatusCode};
use tollgate::middleware::{Middleware, Transact};
use tollgate::transaction::{Beginner, Transaction};
use tollgate::{App, BoxError, BoxFuture, Context, Error, Metrics, Request, ResponseWriter};

use common::{body, request};

#[derive(Default)]
struct Ledger {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
    fail_commit: bool,
    fail_rollback: bool,
}

struct Store(Arc<Ledger>);

struct MemoryTx {
    ledger: Arc<Ledger>,
    writes: Vec<String>,
}

#[async_trait]
impl Beginner for Store {
    async fn begin(&self) -> Result<Box<dyn Transaction>, BoxError> {
        self.0.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTx { ledger: Arc::clone(&self.0), writes: Vec::new() }))
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), BoxError> {
        if self.ledger.fail_commit {
            return Err("serialization failure".into());
        }
        assert_eq!(self.writes, ["insert user"]);
        self.ledger.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BoxError> {
        self.ledger.rolled_back.fetch_add(1, Ordering::SeqCst);
        if self.ledger.fail_rollback {
            return Err("connection lost".into());
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}

fn create<'a>(ctx: &'a mut Context, w: &'a mut ResponseWriter, _: &'a Request) -> BoxFuture<'a> {
    Box::pin(async move {
        let tx = ctx
            .transaction_mut::<MemoryTx>()
            .ok_or_else(|| Error::internal("no transaction in context"))?;
        tx.writes.push("insert user".to_owned());
        w.respond(ctx, StatusCode::CREATED, &serde_json::json!({ "created": true }))
    })
}

fn conflict<'a>(ctx: &'a mut Context, _: &'a mut ResponseWriter, _: &'a Request) -> BoxFuture<'a> {
    Box::pin(async move {
        assert!(ctx.has_transaction());
        Err(Error::request(StatusCode::CONFLICT, "email already registered"))
    })
}

fn stage_user() -> Result<(), Error> {
    panic!("index out of range while staging user")
}

fn crashed<'a>(ctx: &'a mut Context, _: &'a mut ResponseWriter, _: &'a Request) -> BoxFuture<'a> {
    Box::pin(async move {
        assert!(ctx.has_transaction());
        stage_user()
    })
}

fn app_with(ledger: &Arc<Ledger>) -> App {
    app_counting(ledger, &Arc::new(Metrics::new()))
}

fn app_counting(ledger: &Arc<Ledger>, metrics: &Arc<Metrics>) -> App {
    let (app, _rx) = common::app(metrics);
    let transact: Arc<dyn Middleware> = Arc::new(Transact::new(Arc::new(Store(Arc::clone(ledger)))));
    app.handle(Method::POST, "v1", "/userstran", create, [Arc::clone(&transact)])
        .handle(Method::POST, "v1", "/conflict", conflict, [Arc::clone(&transact)])
        .handle(Method::POST, "v1", "/crash", crashed, [transact])
}

#[tokio::test]
async fn success_commits_once() {
    let ledger = Arc::new(Ledger::default());
    let app = app_with(&ledger);

    let res = app.dispatch(request(Method::POST, "/v1/userstran")).await;
    assert_eq!(res.status_code(), StatusCode::CREATED);
    assert_eq!(ledger.begun.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.committed.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.rolled_back.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failure_rolls_back_once() {
    let ledger = Arc::new(Ledger::default());
    let app = app_with(&ledger);

    let res = app.dispatch(request(Method::POST, "/v1/conflict")).await;
    assert_eq!(res.status_code(), StatusCode::CONFLICT);
    assert_eq!(ledger.committed.load(Ordering::SeqCst), 0);
    assert_eq!(ledger.rolled_back.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_commit_replaces_success_with_internal_error() {
    let ledger = Arc::new(Ledger { fail_commit: true, ..Ledger::default() });
    let app = app_with(&ledger);

    let res = app.dispatch(request(Method::POST, "/v1/userstran")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&res), serde_json::json!({ "error": "Internal Server Error" }));
    assert_eq!(ledger.rolled_back.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_rollback_keeps_handler_outcome() {
    let ledger = Arc::new(Ledger { fail_rollback: true, ..Ledger::default() });
    let app = app_with(&ledger);

    let res = app.dispatch(request(Method::POST, "/v1/conflict")).await;
    assert_eq!(res.status_code(), StatusCode::CONFLICT);
    assert_eq!(body(&res)["error"], "email already registered");
    assert_eq!(ledger.rolled_back.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panic_rolls_back_before_it_is_contained() {
    common::init_tracing();
    let ledger = Arc::new(Ledger::default());
    let metrics = Arc::new(Metrics::new());
    let app = app_counting(&ledger, &metrics);

    let res = app.dispatch(request(Method::POST, "/v1/crash")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&res), serde_json::json!({ "error": "Internal Server Error" }));
    assert_eq!(ledger.begun.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.committed.load(Ordering::SeqCst), 0);
    assert_eq!(ledger.rolled_back.load(Ordering::SeqCst), 1);

    let snapshot = metrics.snapshot();
    assert_eq!((snapshot.requests, snapshot.errors, snapshot.panics), (1, 1, 1));
}

#[tokio::test]
async fn failed_rollback_after_panic_is_still_contained() {
    let ledger = Arc::new(Ledger { fail_rollback: true, ..Ledger::default() });
    let metrics = Arc::new(Metrics::new());
    let app = app_counting(&ledger, &metrics);

    let res = app.dispatch(request(Method::POST, "/v1/crash")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(ledger.rolled_back.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.snapshot().panics, 1);
}

#[tokio::test]
async fn denied_requests_open_no_transaction() {
    let ledger = Arc::new(Ledger::default());
    let auth = common::auth();
    let metrics = Arc::new(Metrics::new());
    let (app, _rx) = common::app(&metrics);
    let app = app.handle(Method::POST, "v1", "/userstran", create, [
        Arc::new(tollgate::middleware::Authenticate::new(Arc::clone(&auth))) as Arc<dyn Middleware>,
        Arc::new(Transact::new(Arc::new(Store(Arc::clone(&ledger))))),
    ]);

    let res = app.dispatch(request(Method::POST, "/v1/userstran")).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(ledger.begun.load(Ordering::SeqCst), 0);
}
