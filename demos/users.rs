//! Users service wired through the full pipeline.
//!
//! Users live in memory; `/v1/userstran` stages its insert in an in-memory
//! transaction that is applied on commit. Readiness checks Postgres when
//! `DATABASE_URL` is set.
//!
//! ```text
//! TOLLGATE_AUTH_ISSUER=tollgate \
//! TOLLGATE_AUTH_KEYS_DIR=tests/fixtures/keys \
//! TOLLGATE_AUTH_ACTIVE_KID=54bb2165-71e1-41a6-af3e-7da4a0e1e2c1 \
//! cargo run --example users
//! ```

use std::any::Any;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tollgate::auth::{Auth, Claims, KeyStore, ROLE_ADMIN, ROLE_USER, Rule, RuleSet};
use tollgate::config::Config;
use tollgate::health::{Checks, StatusCheck};
use tollgate::middleware::{self, Authenticate, Authorize, Middleware, Transact};
use tollgate::order::{Direction, OrderBy};
use tollgate::transaction::{Beginner, Transaction};
use tollgate::{App, BoxError, BoxFuture, Context, Error, FieldError, Handler, Metrics, Request, ResponseWriter, Server, Vars};
use tracing::info;
use uuid::Uuid;

// ── Model ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct User {
    user_id: Uuid,
    name: String,
    email: String,
    roles: Vec<String>,
    enabled: bool,
    date_created: u64,
}

#[derive(Debug, Deserialize)]
struct NewUser {
    name: String,
    email: String,
    #[serde(default)]
    roles: Vec<String>,
}

impl NewUser {
    fn validate(&self) -> Result<(), Error> {
        let mut fields = Vec::new();
        if self.name.trim().is_empty() {
            fields.push(FieldError { field: "name".into(), error: "name is required".into() });
        }
        if !self.email.contains('@') {
            fields.push(FieldError { field: "email".into(), error: "email must be a valid address".into() });
        }
        if self.roles.is_empty() {
            fields.push(FieldError { field: "roles".into(), error: "at least one role is required".into() });
        }
        if let Some(role) = self.roles.iter().find(|r| *r != ROLE_ADMIN && *r != ROLE_USER) {
            fields.push(FieldError { field: "roles".into(), error: format!("unknown role {role}") });
        }
        if fields.is_empty() { Ok(()) } else { Err(Error::fields(fields)) }
    }

    fn into_user(self) -> User {
        User {
            user_id: Uuid::new_v4(),
            name: self.name,
            email: self.email,
            roles: self.roles,
            enabled: true,
            date_created: unix_now(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Store {
    users: RwLock<Vec<User>>,
}

impl Store {
    async fn insert(&self, user: User) -> Result<(), Error> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == user.email) {
            return Err(Error::request(StatusCode::CONFLICT, "email already registered"));
        }
        users.push(user);
        Ok(())
    }
}

struct MemoryBeginner(Arc<Store>);

struct MemoryTx {
    store: Arc<Store>,
    pending: Vec<User>,
}

#[async_trait]
impl Beginner for MemoryBeginner {
    async fn begin(&self) -> Result<Box<dyn Transaction>, BoxError> {
        Ok(Box::new(MemoryTx { store: Arc::clone(&self.0), pending: Vec::new() }))
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), BoxError> {
        let MemoryTx { store, pending } = *self;
        for user in pending {
            store.insert(user).await?;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BoxError> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}

/// Readiness stand-in when no database is configured.
struct AlwaysReady;

#[async_trait]
impl StatusCheck for AlwaysReady {
    async fn status_check(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// A handler function bound to the user store.
struct WithStore<F>(Arc<Store>, F);

impl<F> Handler for WithStore<F>
where
    F: for<'a> Fn(&'a Store, &'a mut Context, &'a mut ResponseWriter, &'a Request) -> BoxFuture<'a>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a> {
        (self.1)(&self.0, ctx, w, req)
    }
}

fn create<'a>(store: &'a Store, ctx: &'a mut Context, w: &'a mut ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
    Box::pin(async move {
        let new: NewUser = req.json()?;
        new.validate()?;
        let user = new.into_user();
        store.insert(user.clone()).await?;
        w.respond(ctx, StatusCode::CREATED, &user)
    })
}

fn create_tran<'a>(ctx: &'a mut Context, w: &'a mut ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
    Box::pin(async move {
        let new: NewUser = req.json()?;
        new.validate()?;
        let user = new.into_user();
        let tx = ctx
            .transaction_mut::<MemoryTx>()
            .ok_or_else(|| Error::internal("request has no user transaction"))?;
        tx.pending.push(user.clone());
        w.respond(ctx, StatusCode::CREATED, &user)
    })
}

const ORDER_FIELDS: [(&str, &str); 5] = [
    ("user_id", "user_id"),
    ("name", "name"),
    ("email", "email"),
    ("roles", "roles"),
    ("enabled", "enabled"),
];

fn positive(req: &Request, key: &str, default: usize) -> Result<usize, Error> {
    match req.query(key) {
        None => Ok(default),
        Some(v) => v
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| Error::field(key, "must be a positive integer")),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    items: Vec<User>,
    total: usize,
    page: usize,
    rows_per_page: usize,
}

fn list<'a>(store: &'a Store, ctx: &'a mut Context, w: &'a mut ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
    Box::pin(async move {
        let page = positive(req, "page", 1)?;
        let rows = positive(req, "rows", 10)?;
        let order = OrderBy::parse(req, OrderBy::new("user_id", Direction::Asc))?.resolve(&ORDER_FIELDS)?;

        let mut users = store.users.read().await.clone();
        users.sort_by(|a, b| {
            let ord = match order.field.as_str() {
                "name" => a.name.cmp(&b.name),
                "email" => a.email.cmp(&b.email),
                "roles" => a.roles.cmp(&b.roles),
                "enabled" => a.enabled.cmp(&b.enabled),
                _ => a.user_id.cmp(&b.user_id),
            };
            match order.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        });

        let total = users.len();
        let items = users.into_iter().skip((page - 1) * rows).take(rows).collect();
        w.respond(ctx, StatusCode::OK, &Page { items, total, page, rows_per_page: rows })
    })
}

fn query_by_id<'a>(store: &'a Store, ctx: &'a mut Context, w: &'a mut ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
    Box::pin(async move {
        let id = req.param("user_id").unwrap_or_default();
        let id: Uuid = id.parse().map_err(|_| Error::field("user_id", "must be a uuid"))?;
        let user = store.users.read().await.iter().find(|u| u.user_id == id).cloned();
        match user {
            Some(user) => w.respond(ctx, StatusCode::OK, &user),
            None => Err(Error::request(StatusCode::NOT_FOUND, format!("user {id} not found"))),
        }
    })
}

// ── Wiring ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!(?config, "starting users service");

    let keys = KeyStore::from_dir(&config.auth_keys_dir)?;
    let auth = Arc::new(Auth::new(Arc::new(keys), Arc::new(RuleSet::standard()), config.auth_issuer.clone()));

    if let Some(kid) = &config.auth_active_kid {
        let now = unix_now();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            roles: vec![ROLE_ADMIN.to_owned()],
            iss: config.auth_issuer.clone(),
            iat: now,
            exp: now + 3600,
        };
        let token = auth.generate_token(kid, &claims)?;
        info!(%token, "development admin token, valid for one hour");
    }

    let db: Arc<dyn StatusCheck> = match &config.database_url {
        Some(url) => Arc::new(sqlx::PgPool::connect_lazy(url)?),
        None => Arc::new(AlwaysReady),
    };
    let checks = Checks::new(config.build.clone(), db);

    let store = Arc::new(Store::default());
    let metrics = Arc::new(Metrics::new());
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let authenticate = || -> Arc<dyn Middleware> { Arc::new(Authenticate::new(Arc::clone(&auth))) };
    let authorize = |rule| -> Arc<dyn Middleware> { Arc::new(Authorize::new(Arc::clone(&auth), rule)) };
    let transact: Arc<dyn Middleware> = Arc::new(Transact::new(Arc::new(MemoryBeginner(Arc::clone(&store)))));

    let app = App::new(shutdown_tx, middleware::defaults(Arc::clone(&metrics)))
        .handle_no_middleware(Method::GET, "v1", "/readiness", checks.readiness())
        .handle_no_middleware(Method::GET, "v1", "/liveness", checks.liveness())
        .handle_no_middleware(Method::GET, "debug", "/vars", Vars(Arc::clone(&metrics)))
        .handle(Method::POST, "v1", "/users", WithStore(Arc::clone(&store), create), [])
        .handle(
            Method::POST, "v1", "/usersauth",
            WithStore(Arc::clone(&store), create),
            [authenticate(), authorize(Rule::AdminOnly)],
        )
        .handle(
            Method::POST, "v1", "/userstran",
            create_tran,
            [authenticate(), authorize(Rule::AdminOnly), transact],
        )
        .handle(
            Method::GET, "v1", "/users",
            WithStore(Arc::clone(&store), list),
            [authenticate(), authorize(Rule::AdminOnly)],
        )
        .handle(
            Method::GET, "v1", "/users/:user_id",
            WithStore(Arc::clone(&store), query_by_id),
            [authenticate(), authorize(Rule::AdminOrSubject)],
        );

    let mut server = Server::bind(config.addr).await?;
    if let Some(timeout) = config.request_timeout {
        server = server.request_timeout(timeout);
    }
    server.serve(app, shutdown_rx).await?;
    Ok(())
}
