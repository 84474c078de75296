mod common;

use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use jsonwebtoken::{EncodingKey, Header};
use tollgate::auth::{Auth, KeyStore, PolicyEngine, PolicyError, PolicyInput, ROLE_ADMIN, ROLE_USER, Rule, RuleSet};
use tollgate::middleware::{Authenticate, Authorize, Middleware};
use tollgate::{App, BoxFuture, Context, Metrics, Request, ResponseWriter};

use common::{ISSUER, KID, bearer, body, claims, private_pem, request, rogue_auth, token, trusted_keys};

fn whoami<'a>(ctx: &'a mut Context, w: &'a mut ResponseWriter, _: &'a Request) -> BoxFuture<'a> {
    Box::pin(async move {
        let sub = ctx.claims().map(|c| c.sub.clone()).unwrap_or_default();
        w.respond(ctx, StatusCode::OK, &serde_json::json!({ "sub": sub }))
    })
}

fn guarded(auth: &Arc<Auth>, rule: Rule) -> [Arc<dyn Middleware>; 2] {
    [
        Arc::new(Authenticate::new(Arc::clone(auth))),
        Arc::new(Authorize::new(Arc::clone(auth), rule)),
    ]
}

fn app_with(auth: &Arc<Auth>) -> App {
    let metrics = Arc::new(Metrics::new());
    let (app, _rx) = common::app(&metrics);
    app.handle(Method::GET, "v1", "/users/:user_id", whoami, guarded(auth, Rule::AdminOrSubject))
        .handle(Method::GET, "v1", "/admin", whoami, guarded(auth, Rule::AdminOnly))
        .handle(Method::GET, "v1", "/unauthenticated", whoami, [
            Arc::new(Authorize::new(Arc::clone(auth), Rule::AdminOnly)) as Arc<dyn Middleware>,
        ])
}

// ── Authentication ────────────────────────────────────────────────────────────

#[tokio::test]
async fn valid_credential_reaches_handler() {
    let auth = common::auth();
    let app = app_with(&auth);
    let token = token(&auth, &claims("alice", &[ROLE_USER], 3600));

    let res = app.dispatch(bearer(Method::GET, "/v1/users/alice", &token)).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res)["sub"], "alice");
}

#[tokio::test]
async fn missing_or_malformed_header_is_unauthorized() {
    let auth = common::auth();
    let app = app_with(&auth);

    let res = app.dispatch(request(Method::GET, "/v1/admin")).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(body(&res), serde_json::json!({ "error": "Unauthorized" }));

    let req = http::Request::get("/v1/admin")
        .header(http::header::AUTHORIZATION, "Basic YWxpY2U6c2VjcmV0")
        .body(bytes::Bytes::new())
        .unwrap();
    let res = app.dispatch(Request::from_http(req, None)).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_credential_is_unauthorized() {
    let auth = common::auth();
    let app = app_with(&auth);
    let token = token(&auth, &claims("alice", &[ROLE_ADMIN], -3600));

    let res = app.dispatch(bearer(Method::GET, "/v1/admin", &token)).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_kid_is_unauthorized() {
    let auth = common::auth();
    let app = app_with(&auth);

    let other = Auth::new(
        Arc::new(KeyStore::new().with_private_pem("retired-kid", &private_pem()).unwrap()),
        Arc::new(RuleSet::standard()),
        ISSUER,
    );
    let token = other.generate_token("retired-kid", &claims("alice", &[ROLE_ADMIN], 3600)).unwrap();

    let res = app.dispatch(bearer(Method::GET, "/v1/admin", &token)).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn untrusted_signature_is_unauthorized() {
    let auth = common::auth();
    let app = app_with(&auth);
    let token = token(&rogue_auth(), &claims("mallory", &[ROLE_ADMIN], 3600));

    let res = app.dispatch(bearer(Method::GET, "/v1/admin", &token)).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn symmetric_algorithm_is_rejected() {
    let auth = common::auth();
    let app = app_with(&auth);

    let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
    header.kid = Some(KID.to_owned());
    let token = jsonwebtoken::encode(
        &header,
        &claims("mallory", &[ROLE_ADMIN], 3600),
        &EncodingKey::from_secret(b"guessable"),
    )
    .unwrap();

    let res = app.dispatch(bearer(Method::GET, "/v1/admin", &token)).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn foreign_issuer_is_unauthorized() {
    let auth = common::auth();
    let app = app_with(&auth);
    let mut foreign = claims("alice", &[ROLE_ADMIN], 3600);
    foreign.iss = "someone-else".to_owned();

    let res = app.dispatch(bearer(Method::GET, "/v1/admin", &token(&auth, &foreign))).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

// ── Authorization ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn admin_only_rule() {
    let auth = common::auth();
    let app = app_with(&auth);

    let user = token(&auth, &claims("alice", &[ROLE_USER], 3600));
    let res = app.dispatch(bearer(Method::GET, "/v1/admin", &user)).await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(body(&res), serde_json::json!({ "error": "Forbidden" }));

    let admin = token(&auth, &claims("root", &[ROLE_ADMIN], 3600));
    let res = app.dispatch(bearer(Method::GET, "/v1/admin", &admin)).await;
    assert_eq!(res.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn subject_match_rule() {
    let auth = common::auth();
    let app = app_with(&auth);
    let alice = token(&auth, &claims("alice", &[ROLE_USER], 3600));

    let res = app.dispatch(bearer(Method::GET, "/v1/users/alice", &alice)).await;
    assert_eq!(res.status_code(), StatusCode::OK);

    let res = app.dispatch(bearer(Method::GET, "/v1/users/bob", &alice)).await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);

    let admin = token(&auth, &claims("root", &[ROLE_ADMIN], 3600));
    let res = app.dispatch(bearer(Method::GET, "/v1/users/bob", &admin)).await;
    assert_eq!(res.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn authorize_without_claims_is_unauthorized() {
    let auth = common::auth();
    let app = app_with(&auth);
    let admin = token(&auth, &claims("root", &[ROLE_ADMIN], 3600));

    let res = app.dispatch(bearer(Method::GET, "/v1/unauthenticated", &admin)).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

struct Unreachable;

#[async_trait]
impl PolicyEngine for Unreachable {
    async fn evaluate(&self, _rule: Rule, _input: &PolicyInput) -> Result<bool, PolicyError> {
        Err(PolicyError::Evaluation("policy service unreachable".to_owned()))
    }
}

#[tokio::test]
async fn engine_failure_is_internal() {
    let trusted = common::auth();
    let auth = Arc::new(Auth::new(Arc::new(trusted_keys()), Arc::new(Unreachable), ISSUER));
    let app = app_with(&auth);
    let admin = token(&trusted, &claims("root", &[ROLE_ADMIN], 3600));

    let res = app.dispatch(bearer(Method::GET, "/v1/admin", &admin)).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

    let empty = Arc::new(Auth::new(
        Arc::new(trusted_keys()),
        Arc::new(RuleSet::empty()),
        ISSUER,
    ));
    let res = app_with(&empty).dispatch(bearer(Method::GET, "/v1/admin", &admin)).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}
