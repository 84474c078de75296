#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::Method;
use tokio::sync::mpsc;
use tollgate::auth::{Auth, Claims, KeyStore, RuleSet};
use tollgate::{App, Metrics, Request, Response, ShutdownReason, middleware};

pub const KID: &str = "54bb2165-71e1-41a6-af3e-7da4a0e1e2c1";
pub const ISSUER: &str = "tollgate-test";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixtures(dir: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(dir)
}

pub fn trusted_keys() -> KeyStore {
    KeyStore::from_dir(fixtures("keys")).unwrap()
}

pub fn private_pem() -> String {
    std::fs::read_to_string(fixtures("keys").join(format!("{KID}.pem"))).unwrap()
}

/// Verifier trusting the fixture key pair.
pub fn auth() -> Arc<Auth> {
    Arc::new(Auth::new(Arc::new(trusted_keys()), Arc::new(RuleSet::standard()), ISSUER))
}

/// Signer holding a different private key under the trusted kid.
pub fn rogue_auth() -> Auth {
    let keys = KeyStore::from_dir(fixtures("rogue")).unwrap();
    Auth::new(Arc::new(keys), Arc::new(RuleSet::standard()), ISSUER)
}

pub fn claims(sub: &str, roles: &[&str], ttl_secs: i64) -> Claims {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    Claims {
        sub: sub.to_owned(),
        roles: roles.iter().map(|r| (*r).to_owned()).collect(),
        iss: ISSUER.to_owned(),
        iat: now,
        exp: now.saturating_add_signed(ttl_secs),
    }
}

pub fn token(auth: &Auth, claims: &Claims) -> String {
    auth.generate_token(KID, claims).unwrap()
}

pub fn request(method: Method, uri: &str) -> Request {
    let req = http::Request::builder().method(method).uri(uri).body(Bytes::new()).unwrap();
    Request::from_http(req, None)
}

pub fn bearer(method: Method, uri: &str, token: &str) -> Request {
    let req = http::Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Bytes::new())
        .unwrap();
    Request::from_http(req, None)
}

pub fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request {
    let req = http::Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Bytes::from(body.to_string()))
        .unwrap();
    Request::from_http(req, None)
}

pub fn body(res: &Response) -> serde_json::Value {
    serde_json::from_slice(res.body()).unwrap()
}

/// An app with the default global stages and its shutdown receiver.
pub fn app(metrics: &Arc<Metrics>) -> (App, mpsc::Receiver<ShutdownReason>) {
    let (tx, rx) = mpsc::channel(1);
    (App::new(tx, middleware::defaults(Arc::clone(metrics))), rx)
}
