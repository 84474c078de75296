mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tollgate::{App, BoxFuture, Context, Error, Metrics, Request, ResponseWriter, Server, middleware};

fn hello<'a>(ctx: &'a mut Context, w: &'a mut ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
    Box::pin(async move {
        let name = req.param("name").unwrap_or("world");
        w.respond(ctx, StatusCode::OK, &serde_json::json!({ "hello": name }))
    })
}

fn halt<'a>(_: &'a mut Context, _: &'a mut ResponseWriter, _: &'a Request) -> BoxFuture<'a> {
    Box::pin(async { Err(Error::shutdown("stored state is corrupt")) })
}

async fn roundtrip(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn serves_then_drains_on_application_shutdown() {
    common::init_tracing();
    let metrics = Arc::new(Metrics::new());
    let (tx, rx) = mpsc::channel(1);
    let app = App::new(tx, middleware::defaults(Arc::clone(&metrics)))
        .handle(Method::GET, "v1", "/hello/:name", hello, [])
        .handle(Method::POST, "v1", "/halt", halt, []);

    let server = Server::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
        .request_timeout(Duration::from_secs(5));
    let addr = server.local_addr().unwrap();
    let serving = tokio::spawn(server.serve(app, rx));

    let res = roundtrip(addr, "GET /v1/hello/ada HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(res.starts_with("HTTP/1.1 200 OK"), "{res}");
    assert!(res.ends_with(r#"{"hello":"ada"}"#), "{res}");

    let res = roundtrip(
        addr,
        "POST /v1/halt HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(res.starts_with("HTTP/1.1 500"), "{res}");

    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(metrics.snapshot().requests, 2);
}
