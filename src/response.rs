//! Outgoing HTTP response type and the response sink handlers write to.
//!
//! Handlers never return a response. They write one into the
//! [`ResponseWriter`] they are given, at most once, and return `Ok(())` or a
//! classified [`Error`]. The sink buffers the response until the pipeline has
//! fully unwound, then the dispatcher hands it to hyper.

use std::io;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::Error;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content-type values the pipeline produces.
#[derive(Clone, Copy, Debug)]
pub enum ContentType {
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
#[derive(Clone, Debug)]
pub struct Response {
    pub(crate) body: Bytes,
    pub(crate) headers: Vec<(HeaderName, HeaderValue)>,
    pub(crate) status: StatusCode,
}

impl Response {
    /// `200 OK` with a JSON body.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` with a plain-text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { body: Bytes::new(), headers: Vec::new(), status: code }
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn body(&self) -> &[u8] { &self.body }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }

    /// Converts into the hyper representation.
    pub fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        let headers = res.headers_mut();
        for (name, value) in self.headers {
            headers.append(name, value);
        }
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`]. Defaults to `200 OK`.
pub struct ResponseBuilder {
    headers: Vec<(HeaderName, HeaderValue)>,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Adds a header. Invalid names or values are dropped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(n), Ok(v)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.push((n, v));
        }
        self
    }

    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.bytes(ContentType::Json, body)
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.bytes(ContentType::Text, body.into())
    }

    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        let mut headers = vec![(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static(content_type.as_str()),
        )];
        headers.extend(self.headers);
        Response { body: body.into(), headers, status: self.status }
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(self) -> Response {
        Response { body: Bytes::new(), headers: self.headers, status: self.status }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// The mutable response sink of one request.
///
/// Accepts a single write. Writing after the peer went away fails with a
/// broken-pipe error, which the error layer recognises and swallows.
#[derive(Debug)]
pub struct ResponseWriter {
    response: Option<Response>,
    peer: CancellationToken,
}

impl ResponseWriter {
    /// `peer` is cancelled when the client disconnects.
    pub fn new(peer: CancellationToken) -> Self {
        Self { response: None, peer }
    }

    pub fn is_written(&self) -> bool { self.response.is_some() }

    /// Serialises `data` as JSON and writes it with `status`. `204` writes no
    /// body. Records the status in the request context.
    pub fn respond<T: Serialize + ?Sized>(
        &mut self,
        ctx: &mut Context,
        status: StatusCode,
        data: &T,
    ) -> Result<(), Error> {
        if status == StatusCode::NO_CONTENT {
            return self.write(ctx, Response::status(status));
        }
        let body = serde_json::to_vec(data)?;
        self.write(ctx, Response::builder().status(status).json(body))
    }

    /// Writes a prepared response.
    pub fn write(&mut self, ctx: &mut Context, response: impl IntoResponse) -> Result<(), Error> {
        if self.peer.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write after peer closed").into());
        }
        if self.response.is_some() {
            return Err(Error::internal("response already written"));
        }
        let response = response.into_response();
        ctx.set_status(response.status);
        self.response = Some(response);
        Ok(())
    }

    /// Withdraws a buffered response that must not reach the client.
    pub(crate) fn retract(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// The response to send. A request that wrote nothing answers an empty 200.
    pub fn into_response(self) -> Response {
        self.response.unwrap_or_else(|| Response::status(StatusCode::OK))
    }
}
