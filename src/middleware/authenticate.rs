//! Bearer credential verification.

use std::sync::Arc;

use http::header::AUTHORIZATION;
use tracing::debug;

use crate::auth::Auth;
use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxFuture, Handler};
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Verifies the `Authorization: Bearer` credential and attaches its claims to
/// the request context. Makes no authorization decision.
#[derive(Clone, Debug)]
pub struct Authenticate {
    auth: Arc<Auth>,
}

impl Authenticate {
    pub fn new(auth: Arc<Auth>) -> Self {
        Self { auth }
    }
}

impl Middleware for Authenticate {
    fn name(&self) -> &'static str { "authenticate" }

    fn call<'a>(
        &'a self,
        next: &'a dyn Handler,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let header = req
                .header(AUTHORIZATION.as_str())
                .ok_or_else(|| Error::authentication("missing authorization header"))?;

            let claims = self.auth.authenticate(header).map_err(|e| {
                debug!(trace_id = %ctx.trace_id(), error = %e, "credential rejected");
                Error::authentication(e.to_string())
            })?;

            ctx.attach_claims(claims)?;
            next.call(ctx, w, req).await
        })
    }
}
