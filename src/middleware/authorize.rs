//! Rule evaluation against attached claims.

use std::sync::Arc;

use tracing::{debug, error};

use crate::auth::{Auth, PolicyInput, Rule};
use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxFuture, Handler};
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Path parameter handed to rules as the target user id.
pub const USER_ID_PARAM: &str = "user_id";

/// Asks the policy engine whether `rule` allows the current caller.
///
/// Wires claims and the `user_id` path parameter into a [`PolicyInput`] and
/// interprets the verdict. A request with no claims is denied as anonymous.
#[derive(Clone, Debug)]
pub struct Authorize {
    auth: Arc<Auth>,
    rule: Rule,
}

impl Authorize {
    pub fn new(auth: Arc<Auth>, rule: Rule) -> Self {
        Self { auth, rule }
    }

    pub fn rule(&self) -> Rule { self.rule }
}

impl Middleware for Authorize {
    fn name(&self) -> &'static str { "authorize" }

    fn call<'a>(
        &'a self,
        next: &'a dyn Handler,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let Some(claims) = ctx.claims() else {
                return Err(Error::Authorization {
                    reason: format!("rule {} requires an authenticated caller", self.rule),
                    anonymous: true,
                });
            };

            let input = PolicyInput {
                rule: self.rule,
                roles: claims.roles.clone(),
                subject: claims.sub.clone(),
                user_id: req.param(USER_ID_PARAM).map(str::to_owned),
            };

            let verdict = ctx
                .cancellable(self.auth.policy().evaluate(self.rule, &input))
                .await?
                .map_err(|e| {
                    error!(trace_id = %ctx.trace_id(), rule = %self.rule, error = %e, "policy evaluation failed");
                    Error::internal(e)
                })?;

            if !verdict {
                debug!(trace_id = %ctx.trace_id(), rule = %self.rule, subject = %input.subject, "rule denied");
                return Err(Error::forbidden(format!(
                    "rule {} denied subject {}",
                    self.rule, input.subject
                )));
            }

            next.call(ctx, w, req).await
        })
    }
}
