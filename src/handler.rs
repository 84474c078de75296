//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! The router needs to hold handlers of *different* types in a single radix
//! tree, and middleware needs to wrap "whatever comes next" without knowing
//! its type. Both go through the same trait object, [`BoxedHandler`]:
//!
//! ```text
//! fn create<'a>(ctx, w, req) -> BoxFuture<'a> { … }  ← user writes this
//!        ↓ app.handle(Method::POST, "v1", "/users", create, [...])
//! Arc::new(create)                                  ← Handler blanket impl
//!        ↓  wrapped by each middleware stage, outermost last
//! Arc<dyn Handler>                                  ← one vtable per stage
//!        ↓
//! handler.call(&mut ctx, &mut w, &req) at request time
//! ```
//!
//! A handler borrows the request context and the response sink for the
//! duration of its future, so the future carries the `'a` lifetime of those
//! borrows instead of being `'static`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::response::ResponseWriter;

/// A heap-allocated, type-erased future borrowing from the current request.
pub type BoxFuture<'a, T = Result<(), Error>> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Processes one request: reads `req`, writes at most one response into `w`,
/// and reports the outcome.
///
/// Implemented automatically for any function of the shape
///
/// ```text
/// fn name<'a>(ctx: &'a mut Context, w: &'a mut ResponseWriter, req: &'a Request) -> BoxFuture<'a>
/// ```
///
/// and implementable by hand for handler structs that carry dependencies.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        w: &'a mut ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a>;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context, &'a mut ResponseWriter, &'a Request) -> BoxFuture<'a>
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
        (self)(ctx, w, req)
    }
}
