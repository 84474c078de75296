//! Per-request state.
//!
//! The dispatcher creates one [`Context`] right before the pipeline runs and
//! drops it once the response is produced. It is handed down the chain as
//! `&mut Context`, so there is exactly one owner at a time and no locking.

use std::future::Future;
use std::time::{Instant, SystemTime};

use http::StatusCode;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::Error;
use crate::transaction::Transaction;

/// Correlation id, timing, identity and transaction of one request.
pub struct Context {
    trace_id: Uuid,
    now: SystemTime,
    started: Instant,
    status: Option<StatusCode>,
    claims: Option<Claims>,
    transaction: Option<Box<dyn Transaction>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            now: SystemTime::now(),
            started: Instant::now(),
            status: None,
            claims: None,
            transaction: None,
            cancel,
            deadline,
        }
    }

    pub fn trace_id(&self) -> Uuid { self.trace_id }

    /// Wall-clock time the request was dispatched.
    pub fn now(&self) -> SystemTime { self.now }

    pub fn started(&self) -> Instant { self.started }

    /// Final status code, set by the first successful write.
    pub fn status(&self) -> Option<StatusCode> { self.status }

    pub(crate) fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn claims(&self) -> Option<&Claims> { self.claims.as_ref() }

    /// Attaches verified claims. Claims are immutable once attached.
    pub fn attach_claims(&mut self, claims: Claims) -> Result<(), Error> {
        if self.claims.is_some() {
            return Err(Error::internal("claims already attached to request"));
        }
        self.claims = Some(claims);
        Ok(())
    }

    pub fn has_transaction(&self) -> bool { self.transaction.is_some() }

    /// Downcasts the injected transaction to the store's concrete type.
    pub fn transaction_mut<T: Transaction>(&mut self) -> Option<&mut T> {
        self.transaction.as_mut()?.as_any_mut().downcast_mut::<T>()
    }

    pub(crate) fn attach_transaction(&mut self, tx: Box<dyn Transaction>) -> Result<(), Error> {
        if self.transaction.is_some() {
            return Err(Error::internal("transaction already open for request"));
        }
        self.transaction = Some(tx);
        Ok(())
    }

    pub(crate) fn take_transaction(&mut self) -> Option<Box<dyn Transaction>> {
        self.transaction.take()
    }

    /// Token cancelled when the peer disconnects.
    pub fn cancellation(&self) -> &CancellationToken { &self.cancel }

    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Runs `fut` until it completes, the request is cancelled, or the
    /// deadline passes, whichever comes first.
    /// The returned future owns its cancellation handles, so it does not
    /// borrow the context while it is pending.
    pub fn cancellable<F: Future>(
        &self,
        fut: F,
    ) -> impl Future<Output = Result<F::Output, Error>> + use<F> {
        let cancel = self.cancel.clone();
        let deadline = self.deadline;

        async move {
            let expired = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d.into()).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                out = fut => Ok(out),
                () = cancel.cancelled() => Err(Error::internal("request cancelled")),
                () = expired => Err(Error::internal("request deadline exceeded")),
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("trace_id", &self.trace_id)
            .field("status", &self.status)
            .field("claims", &self.claims)
            .field("transaction", &self.transaction.is_some())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
