//! Storage transaction contracts.
//!
//! The pipeline never talks to a database. It only needs something that can
//! open a transaction ([`Beginner`]) and a transaction that can be committed or
//! rolled back ([`Transaction`]). The store decides what a transaction is;
//! handlers get it back through [`Context::transaction_mut`](crate::Context::transaction_mut).

use std::any::Any;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres};

use crate::error::BoxError;

/// Opens storage transactions.
#[async_trait]
pub trait Beginner: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn Transaction>, BoxError>;
}

/// An open transaction. Consumed by exactly one of `commit` or `rollback`.
#[async_trait]
pub trait Transaction: Any + Send {
    async fn commit(self: Box<Self>) -> Result<(), BoxError>;

    async fn rollback(self: Box<Self>) -> Result<(), BoxError>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[async_trait]
impl Beginner for PgPool {
    async fn begin(&self) -> Result<Box<dyn Transaction>, BoxError> {
        let tx = sqlx::Pool::begin(self).await?;
        Ok(Box::new(tx))
    }
}

#[async_trait]
impl Transaction for sqlx::Transaction<'static, Postgres> {
    async fn commit(self: Box<Self>) -> Result<(), BoxError> {
        sqlx::Transaction::commit(*self).await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BoxError> {
        sqlx::Transaction::rollback(*self).await?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}
