//! Record store adapter.
//!
//! The state machine talks to the backing store only through [`RecordStore`] and
//! [`StoreTransaction`]: run a prepared [`Statement`] with bound [`Value`]s and get
//! back an affected-row count, at most one typed row, or a scalar.
//!
//! Store failures are wrapped with the statement's operation and returned; this
//! layer never retries.
//!
//! Transactions are scoped by ownership. [`RecordStore::begin`] hands out a
//! transaction that is committed only by an explicit
//! [`StoreTransaction::commit`]; dropping it on any other path (an early `?`
//! return, a panic, a cancelled future) rolls it back.

use std::future::Future;

use snafu::ResultExt as _;
use sqlx::{any::AnyRow, sqlite::SqliteRow, Arguments, Encode, FromRow, Type};

use crate::{
    error::{Error, StoreSnafu},
    query::Statement,
};

pub mod any;
pub mod sqlite;

pub use any::AnyStore;
pub use sqlite::SqliteStore;

/// A bound statement argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Blob(value.to_vec())
    }
}

/// A row type every store adapter can decode.
pub trait StoreRow:
    for<'r> FromRow<'r, SqliteRow> + for<'r> FromRow<'r, AnyRow> + Send + Unpin + 'static
{
}

impl<T> StoreRow for T where
    T: for<'r> FromRow<'r, SqliteRow> + for<'r> FromRow<'r, AnyRow> + Send + Unpin + 'static
{
}

pub trait RecordStore: Send + Sync + 'static {
    type Transaction: StoreTransaction;

    /// Runs a multi-statement script without parameters (schema bootstrap).
    fn execute_script(&self, script: &Statement) -> impl Future<Output = Result<(), Error>> + Send;

    /// Runs a statement and returns the number of affected rows.
    fn execute(
        &self,
        statement: &Statement,
        args: &[Value],
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Runs a statement and decodes its first row, if any.
    fn fetch_optional<T: StoreRow>(
        &self,
        statement: &Statement,
        args: &[Value],
    ) -> impl Future<Output = Result<Option<T>, Error>> + Send;

    /// Runs a statement that yields exactly one integer (a count or a new id).
    fn fetch_scalar(
        &self,
        statement: &Statement,
        args: &[Value],
    ) -> impl Future<Output = Result<i64, Error>> + Send;

    fn begin(&self) -> impl Future<Output = Result<Self::Transaction, Error>> + Send;
}

/// An open transaction. Rolled back when dropped without [`commit`](Self::commit).
pub trait StoreTransaction: Send {
    fn execute(
        &mut self,
        statement: &Statement,
        args: &[Value],
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    fn fetch_optional<T: StoreRow>(
        &mut self,
        statement: &Statement,
        args: &[Value],
    ) -> impl Future<Output = Result<Option<T>, Error>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Binds `values` in order into a fresh argument buffer for any sqlx backend.
pub(crate) fn arguments<'q, A>(statement: &Statement, values: &'q [Value]) -> Result<A, Error>
where
    A: Arguments<'q>,
    i64: Encode<'q, A::Database> + Type<A::Database>,
    &'q [u8]: Encode<'q, A::Database> + Type<A::Database>,
{
    let mut args = A::default();

    for value in values {
        match value {
            Value::Integer(v) => args.add(*v),
            Value::Blob(v) => args.add(v.as_slice()),
        }
        .map_err(sqlx::Error::Encode)
        .context(store_context(statement))?;
    }

    Ok(args)
}

pub(crate) fn store_context(statement: &Statement) -> StoreSnafu<String> {
    StoreSnafu {
        action: statement.operation().to_string(),
    }
}

pub(crate) fn store_action(action: &str) -> StoreSnafu<String> {
    StoreSnafu {
        action: action.to_owned(),
    }
}
