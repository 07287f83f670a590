//! SQLite-backed record store.

use std::{str::FromStr, time::Duration};

use snafu::ResultExt as _;
use sqlx::{
    sqlite::{
        SqliteArguments, SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode,
        SqliteLockingMode, SqlitePoolOptions,
    },
    Sqlite, SqlitePool, Transaction,
};

use crate::{config::Config, error::Error, query::Statement};

use super::{
    arguments, store_action, store_context, RecordStore, StoreRow, StoreTransaction, Value,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the database at `path`, or a private in-memory database when `None`.
    pub async fn connect(path: Option<&str>) -> Result<Self, Error> {
        let context = || store_action("connect");

        let (opts, pool_opts) = match path {
            Some(path) => (
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true),
                SqlitePoolOptions::new(),
            ),
            // Connections to a shared in-memory database contend on table locks
            // that ignore the busy timeout, and the database vanishes with its last
            // connection. Keep exactly one, forever.
            None => (
                SqliteConnectOptions::from_str("sqlite::memory:").with_context(|_| context())?,
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None),
            ),
        };

        let opts = opts
            .journal_mode(SqliteJournalMode::Wal)
            .locking_mode(SqliteLockingMode::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .optimize_on_close(true, None)
            .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = pool_opts
            .connect_with(opts)
            .await
            .with_context(|_| context())?;

        tracing::debug!(path = path.unwrap_or(":memory:"), "connected to sqlite");

        Ok(Self { pool })
    }

    pub async fn connect_with(config: &Config) -> Result<Self, Error> {
        Self::connect(config.db_path.as_deref()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl RecordStore for SqliteStore {
    type Transaction = SqliteTransaction;

    async fn execute_script(&self, script: &Statement) -> Result<(), Error> {
        sqlx::raw_sql(script.sql())
            .execute(&self.pool)
            .await
            .context(store_context(script))?;
        Ok(())
    }

    async fn execute(&self, statement: &Statement, args: &[Value]) -> Result<u64, Error> {
        let args: SqliteArguments<'_> = arguments(statement, args)?;

        let result = sqlx::query_with::<Sqlite, _>(statement.sql(), args)
            .execute(&self.pool)
            .await
            .context(store_context(statement))?;

        Ok(result.rows_affected())
    }

    async fn fetch_optional<T: StoreRow>(
        &self,
        statement: &Statement,
        args: &[Value],
    ) -> Result<Option<T>, Error> {
        let args: SqliteArguments<'_> = arguments(statement, args)?;

        sqlx::query_as_with::<Sqlite, T, _>(statement.sql(), args)
            .fetch_optional(&self.pool)
            .await
            .context(store_context(statement))
    }

    async fn fetch_scalar(&self, statement: &Statement, args: &[Value]) -> Result<i64, Error> {
        let args: SqliteArguments<'_> = arguments(statement, args)?;

        sqlx::query_scalar_with::<Sqlite, i64, _>(statement.sql(), args)
            .fetch_one(&self.pool)
            .await
            .context(store_context(statement))
    }

    async fn begin(&self) -> Result<SqliteTransaction, Error> {
        let tx = self
            .pool
            .begin()
            .await
            .context(store_action("begin transaction"))?;

        Ok(SqliteTransaction { tx })
    }
}

pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTransaction for SqliteTransaction {
    async fn execute(&mut self, statement: &Statement, args: &[Value]) -> Result<u64, Error> {
        let args: SqliteArguments<'_> = arguments(statement, args)?;

        let result = sqlx::query_with::<Sqlite, _>(statement.sql(), args)
            .execute(&mut *self.tx)
            .await
            .context(store_context(statement))?;

        Ok(result.rows_affected())
    }

    async fn fetch_optional<T: StoreRow>(
        &mut self,
        statement: &Statement,
        args: &[Value],
    ) -> Result<Option<T>, Error> {
        let args: SqliteArguments<'_> = arguments(statement, args)?;

        sqlx::query_as_with::<Sqlite, T, _>(statement.sql(), args)
            .fetch_optional(&mut *self.tx)
            .await
            .context(store_context(statement))
    }

    async fn commit(self) -> Result<(), Error> {
        self.tx
            .commit()
            .await
            .context(store_action("commit transaction"))
    }
}
