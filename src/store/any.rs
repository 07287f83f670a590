//! Record store over sqlx's runtime-selected driver.
//!
//! Lets one build reach SQLite, PostgreSQL (`postgres` feature) or MySQL (`mysql`
//! feature) by connection URL. Pair it with the matching dialect.

use snafu::ResultExt as _;
use sqlx::{
    any::{AnyArguments, AnyPoolOptions},
    Any, AnyPool, Transaction,
};

use crate::{error::Error, query::Statement};

use super::{
    arguments, store_action, store_context, RecordStore, StoreRow, StoreTransaction, Value,
};

#[derive(Clone, Debug)]
pub struct AnyStore {
    pool: AnyPool,
}

impl AnyStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, Error> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .connect(url)
            .await
            .context(store_action("connect"))?;

        tracing::debug!(
            backend = url.split(':').next().unwrap_or_default(),
            "connected"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

impl RecordStore for AnyStore {
    type Transaction = AnyTransaction;

    async fn execute_script(&self, script: &Statement) -> Result<(), Error> {
        sqlx::raw_sql(script.sql())
            .execute(&self.pool)
            .await
            .context(store_context(script))?;
        Ok(())
    }

    async fn execute(&self, statement: &Statement, args: &[Value]) -> Result<u64, Error> {
        let args: AnyArguments<'_> = arguments(statement, args)?;

        let result = sqlx::query_with::<Any, _>(statement.sql(), args)
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
        let args: AnyArguments<'_> = arguments(statement, args)?;

        sqlx::query_as_with::<Any, T, _>(statement.sql(), args)
            .fetch_optional(&self.pool)
            .await
            .context(store_context(statement))
    }

    async fn fetch_scalar(&self, statement: &Statement, args: &[Value]) -> Result<i64, Error> {
        let args: AnyArguments<'_> = arguments(statement, args)?;

        sqlx::query_scalar_with::<Any, i64, _>(statement.sql(), args)
            .fetch_one(&self.pool)
            .await
            .context(store_context(statement))
    }

    async fn begin(&self) -> Result<AnyTransaction, Error> {
        let tx = self
            .pool
            .begin()
            .await
            .context(store_action("begin transaction"))?;

        Ok(AnyTransaction { tx })
    }
}

pub struct AnyTransaction {
    tx: Transaction<'static, Any>,
}

impl StoreTransaction for AnyTransaction {
    async fn execute(&mut self, statement: &Statement, args: &[Value]) -> Result<u64, Error> {
        let args: AnyArguments<'_> = arguments(statement, args)?;

        let result = sqlx::query_with::<Any, _>(statement.sql(), args)
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
        let args: AnyArguments<'_> = arguments(statement, args)?;

        sqlx::query_as_with::<Any, T, _>(statement.sql(), args)
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
