//! Statement templates for every queue operation.
//!
//! Each backend family implements [`Dialect`] and keeps its whole template set in
//! one place. At construction time a queue resolves the dialect into a set of
//! [`Statements`]: templates are rendered against the table name, translated to the
//! dialect's [`CallConvention`], and validated. Nothing is checked again at call time.

use std::sync::Arc;

use serde::Deserialize;
use strum::{Display, EnumIter, EnumString};

use crate::{error::Error, opts::Completion};

pub mod convention;
pub mod custom;
pub mod external;
pub mod postgres;
pub mod sqlite;

pub use convention::{parse_call, translate, CallConvention, CallShape};
pub use custom::Templates;
pub use external::External;
pub use postgres::Postgres;
pub use sqlite::Sqlite;

/// The built-in dialects, by configuration name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Sqlite,
    Postgres,
    /// Stored procedures, called with the given convention.
    External,
}

impl DialectKind {
    pub fn resolve(self, convention: CallConvention) -> Arc<dyn Dialect> {
        match self {
            Self::Sqlite => Arc::new(Sqlite),
            Self::Postgres => Arc::new(Postgres),
            Self::External => Arc::new(External::new(convention)),
        }
    }
}

/// The canonical operations a backend must provide statements for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Operation {
    Create,
    Enqueue,
    Claim,
    Ack,
    ItemDetails,
    DeleteItem,
    UpdateForRetry,
    ExpireDeadline,
    Len,
}

impl Operation {
    /// Number of bound arguments, in canonical order:
    ///
    /// | operation          | arguments                                 |
    /// |--------------------|-------------------------------------------|
    /// | `enqueue`          | `payload`                                 |
    /// | `claim`            | `now`, `deadline`                         |
    /// | `ack`              | `id`, `now`                               |
    /// | `item-details`     | `id`                                      |
    /// | `delete-item`      | `id`, `now`                               |
    /// | `update-for-retry` | `id`, `now`, `deadline`, `retry_bound`    |
    /// | `expire-deadline`  | `id`, `deadline`                          |
    /// | `len`              | `now`                                     |
    pub fn arity(&self) -> usize {
        match self {
            Self::Create => 0,
            Self::Enqueue | Self::ItemDetails | Self::Len => 1,
            Self::Claim | Self::Ack | Self::DeleteItem | Self::ExpireDeadline => 2,
            Self::UpdateForRetry => 4,
        }
    }
}

/// A backend family's template set.
///
/// Inline-SQL dialects substitute `table` into their statements and refer to
/// arguments by number (`?1`, `$1`). Procedure dialects ignore `table` and write
/// calls in canonical named form (`call proc(:id, :now)`), which [`Statements`]
/// rewrites into [`Dialect::convention`].
pub trait Dialect: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn convention(&self) -> CallConvention {
        CallConvention::Verbatim
    }

    /// Schema bootstrap script, or `None` when the schema is managed elsewhere.
    fn create(&self, table: &str) -> Option<String>;

    fn enqueue(&self, table: &str) -> String;

    fn claim(&self, table: &str) -> String;

    fn ack(&self, table: &str, completion: Completion) -> String;

    fn item_details(&self, table: &str) -> String;

    fn delete_item(&self, table: &str) -> String;

    fn update_for_retry(&self, table: &str) -> String;

    fn expire_deadline(&self, table: &str) -> String;

    fn len(&self, table: &str) -> String;
}

/// A rendered, translated statement tagged with the operation it implements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    operation: Operation,
    sql: String,
}

impl Statement {
    pub fn new(operation: Operation, sql: impl Into<String>) -> Self {
        Self {
            operation,
            sql: sql.into(),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// The full, validated statement set a queue runs with.
#[derive(Debug, Clone)]
pub struct Statements {
    pub create: Option<Statement>,
    pub enqueue: Statement,
    pub claim: Statement,
    pub ack: Statement,
    pub item_details: Statement,
    pub delete_item: Statement,
    pub update_for_retry: Statement,
    pub expire_deadline: Statement,
    pub len: Statement,
}

impl Statements {
    pub fn prepare(
        dialect: &dyn Dialect,
        table: &str,
        completion: Completion,
    ) -> Result<Self, Error> {
        let convention = dialect.convention();
        let prepare = |operation: Operation, template: String| {
            prepare_statement(operation, &template, convention)
        };

        let statements = Self {
            create: dialect
                .create(table)
                .map(|script| Statement::new(Operation::Create, script)),
            enqueue: prepare(Operation::Enqueue, dialect.enqueue(table))?,
            claim: prepare(Operation::Claim, dialect.claim(table))?,
            ack: prepare(Operation::Ack, dialect.ack(table, completion))?,
            item_details: prepare(Operation::ItemDetails, dialect.item_details(table))?,
            delete_item: prepare(Operation::DeleteItem, dialect.delete_item(table))?,
            update_for_retry: prepare(Operation::UpdateForRetry, dialect.update_for_retry(table))?,
            expire_deadline: prepare(Operation::ExpireDeadline, dialect.expire_deadline(table))?,
            len: prepare(Operation::Len, dialect.len(table))?,
        };

        tracing::debug!(
            dialect = dialect.name(),
            %convention,
            table,
            "prepared queue statements"
        );

        Ok(statements)
    }
}

/// Translates one template and checks it has the shape its convention needs.
///
/// Verbatim templates are taken as-is. Every other convention rewrites a single
/// call, so the template must parse as one whose arguments are all parameters,
/// and carry exactly as many of them as the operation binds.
fn prepare_statement(
    operation: Operation,
    template: &str,
    convention: CallConvention,
) -> Result<Statement, Error> {
    if template.trim().is_empty() {
        return Err(Error::invalid_template(operation, "template is empty"));
    }

    if convention == CallConvention::Verbatim {
        return Ok(Statement::new(operation, template));
    }

    let shape = parse_call(template).ok_or_else(|| {
        Error::invalid_template(
            operation,
            format!("expected a single `name(:param, ...)` call, got {template:?}"),
        )
    })?;

    if shape.arity() != operation.arity() {
        return Err(Error::invalid_template(
            operation,
            format!(
                "expected {} parameters, found {}",
                operation.arity(),
                shape.arity()
            ),
        ));
    }

    Ok(Statement::new(operation, translate(template, convention)))
}
