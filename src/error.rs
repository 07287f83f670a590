use snafu::Snafu;

use crate::query::Operation;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Item {id} not found"))]
    ItemNotFound { id: i64 },

    #[snafu(display("Ack deadline for item {id} has expired, cannot nack"))]
    AckDeadlineExpired { id: i64 },

    #[snafu(display("Failure callback for item {id} failed: {source}"))]
    FailureCallback {
        id: i64,
        #[snafu(source(false))]
        source: eyre::Report,
    },

    #[snafu(display("Error returned from store during {action}"))]
    Store {
        action: String,
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Unsupported template for {operation}: {reason}"))]
    InvalidTemplate { operation: Operation, reason: String },

    #[snafu(display("Error loading configuration"))]
    Config {
        #[snafu(source)]
        source: envy::Error,
    },
}

impl Error {
    pub fn invalid_template(operation: Operation, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            operation,
            reason: reason.into(),
        }
    }

    /// Whether the error means the caller's claim is gone and its work may be redelivered.
    pub fn is_claim_lost(&self) -> bool {
        matches!(self, Self::AckDeadlineExpired { .. } | Self::ItemNotFound { .. })
    }
}
