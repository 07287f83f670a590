use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use snafu::ResultExt as _;

use crate::{
    error::{ConfigSnafu, Error},
    notify::DEFAULT_POLL_INTERVAL,
    opts::{AckOpts, Completion, RetryLimit},
    query::{CallConvention, Dialect, DialectKind},
};

pub const DEFAULT_TABLE: &str = "ack_queue";

const PREFIX: &str = "ACKQ_";

/// Queue settings read from `ACKQ_*` environment variables. Everything is optional.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    /// SQLite database file; an in-memory database when unset.
    pub db_path: Option<String>,
    pub table: Option<String>,
    pub ack_timeout_secs: Option<u64>,
    pub retry_backoff_secs: Option<u64>,
    /// A count, or `infinite`.
    pub max_retries: Option<RetryLimit>,
    pub poll_interval_ms: Option<u64>,
    pub completion: Option<Completion>,
    /// `sqlite`, `postgres` or `external`.
    pub dialect: Option<DialectKind>,
    /// Parameter spelling for `external` procedure calls.
    pub call_convention: Option<CallConvention>,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        envy::prefixed(PREFIX).from_env::<Self>().context(ConfigSnafu)
    }

    /// Reads the same variables from an explicit list instead of the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(PREFIX).from_iter::<_, Self>(vars).context(ConfigSnafu)
    }

    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or(DEFAULT_TABLE)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn call_convention(&self) -> CallConvention {
        self.call_convention.unwrap_or_default()
    }

    /// The configured dialect; stored procedures take [`Self::call_convention`].
    pub fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect
            .unwrap_or_default()
            .resolve(self.call_convention())
    }

    /// Acknowledgement settings, with library defaults for anything unset.
    pub fn ack_opts(&self) -> AckOpts {
        AckOpts::builder()
            .maybe_ack_timeout(self.ack_timeout_secs.map(Duration::from_secs))
            .maybe_retry_backoff(self.retry_backoff_secs.map(Duration::from_secs))
            .maybe_max_retries(self.max_retries)
            .maybe_completion(self.completion)
            .build()
    }
}
