//! Acknowledgement settings consumed by the queue's state machine.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::message::Msg;

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What an acknowledgement does to the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Completion {
    /// Set `processed_at` and keep the record.
    #[default]
    Mark,
    /// Remove the record.
    Delete,
}

/// How many times a record may be nacked for retry before it is given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum RetryLimit {
    Infinite,
    Limited(u32),
}

impl RetryLimit {
    /// Whether a record that has already been retried `retry_count` times may not be retried again.
    pub fn is_exhausted(&self, retry_count: i64) -> bool {
        match self {
            Self::Infinite => false,
            Self::Limited(max) => retry_count >= i64::from(*max),
        }
    }

    /// Exclusive upper bound on `retry_count` for a retry to be applied.
    pub fn bound(&self) -> i64 {
        match self {
            Self::Infinite => i64::MAX,
            Self::Limited(max) => i64::from(*max),
        }
    }
}

impl Default for RetryLimit {
    fn default() -> Self {
        Self::Limited(DEFAULT_MAX_RETRIES)
    }
}

impl fmt::Display for RetryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinite => f.write_str("infinite"),
            Self::Limited(max) => write!(f, "{max}"),
        }
    }
}

impl FromStr for RetryLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "infinite" | "inf" | "-1" => Ok(Self::Infinite),
            n => n
                .parse()
                .map(Self::Limited)
                .map_err(|e| format!("invalid retry limit {n:?}: {e}")),
        }
    }
}

impl TryFrom<String> for RetryLimit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Invoked with the record's id and payload after retry exhaustion has deleted it.
pub type FailureCallback = Arc<dyn Fn(&Msg) -> eyre::Result<()> + Send + Sync>;

#[derive(Clone, bon::Builder)]
pub struct AckOpts {
    /// How long a claim stays valid before the record is redelivered.
    #[builder(default = DEFAULT_ACK_TIMEOUT)]
    pub ack_timeout: Duration,

    /// Minimum delay before a nacked record becomes claimable again. The
    /// effective delay is never shorter than `ack_timeout`.
    #[builder(default = DEFAULT_RETRY_BACKOFF)]
    pub retry_backoff: Duration,

    #[builder(default)]
    pub max_retries: RetryLimit,

    #[builder(default)]
    pub completion: Completion,

    /// Run in registration order; the first error stops the chain.
    #[builder(default)]
    pub failure_callbacks: Vec<FailureCallback>,
}

impl AckOpts {
    /// Registers another failure callback after the existing ones.
    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Msg) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.failure_callbacks.push(Arc::new(callback));
        self
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_backoff.max(self.ack_timeout)
    }
}

impl Default for AckOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for AckOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckOpts")
            .field("ack_timeout", &self.ack_timeout)
            .field("retry_backoff", &self.retry_backoff)
            .field("max_retries", &self.max_retries)
            .field("completion", &self.completion)
            .field("failure_callbacks", &self.failure_callbacks.len())
            .finish()
    }
}
