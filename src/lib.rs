//! A durable, at-least-once acknowledgement queue backed by a relational store.
//!
//! Consumers claim the oldest available record for a bounded window, then ack it
//! or nack it. A claim that lapses without an ack makes the record available
//! again; repeated nacks are retried up to a limit, after which the record is
//! deleted and the registered failure callbacks are run.
//!
//! ```no_run
//! # async fn example() -> Result<(), ackq::Error> {
//! let queue = ackq::AckQueue::open(&ackq::Config::load()?).await?;
//!
//! queue.enqueue(b"job-1").await?;
//!
//! let msg = queue.dequeue().await?;
//! queue.ack(msg.id).await?;
//! # Ok(())
//! # }
//! ```

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

pub mod ack;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod notify;
pub mod opts;
pub mod query;
pub mod queue;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::Error;
pub use message::{ItemDetails, Msg, NackOutcome};
pub use opts::{AckOpts, Completion, RetryLimit};
pub use query::{CallConvention, Dialect, DialectKind};
pub use queue::AckQueue;
pub use store::{AnyStore, RecordStore, SqliteStore};

/// Installs a global `tracing` subscriber filtered by `ACKQ_LOG` (default `info`).
///
/// Pretty output in debug builds, JSON in release builds.
pub fn init_logging() -> eyre::Result<()> {
    let filter = EnvFilter::builder()
        .with_env_var("ACKQ_LOG")
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(filter)
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(filter)
        .finish()
        .try_init()?;

    Ok(())
}
