//! The public queue handle.

use std::{sync::Arc, time::Duration};

use bon::bon;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    ack::AckProtocol,
    clock::{Clock, SystemClock},
    config::{Config, DEFAULT_TABLE},
    error::Error,
    message::{ItemDetails, Msg, NackOutcome},
    notify::{Notifier, Poller, DEFAULT_POLL_INTERVAL},
    opts::AckOpts,
    query::{Dialect, Sqlite, Statements},
    store::{AnyStore, RecordStore, SqliteStore},
};

/// A durable acknowledgement queue over one table.
///
/// Handles are cheap to clone and share the store, the clock and the enqueue
/// wake signal.
pub struct AckQueue<S = SqliteStore> {
    protocol: Arc<AckProtocol<S>>,
    clock: Arc<dyn Clock>,
    poller: Poller,
    table: Arc<str>,
}

impl<S> Clone for AckQueue<S> {
    fn clone(&self) -> Self {
        Self {
            protocol: self.protocol.clone(),
            clock: self.clock.clone(),
            poller: self.poller.clone(),
            table: self.table.clone(),
        }
    }
}

#[bon]
impl<S: RecordStore> AckQueue<S> {
    /// Prepares the dialect's statements for `table`. Templates that do not fit the
    /// dialect's call convention are rejected here.
    #[builder]
    pub fn new(
        store: S,
        #[builder(into, default = DEFAULT_TABLE.to_owned())] table: String,
        #[builder(default = Arc::new(Sqlite) as Arc<dyn Dialect>)] dialect: Arc<dyn Dialect>,
        #[builder(default)] opts: AckOpts,
        #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)] clock: Arc<dyn Clock>,
        #[builder(default = DEFAULT_POLL_INTERVAL)] poll_interval: Duration,
        #[builder(default)] notifier: Notifier,
    ) -> Result<Self, Error> {
        let statements = Statements::prepare(dialect.as_ref(), &table, opts.completion)?;

        tracing::debug!(
            table = %table,
            dialect = dialect.name(),
            opts = ?opts,
            "opened ack queue"
        );

        Ok(Self {
            protocol: Arc::new(AckProtocol::new(store, statements, opts)),
            clock,
            poller: Poller::new(poll_interval, notifier),
            table: table.into(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn store(&self) -> &S {
        self.protocol.store()
    }

    pub fn opts(&self) -> &AckOpts {
        self.protocol.opts()
    }

    pub fn notifier(&self) -> &Notifier {
        self.poller.notifier()
    }

    /// Creates the table and indexes if the dialect knows how.
    pub async fn create_schema(&self) -> Result<(), Error> {
        self.protocol.create_schema().await
    }

    /// Appends a record and wakes any blocked consumers.
    pub async fn enqueue(&self, payload: impl AsRef<[u8]>) -> Result<i64, Error> {
        let id = self.protocol.enqueue(payload.as_ref()).await?;
        self.poller.notifier().notify();
        Ok(id)
    }

    /// Claims the oldest available record, or returns `None` without waiting.
    pub async fn try_dequeue(&self) -> Result<Option<Msg>, Error> {
        self.protocol
            .try_claim(self.clock.now(), self.opts().ack_timeout)
            .await
    }

    /// Waits until a record can be claimed.
    pub async fn dequeue(&self) -> Result<Msg, Error> {
        let never = CancellationToken::new();
        loop {
            if let Some(msg) = self.wait(&never, None).await? {
                return Ok(msg);
            }
        }
    }

    /// Waits at most `timeout` for a record. `None` when the time runs out.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<Msg>, Error> {
        self.wait(&CancellationToken::new(), Some(Instant::now() + timeout))
            .await
    }

    /// Waits for a record until `cancel` fires. `None` when cancelled.
    pub async fn dequeue_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Msg>, Error> {
        self.wait(cancel, None).await
    }

    async fn wait(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<Option<Msg>, Error> {
        self.poller
            .poll(cancel, deadline, || self.try_dequeue())
            .await
    }

    /// Completes a claim. `false` means the claim had already lapsed and the
    /// record may have been handed to someone else; nothing was changed.
    pub async fn ack(&self, id: i64) -> Result<bool, Error> {
        self.protocol.ack(id, self.clock.now()).await
    }

    /// Gives a claimed record back for a later retry, or drops it once its
    /// retries are exhausted.
    pub async fn nack(&self, id: i64) -> Result<NackOutcome, Error> {
        self.protocol.nack(id, self.clock.now()).await
    }

    /// Makes a record claimable right away, whatever its current claim.
    pub async fn expire(&self, id: i64) -> Result<bool, Error> {
        self.protocol.expire(id, self.clock.now()).await
    }

    pub async fn details(&self, id: i64) -> Result<Option<ItemDetails>, Error> {
        self.protocol.details(id).await
    }

    /// Number of records a claim could pick up right now.
    pub async fn len(&self) -> Result<u64, Error> {
        self.protocol.len(self.clock.now()).await
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }
}

impl<S: RecordStore> AckQueue<S> {
    async fn from_config(store: S, config: &Config) -> Result<Self, Error> {
        let queue = Self::builder()
            .store(store)
            .table(config.table())
            .dialect(config.dialect())
            .opts(config.ack_opts())
            .poll_interval(config.poll_interval())
            .build()?;

        queue.create_schema().await?;

        Ok(queue)
    }
}

impl AckQueue<SqliteStore> {
    /// Opens the SQLite database described by `config` and creates its schema.
    pub async fn open(config: &Config) -> Result<Self, Error> {
        let store = SqliteStore::connect_with(config).await?;
        Self::from_config(store, config).await
    }
}

impl AckQueue<AnyStore> {
    /// Connects to `url` through sqlx's runtime-selected driver. `config` should
    /// name the dialect matching the URL's backend.
    pub async fn connect(url: &str, config: &Config) -> Result<Self, Error> {
        let store = AnyStore::connect(url).await?;
        Self::from_config(store, config).await
    }
}
