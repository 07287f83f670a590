//! The acknowledgement state machine.
//!
//! ```text
//! Available --claim--> Claimed
//! Claimed --ack(mark)--> Acked (kept, never claimable again)
//! Claimed --ack(delete)--> Deleted
//! Claimed --nack, retries left--> Available after backoff, retry_count + 1
//! Claimed --nack, retries exhausted--> Deleted, failure callbacks run
//! Claimed --deadline passes--> Available
//! ```
//!
//! There is no sweeper: an expired claim is simply matched again by the next
//! claim's availability predicate. Every transition is one conditional write or
//! one store transaction, so concurrent callers are serialized by the store, and
//! a writer whose claim has lapsed changes nothing.

use std::time::Duration;

use crate::{
    error::{AckDeadlineExpiredSnafu, Error, ItemNotFoundSnafu},
    message::{ClaimedRow, ItemDetails, Msg, NackOutcome, PayloadRow},
    opts::AckOpts,
    query::Statements,
    store::{RecordStore, StoreTransaction, Value},
};

/// Runs the queue protocol against a store, given explicit `now` readings.
pub struct AckProtocol<S> {
    store: S,
    statements: Statements,
    opts: AckOpts,
}

fn seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

impl<S: RecordStore> AckProtocol<S> {
    pub fn new(store: S, statements: Statements, opts: AckOpts) -> Self {
        Self {
            store,
            statements,
            opts,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn statements(&self) -> &Statements {
        &self.statements
    }

    pub fn opts(&self) -> &AckOpts {
        &self.opts
    }

    /// Runs the dialect's schema script. A dialect without one is left alone.
    pub async fn create_schema(&self) -> Result<(), Error> {
        match &self.statements.create {
            Some(script) => self.store.execute_script(script).await,
            None => {
                tracing::debug!("dialect manages its own schema, skipping create");
                Ok(())
            }
        }
    }

    pub async fn enqueue(&self, payload: &[u8]) -> Result<i64, Error> {
        let id = self
            .store
            .fetch_scalar(&self.statements.enqueue, &[payload.into()])
            .await?;

        tracing::debug!(id, size = payload.len(), "enqueued");

        Ok(id)
    }

    /// Claims the oldest available record until `now + ack_timeout`.
    ///
    /// `None` means nothing is available right now.
    pub async fn try_claim(&self, now: i64, ack_timeout: Duration) -> Result<Option<Msg>, Error> {
        let deadline = now.saturating_add(seconds(ack_timeout));

        let claimed = self
            .store
            .fetch_optional::<ClaimedRow>(
                &self.statements.claim,
                &[Value::Integer(now), Value::Integer(deadline)],
            )
            .await?
            .map(Msg::from);

        if let Some(msg) = &claimed {
            tracing::debug!(id = msg.id, deadline, "claimed");
        }

        Ok(claimed)
    }

    /// Completes a claim, provided it is still valid at `now`.
    ///
    /// Returns `false` if the claim had already lapsed (or the record is gone):
    /// the record may have been redelivered, and this ack changed nothing.
    pub async fn ack(&self, id: i64, now: i64) -> Result<bool, Error> {
        let affected = self
            .store
            .execute(
                &self.statements.ack,
                &[Value::Integer(id), Value::Integer(now)],
            )
            .await?;

        if affected == 0 {
            tracing::debug!(id, "ack found no live claim");
        } else {
            tracing::debug!(id, completion = %self.opts.completion, "acked");
        }

        Ok(affected > 0)
    }

    /// Releases a claim early, scheduling a retry or giving the record up.
    ///
    /// The retry is a single conditional write pinned to `now`: it applies only
    /// while the claim is still valid and retries remain. Only when it misses
    /// does the transaction look at the record to tell why.
    pub async fn nack(&self, id: i64, now: i64) -> Result<NackOutcome, Error> {
        let deadline = now.saturating_add(seconds(self.opts.retry_delay()));

        let mut tx = self.store.begin().await?;

        let retried = tx
            .execute(
                &self.statements.update_for_retry,
                &[
                    Value::Integer(id),
                    Value::Integer(now),
                    Value::Integer(deadline),
                    Value::Integer(self.opts.max_retries.bound()),
                ],
            )
            .await?;

        if retried > 0 {
            tx.commit().await?;
            tracing::debug!(id, deadline, "nacked for retry");
            return Ok(NackOutcome::Retried {
                ack_deadline: deadline,
            });
        }

        let details = tx
            .fetch_optional::<ItemDetails>(&self.statements.item_details, &[Value::Integer(id)])
            .await?
            .ok_or_else(|| ItemNotFoundSnafu { id }.build())?;

        if !details.is_claimed_at(now) || !self.opts.max_retries.is_exhausted(details.retry_count)
        {
            // The claim lapsed, or the record was acked or retried under us.
            return AckDeadlineExpiredSnafu { id }.fail();
        }

        let msg = self.delete_exhausted(tx, id, now).await?;
        self.run_failure_callbacks(&msg)?;

        Ok(NackOutcome::Exhausted(msg))
    }

    /// Deletes a record whose retries are exhausted and commits.
    ///
    /// The delete carries the same claim predicate as the retry update, so a
    /// record that was acked (or whose claim lapsed) in the meantime is left alone.
    async fn delete_exhausted(
        &self,
        mut tx: S::Transaction,
        id: i64,
        now: i64,
    ) -> Result<Msg, Error> {
        let removed = tx
            .fetch_optional::<PayloadRow>(
                &self.statements.delete_item,
                &[Value::Integer(id), Value::Integer(now)],
            )
            .await?
            .ok_or_else(|| AckDeadlineExpiredSnafu { id }.build())?;

        tx.commit().await?;

        tracing::warn!(
            id,
            max_retries = %self.opts.max_retries,
            "retries exhausted, item deleted"
        );

        Ok(Msg::new(id, removed.payload))
    }

    /// Runs after the deletion has committed; a failing callback does not undo it.
    fn run_failure_callbacks(&self, msg: &Msg) -> Result<(), Error> {
        for callback in &self.opts.failure_callbacks {
            if let Err(source) = callback(msg) {
                tracing::warn!(id = msg.id, error = %source, "failure callback failed");
                return Err(Error::FailureCallback { id: msg.id, source });
            }
        }

        Ok(())
    }

    /// Forces the record's claim to lapse so the next claim can pick it up.
    pub async fn expire(&self, id: i64, now: i64) -> Result<bool, Error> {
        let affected = self
            .store
            .execute(
                &self.statements.expire_deadline,
                &[Value::Integer(id), Value::Integer(now - 1)],
            )
            .await?;

        tracing::debug!(id, "expired ack deadline");

        Ok(affected > 0)
    }

    pub async fn details(&self, id: i64) -> Result<Option<ItemDetails>, Error> {
        self.store
            .fetch_optional(&self.statements.item_details, &[Value::Integer(id)])
            .await
    }

    /// Number of records available for claim at `now`.
    pub async fn len(&self, now: i64) -> Result<u64, Error> {
        let count = self
            .store
            .fetch_scalar(&self.statements.len, &[Value::Integer(now)])
            .await?;

        Ok(count.max(0) as u64)
    }
}
