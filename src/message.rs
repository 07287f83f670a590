//! Records as seen by queue consumers.
//!
//! A record moves through the queue like this:
//!
//! 1. `enqueue` creates it, immediately available
//! 2. a claim sets its `ack_deadline` into the future, hiding it from other claimants
//! 3. an ack marks it processed or deletes it; a nack pushes the deadline out and
//!    bumps `retry_count`, or deletes it once retries are exhausted
//! 4. a claim whose deadline passes without an ack makes the record available again
//!
//! The store is the only source of truth. None of these types cache record state.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// A claimed (or dead-lettered) record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    /// Store-assigned identifier, monotonic and immutable.
    pub id: i64,
    /// The enqueued bytes.
    pub payload: Bytes,
}

impl Msg {
    pub fn new(id: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// Acknowledgement bookkeeping for a single record.
#[derive(Serialize, Deserialize, FromRow, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemDetails {
    /// Completed nack-for-retry cycles.
    pub retry_count: i64,
    /// Epoch seconds until which the record is claimed, if it ever was.
    pub ack_deadline: Option<i64>,
}

impl ItemDetails {
    /// Whether a claim on this record is still valid at `now`.
    pub fn is_claimed_at(&self, now: i64) -> bool {
        self.ack_deadline.is_some_and(|deadline| deadline >= now)
    }
}

/// Result of a successful nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// The record will be claimable again once `ack_deadline` has passed.
    Retried { ack_deadline: i64 },
    /// Retries were exhausted: the record was deleted and the failure callbacks ran.
    Exhausted(Msg),
}

#[derive(FromRow)]
pub(crate) struct ClaimedRow {
    pub id: i64,
    pub payload: Vec<u8>,
}

impl From<ClaimedRow> for Msg {
    fn from(row: ClaimedRow) -> Self {
        Msg::new(row.id, row.payload)
    }
}

#[derive(FromRow)]
pub(crate) struct PayloadRow {
    pub payload: Vec<u8>,
}
