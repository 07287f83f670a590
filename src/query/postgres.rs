//! Inline PostgreSQL statements.
//!
//! The claim subselect takes a row lock with `FOR UPDATE SKIP LOCKED`, so
//! concurrent claimants skip a row another transaction is already claiming
//! instead of blocking on it.

use crate::opts::Completion;

use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn create(&self, table: &str) -> Option<String> {
        Some(format!(
            "
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                payload BYTEA NOT NULL,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                processed_at TIMESTAMPTZ,
                ack_deadline BIGINT,
                retry_count BIGINT NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_available ON {table} (processed_at, enqueued_at);
            CREATE INDEX IF NOT EXISTS idx_{table}_ack_deadline ON {table} (ack_deadline);
            "
        ))
    }

    fn enqueue(&self, table: &str) -> String {
        format!("INSERT INTO {table} (payload) VALUES ($1) RETURNING id")
    }

    fn claim(&self, table: &str) -> String {
        format!(
            "
            UPDATE {table}
            SET ack_deadline = $2
            WHERE id = (
                SELECT id
                FROM {table}
                WHERE processed_at IS NULL AND (ack_deadline IS NULL OR ack_deadline < $1)
                ORDER BY enqueued_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload
            "
        )
    }

    fn ack(&self, table: &str, completion: Completion) -> String {
        match completion {
            Completion::Mark => format!(
                "
                UPDATE {table}
                SET processed_at = now()
                WHERE id = $1 AND processed_at IS NULL AND ack_deadline >= $2
                "
            ),
            Completion::Delete => format!(
                "
                DELETE FROM {table}
                WHERE id = $1 AND processed_at IS NULL AND ack_deadline >= $2
                "
            ),
        }
    }

    fn item_details(&self, table: &str) -> String {
        format!("SELECT retry_count, ack_deadline FROM {table} WHERE id = $1 FOR UPDATE")
    }

    fn delete_item(&self, table: &str) -> String {
        format!(
            "
            DELETE FROM {table}
            WHERE id = $1 AND processed_at IS NULL AND ack_deadline >= $2
            RETURNING payload
            "
        )
    }

    fn update_for_retry(&self, table: &str) -> String {
        format!(
            "
            UPDATE {table}
            SET ack_deadline = $3, retry_count = retry_count + 1
            WHERE id = $1
                AND processed_at IS NULL
                AND ack_deadline >= $2
                AND retry_count < $4
            "
        )
    }

    fn expire_deadline(&self, table: &str) -> String {
        format!("UPDATE {table} SET ack_deadline = $2 WHERE id = $1")
    }

    fn len(&self, table: &str) -> String {
        format!(
            "
            SELECT COUNT(*)
            FROM {table}
            WHERE processed_at IS NULL AND (ack_deadline IS NULL OR ack_deadline < $1)
            "
        )
    }
}
