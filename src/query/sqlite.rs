//! Inline SQLite statements.
//!
//! Claims are a single `UPDATE ... WHERE id = (SELECT ...) RETURNING`, which SQLite
//! runs inside one write transaction, so two claimants can never pick the same row.

use crate::opts::Completion;

use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn create(&self, table: &str) -> Option<String> {
        Some(format!(
            "
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload BLOB NOT NULL,
                enqueued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                processed_at TIMESTAMP,
                ack_deadline INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_available ON {table} (processed_at, enqueued_at);
            CREATE INDEX IF NOT EXISTS idx_{table}_ack_deadline ON {table} (ack_deadline);
            "
        ))
    }

    fn enqueue(&self, table: &str) -> String {
        format!("INSERT INTO {table} (payload) VALUES (?1) RETURNING id")
    }

    fn claim(&self, table: &str) -> String {
        format!(
            "
            UPDATE {table}
            SET ack_deadline = ?2
            WHERE id = (
                SELECT id
                FROM {table}
                WHERE processed_at IS NULL AND (ack_deadline IS NULL OR ack_deadline < ?1)
                ORDER BY enqueued_at ASC, id ASC
                LIMIT 1
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
                SET processed_at = CURRENT_TIMESTAMP
                WHERE id = ?1 AND processed_at IS NULL AND ack_deadline >= ?2
                "
            ),
            Completion::Delete => format!(
                "
                DELETE FROM {table}
                WHERE id = ?1 AND processed_at IS NULL AND ack_deadline >= ?2
                "
            ),
        }
    }

    fn item_details(&self, table: &str) -> String {
        format!("SELECT retry_count, ack_deadline FROM {table} WHERE id = ?1")
    }

    fn delete_item(&self, table: &str) -> String {
        format!(
            "
            DELETE FROM {table}
            WHERE id = ?1 AND processed_at IS NULL AND ack_deadline >= ?2
            RETURNING payload
            "
        )
    }

    fn update_for_retry(&self, table: &str) -> String {
        format!(
            "
            UPDATE {table}
            SET ack_deadline = ?3, retry_count = retry_count + 1
            WHERE id = ?1
                AND processed_at IS NULL
                AND ack_deadline >= ?2
                AND retry_count < ?4
            "
        )
    }

    fn expire_deadline(&self, table: &str) -> String {
        format!("UPDATE {table} SET ack_deadline = ?2 WHERE id = ?1")
    }

    fn len(&self, table: &str) -> String {
        format!(
            "
            SELECT COUNT(*)
            FROM {table}
            WHERE processed_at IS NULL AND (ack_deadline IS NULL OR ack_deadline < ?1)
            "
        )
    }
}
