//! Stored-procedure statements for databases that host the protocol themselves.
//!
//! The database is expected to define one procedure per operation, taking the
//! arguments in canonical order and returning the same columns the inline
//! dialects do (`id`, `payload`, `retry_count`, `ack_deadline`, or a single
//! count). Conditional writes (`ack`, `update-for-retry`) must report their
//! affected-row count. `delete-item` must only remove a record that is still
//! unprocessed and claimed at `now`. Schema creation is left to the database.

use crate::opts::Completion;

use super::{CallConvention, Dialect};

#[derive(Debug, Clone, Copy, Default)]
pub struct External {
    convention: CallConvention,
}

impl External {
    pub fn new(convention: CallConvention) -> Self {
        Self { convention }
    }

    /// MySQL-style procedures with `?` placeholders.
    pub fn mysql() -> Self {
        Self::new(CallConvention::Placeholder)
    }
}

impl Dialect for External {
    fn name(&self) -> &'static str {
        "external"
    }

    fn convention(&self) -> CallConvention {
        self.convention
    }

    fn create(&self, _table: &str) -> Option<String> {
        None
    }

    fn enqueue(&self, _table: &str) -> String {
        "call ackq_enqueue(:payload)".to_owned()
    }

    fn claim(&self, _table: &str) -> String {
        "call ackq_claim(:now, :deadline)".to_owned()
    }

    fn ack(&self, _table: &str, completion: Completion) -> String {
        match completion {
            Completion::Mark => "call ackq_ack_mark(:id, :now)",
            Completion::Delete => "call ackq_ack_delete(:id, :now)",
        }
        .to_owned()
    }

    fn item_details(&self, _table: &str) -> String {
        "call ackq_item_details(:id)".to_owned()
    }

    fn delete_item(&self, _table: &str) -> String {
        "call ackq_delete_item(:id, :now)".to_owned()
    }

    fn update_for_retry(&self, _table: &str) -> String {
        "call ackq_update_for_retry(:id, :now, :deadline, :retry_bound)".to_owned()
    }

    fn expire_deadline(&self, _table: &str) -> String {
        "call ackq_expire_deadline(:id, :deadline)".to_owned()
    }

    fn len(&self, _table: &str) -> String {
        "call ackq_len(:now)".to_owned()
    }
}
