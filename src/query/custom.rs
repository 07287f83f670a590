use crate::opts::Completion;

use super::{CallConvention, Dialect};

/// A caller-supplied statement set.
///
/// Use this when the database already exposes the protocol under other names,
/// or when inline SQL for an unsupported engine is needed. `{table}` in any
/// template is replaced with the queue's table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    pub convention: CallConvention,
    pub create: Option<String>,
    pub enqueue: String,
    pub claim: String,
    pub ack_mark: String,
    pub ack_delete: String,
    pub item_details: String,
    pub delete_item: String,
    pub update_for_retry: String,
    pub expire_deadline: String,
    pub len: String,
}

impl Templates {
    /// Procedure calls named after the operations, written in canonical form.
    pub fn procedures(convention: CallConvention) -> Self {
        Self {
            convention,
            create: None,
            enqueue: "call push(:payload)".to_owned(),
            claim: "call pop(:now, :deadline)".to_owned(),
            ack_mark: "call ack_store(:id, :now)".to_owned(),
            ack_delete: "call ack_delete(:id, :now)".to_owned(),
            item_details: "call item_details(:id)".to_owned(),
            delete_item: "call delete_item(:id, :now)".to_owned(),
            update_for_retry: "call update_for_retry(:id, :now, :deadline, :retry_bound)"
                .to_owned(),
            expire_deadline: "call expire_deadline(:id, :deadline)".to_owned(),
            len: "call len(:now)".to_owned(),
        }
    }

    fn render(template: &str, table: &str) -> String {
        template.replace("{table}", table)
    }
}

impl Dialect for Templates {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn convention(&self) -> CallConvention {
        self.convention
    }

    fn create(&self, table: &str) -> Option<String> {
        self.create
            .as_deref()
            .map(|template| Self::render(template, table))
    }

    fn enqueue(&self, table: &str) -> String {
        Self::render(&self.enqueue, table)
    }

    fn claim(&self, table: &str) -> String {
        Self::render(&self.claim, table)
    }

    fn ack(&self, table: &str, completion: Completion) -> String {
        match completion {
            Completion::Mark => Self::render(&self.ack_mark, table),
            Completion::Delete => Self::render(&self.ack_delete, table),
        }
    }

    fn item_details(&self, table: &str) -> String {
        Self::render(&self.item_details, table)
    }

    fn delete_item(&self, table: &str) -> String {
        Self::render(&self.delete_item, table)
    }

    fn update_for_retry(&self, table: &str) -> String {
        Self::render(&self.update_for_retry, table)
    }

    fn expire_deadline(&self, table: &str) -> String {
        Self::render(&self.expire_deadline, table)
    }

    fn len(&self, table: &str) -> String {
        Self::render(&self.len, table)
    }
}
