//! Mailbox backend seam and its Gmail implementation.

use google_module::{build_reply_message, GmailClient, GmailError};

use crate::email::Email;

pub use google_module::{GmailLabel as MailboxLabel, HistoryMessage};

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("mailbox backend error: {0}")]
    Backend(String),
}

impl From<GmailError> for MailboxError {
    fn from(err: GmailError) -> Self {
        match err {
            GmailError::NotFound(id) => MailboxError::NotFound(id),
            GmailError::Conflict(name) => MailboxError::Conflict(name),
            other => MailboxError::Backend(other.to_string()),
        }
    }
}

/// Everything the pipeline needs from the system of record. Authentication
/// is the implementation's concern.
pub trait Mailbox: Send + Sync {
    fn fetch(&self, message_id: &str) -> Result<Email, MailboxError>;

    fn apply_label(&self, message_id: &str, label_id: &str) -> Result<(), MailboxError>;

    fn create_draft(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailboxError>;

    /// Newest inbox message ids, at most `max`.
    fn list_backlog(&self, max: u32) -> Result<Vec<String>, MailboxError>;

    /// Raw `messageAdded` entries after `cursor`, drafts included.
    fn history_since(&self, cursor: u64) -> Result<Vec<HistoryMessage>, MailboxError>;

    /// Returns the mailbox's current history id.
    fn enable_watch(&self, topic: &str) -> Result<u64, MailboxError>;

    fn list_labels(&self) -> Result<Vec<MailboxLabel>, MailboxError>;

    fn create_label(&self, name: &str) -> Result<MailboxLabel, MailboxError>;
}

impl Mailbox for GmailClient {
    fn fetch(&self, message_id: &str) -> Result<Email, MailboxError> {
        let message = self.get_message(message_id)?;
        Ok(Email {
            id: message.id,
            sender: message.from,
            subject: message.subject,
            body: message.body,
        })
    }

    fn apply_label(&self, message_id: &str, label_id: &str) -> Result<(), MailboxError> {
        self.modify_labels(message_id, &[label_id.to_string()])?;
        Ok(())
    }

    fn create_draft(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        let raw = build_reply_message(recipient, subject, body);
        GmailClient::create_draft(self, &raw)?;
        Ok(())
    }

    fn list_backlog(&self, max: u32) -> Result<Vec<String>, MailboxError> {
        Ok(self.list_message_ids("INBOX", max)?)
    }

    fn history_since(&self, cursor: u64) -> Result<Vec<HistoryMessage>, MailboxError> {
        Ok(self.list_history(cursor)?)
    }

    fn enable_watch(&self, topic: &str) -> Result<u64, MailboxError> {
        Ok(self.watch(topic)?.history_id)
    }

    fn list_labels(&self) -> Result<Vec<MailboxLabel>, MailboxError> {
        Ok(GmailClient::list_labels(self)?)
    }

    fn create_label(&self, name: &str) -> Result<MailboxLabel, MailboxError> {
        Ok(GmailClient::create_label(self, name)?)
    }
}
