//! Single-message fetch with not-found split from transient failures.

use std::sync::Arc;

use crate::email::Email;
use crate::mailbox::{Mailbox, MailboxError};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("transient fetch error for {message_id}: {reason}")]
    Transient { message_id: String, reason: String },
}

/// Resolves a message id into classifiable content.
///
/// An empty body is a successful fetch; callers decide to skip it.
#[derive(Clone)]
pub struct UnitFetcher {
    mailbox: Arc<dyn Mailbox>,
}

impl UnitFetcher {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }

    pub fn fetch(&self, message_id: &str) -> Result<Email, FetchError> {
        match self.mailbox.fetch(message_id) {
            Ok(mut email) => {
                if email.id.is_empty() {
                    email.id = message_id.to_string();
                }
                email.sender = email.sender.trim().to_string();
                email.subject = email.subject.trim().to_string();
                Ok(email)
            }
            Err(MailboxError::NotFound(_)) => Err(FetchError::NotFound(message_id.to_string())),
            Err(err) => Err(FetchError::Transient {
                message_id: message_id.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}
