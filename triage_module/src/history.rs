//! Change-cursor resolution against the mailbox history log.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::mailbox::{Mailbox, MailboxError};
use crate::shutdown::ShutdownSignal;

pub const DEFAULT_HISTORY_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_HISTORY_BACKOFF_STEP: Duration = Duration::from_millis(80);

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history cursor {0} is no longer available")]
    CursorExpired(u64),
    #[error("history lookup failed: {0}")]
    Backend(#[from] MailboxError),
}

/// Turns a change cursor into the ids of messages added after it.
///
/// The history log can trail the notification that announced it, so an empty
/// answer is retried with linearly growing delays. Drafts are dropped: the
/// pipeline creates them itself.
#[derive(Clone)]
pub struct HistoryResolver {
    mailbox: Arc<dyn Mailbox>,
    max_attempts: u32,
    backoff_step: Duration,
    signal: ShutdownSignal,
}

impl HistoryResolver {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        max_attempts: u32,
        backoff_step: Duration,
        signal: ShutdownSignal,
    ) -> Self {
        Self {
            mailbox,
            max_attempts: max_attempts.max(1),
            backoff_step,
            signal,
        }
    }

    pub fn resolve(&self, cursor: u64) -> Result<Vec<String>, HistoryError> {
        for attempt in 1..=self.max_attempts {
            let added = match self.mailbox.history_since(cursor) {
                Ok(added) => added,
                Err(MailboxError::NotFound(_)) => return Err(HistoryError::CursorExpired(cursor)),
                Err(err) => return Err(err.into()),
            };

            if !added.is_empty() {
                let mut seen = HashSet::new();
                let ids: Vec<String> = added
                    .into_iter()
                    .filter(|message| !message.is_draft())
                    .filter(|message| seen.insert(message.id.clone()))
                    .map(|message| message.id)
                    .collect();
                debug!(
                    "history {} resolved to {} message(s) on attempt {}",
                    cursor,
                    ids.len(),
                    attempt
                );
                return Ok(ids);
            }

            if attempt == self.max_attempts {
                break;
            }
            let delay = self.backoff_step * attempt;
            if !self.signal.sleep(delay) {
                debug!("history {} resolution cancelled", cursor);
                return Ok(Vec::new());
            }
        }

        info!(
            "history {} still empty after {} attempts",
            cursor, self.max_attempts
        );
        Ok(Vec::new())
    }
}
