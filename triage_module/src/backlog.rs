//! Startup scan of messages that arrived while the service was down.

use tracing::{info, warn};

use crate::mailbox::{Mailbox, MailboxError};
use crate::worker_pool::{Job, PoolError, WorkerPool};

pub const DEFAULT_INITIAL_EMAILS_TO_FETCH: u32 = 20;

/// Queue the newest `max` inbox messages once at startup. Returns how many
/// jobs were submitted; `max == 0` skips the scan.
pub fn run_backlog_scan(
    mailbox: &dyn Mailbox,
    pool: &WorkerPool,
    max: u32,
) -> Result<usize, MailboxError> {
    if max == 0 {
        info!("backlog scan disabled");
        return Ok(0);
    }

    let message_ids = mailbox.list_backlog(max)?;
    info!("backlog scan found {} message(s)", message_ids.len());

    let mut submitted = 0;
    for message_id in message_ids {
        match pool.submit(Job::Fetch { message_id }) {
            Ok(()) => submitted += 1,
            Err(PoolError::Closed) => {
                warn!("pool closed during backlog scan after {} job(s)", submitted);
                break;
            }
            Err(err) => {
                warn!("backlog submit failed: {}", err);
                break;
            }
        }
    }
    Ok(submitted)
}
