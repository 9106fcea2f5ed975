//! In-process claims that keep two workers off the same message.

use std::collections::HashSet;
use std::sync::Mutex;

/// In-process set of message ids currently owned by a worker.
#[derive(Debug, Default)]
pub struct ClaimSet {
    running: Mutex<HashSet<String>>,
}

/// Releases its claim on drop.
#[derive(Debug)]
pub struct ClaimGuard<'a> {
    claims: &'a ClaimSet,
    message_id: String,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another worker already holds `message_id`.
    pub fn try_claim(&self, message_id: &str) -> Option<ClaimGuard<'_>> {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if !running.insert(message_id.to_string()) {
            return None;
        }
        Some(ClaimGuard {
            claims: self,
            message_id: message_id.to_string(),
        })
    }

    fn release(&self, message_id: &str) {
        self.running
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(message_id);
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.claims.release(&self.message_id);
    }
}
