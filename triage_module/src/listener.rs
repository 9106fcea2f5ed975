//! Notification intake: payload decoding, cursor de-duplication and dispatch
//! of novel cursors into the worker pool.

use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::fetcher::{FetchError, UnitFetcher};
use crate::history::HistoryResolver;
use crate::processed_store::ProcessedStore;
use crate::worker_pool::{Job, PoolError, WorkerPool};

pub const DEFAULT_CURSOR_CACHE_CAPACITY: usize = 10_000;

/// A decoded mailbox change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub email_address: String,
    pub history_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotification {
    #[serde(default)]
    email_address: String,
    history_id: RawHistoryId,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawHistoryId {
    Number(u64),
    Text(String),
}

pub fn decode_notification(data: &[u8]) -> Option<Notification> {
    let raw: RawNotification = serde_json::from_slice(data).ok()?;
    let history_id = match raw.history_id {
        RawHistoryId::Number(value) => value,
        RawHistoryId::Text(value) => value.trim().parse::<u64>().ok()?,
    };
    Some(Notification {
        email_address: raw.email_address,
        history_id,
    })
}

/// Bounded record of cursors already dispatched by this process. The oldest
/// entry is forgotten first once the cap is reached.
#[derive(Debug)]
pub struct CursorCache {
    capacity: usize,
    inner: Mutex<CursorCacheInner>,
}

#[derive(Debug, Default)]
struct CursorCacheInner {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
}

impl CursorCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CursorCacheInner::default()),
        }
    }

    /// Records `cursor`; `false` when it was already present.
    pub fn insert(&self, cursor: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        if !inner.seen.insert(cursor) {
            return false;
        }
        inner.order.push_back(cursor);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Receives each novel cursor once. Returns the number of jobs submitted.
pub trait CursorDispatch: Send + Sync {
    fn dispatch(&self, cursor: u64) -> usize;
}

/// Resolves a cursor, filters already-processed ids, fetches the rest and
/// hands them to the pool.
pub struct HistoryDispatcher {
    resolver: HistoryResolver,
    store: Arc<dyn ProcessedStore>,
    fetcher: UnitFetcher,
    pool: Arc<WorkerPool>,
}

impl HistoryDispatcher {
    pub fn new(
        resolver: HistoryResolver,
        store: Arc<dyn ProcessedStore>,
        fetcher: UnitFetcher,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            resolver,
            store,
            fetcher,
            pool,
        }
    }

    fn job_for(&self, message_id: &str) -> Option<Job> {
        match self.store.already_committed(message_id) {
            Ok(true) => {
                debug!("message {} already processed, not dispatching", message_id);
                return None;
            }
            Ok(false) => {}
            Err(err) => {
                warn!("message {}: idempotency check failed, skipping: {}", message_id, err);
                return None;
            }
        }

        match self.fetcher.fetch(message_id) {
            Ok(email) => Some(Job::Prefetched(email)),
            Err(FetchError::NotFound(_)) => {
                debug!("message {} vanished before fetch", message_id);
                None
            }
            Err(err) => {
                // The worker fetches again.
                warn!("{}", err);
                Some(Job::Fetch {
                    message_id: message_id.to_string(),
                })
            }
        }
    }
}

impl CursorDispatch for HistoryDispatcher {
    fn dispatch(&self, cursor: u64) -> usize {
        let message_ids = match self.resolver.resolve(cursor) {
            Ok(ids) => ids,
            Err(err) => {
                warn!("history {}: {}", cursor, err);
                return 0;
            }
        };

        let mut submitted = 0;
        for message_id in message_ids {
            let Some(job) = self.job_for(&message_id) else {
                continue;
            };
            match self.pool.submit(job) {
                Ok(()) => submitted += 1,
                Err(PoolError::Closed) => {
                    info!("pool closed, abandoning remaining ids for history {}", cursor);
                    break;
                }
                Err(err) => {
                    warn!("message {}: submit failed: {}", message_id, err);
                    break;
                }
            }
        }
        submitted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerOutcome {
    Malformed,
    Duplicate { cursor: u64 },
    Dispatched { cursor: u64, submitted: usize },
}

/// Transport-agnostic notification handler. Callers acknowledge the delivery
/// whatever the outcome.
pub struct NotificationListener {
    cursors: CursorCache,
    dispatcher: Arc<dyn CursorDispatch>,
}

impl NotificationListener {
    pub fn new(dispatcher: Arc<dyn CursorDispatch>, cursor_cache_capacity: usize) -> Self {
        Self {
            cursors: CursorCache::new(cursor_cache_capacity),
            dispatcher,
        }
    }

    pub fn handle_payload(&self, data: &[u8]) -> ListenerOutcome {
        let Some(notification) = decode_notification(data) else {
            warn!(
                "malformed notification payload: {}",
                String::from_utf8_lossy(data)
            );
            return ListenerOutcome::Malformed;
        };

        let cursor = notification.history_id;
        if !self.cursors.insert(cursor) {
            debug!("history {} already dispatched, skipping", cursor);
            return ListenerOutcome::Duplicate { cursor };
        }

        info!(
            "notification for {} (history {})",
            notification.email_address, cursor
        );
        let submitted = self.dispatcher.dispatch(cursor);
        ListenerOutcome::Dispatched { cursor, submitted }
    }
}
