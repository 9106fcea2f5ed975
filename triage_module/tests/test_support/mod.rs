#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use triage_module::classifier::{Classifier, ClassifierError};
use triage_module::effects::{EffectApplier, LabelTable};
use triage_module::email::{Category, Classification, Email, ProcessedRecord};
use triage_module::fetcher::UnitFetcher;
use triage_module::mailbox::{HistoryMessage, Mailbox, MailboxError, MailboxLabel};
use triage_module::processed_store::{ProcessedStore, StoreError};
use triage_module::worker_pool::JobProcessor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftCall {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// In-memory mailbox that records every side effect.
#[derive(Default)]
pub struct RecordingMailbox {
    messages: Mutex<HashMap<String, Email>>,
    history: Mutex<HashMap<u64, Vec<HistoryMessage>>>,
    backlog: Mutex<Vec<String>>,
    labels: Mutex<Vec<MailboxLabel>>,
    racing_label_names: Mutex<HashSet<String>>,
    pub fail_labels: AtomicBool,
    pub fail_fetches: AtomicBool,
    pub fetches: Mutex<Vec<String>>,
    pub applied_labels: Mutex<Vec<(String, String)>>,
    pub drafts: Mutex<Vec<DraftCall>>,
    pub history_calls: Mutex<Vec<u64>>,
    pub created_labels: Mutex<Vec<String>>,
    pub watched_topics: Mutex<Vec<String>>,
}

impl RecordingMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_message(&self, id: &str, sender: &str, subject: &str, body: &str) {
        self.messages.lock().unwrap().insert(
            id.to_string(),
            Email {
                id: id.to_string(),
                sender: sender.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            },
        );
    }

    pub fn set_history(&self, cursor: u64, added: Vec<HistoryMessage>) {
        self.history.lock().unwrap().insert(cursor, added);
    }

    pub fn set_backlog(&self, ids: &[&str]) {
        *self.backlog.lock().unwrap() = ids.iter().map(|id| id.to_string()).collect();
    }

    pub fn add_label(&self, id: &str, name: &str) {
        self.labels.lock().unwrap().push(MailboxLabel {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    /// The next create of `name` loses a race: the label appears, but the
    /// create reports a conflict.
    pub fn race_label_creation(&self, name: &str) {
        self.racing_label_names.lock().unwrap().insert(name.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn label_count(&self) -> usize {
        self.applied_labels.lock().unwrap().len()
    }

    pub fn draft_count(&self) -> usize {
        self.drafts.lock().unwrap().len()
    }

    pub fn history_call_count(&self) -> usize {
        self.history_calls.lock().unwrap().len()
    }
}

impl Mailbox for RecordingMailbox {
    fn fetch(&self, message_id: &str) -> Result<Email, MailboxError> {
        self.fetches.lock().unwrap().push(message_id.to_string());
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(MailboxError::Backend("mailbox unavailable".to_string()));
        }
        self.messages
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or_else(|| MailboxError::NotFound(message_id.to_string()))
    }

    fn apply_label(&self, message_id: &str, label_id: &str) -> Result<(), MailboxError> {
        if self.fail_labels.load(Ordering::SeqCst) {
            return Err(MailboxError::Backend("label quota exceeded".to_string()));
        }
        self.applied_labels
            .lock()
            .unwrap()
            .push((message_id.to_string(), label_id.to_string()));
        Ok(())
    }

    fn create_draft(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        self.drafts.lock().unwrap().push(DraftCall {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn list_backlog(&self, max: u32) -> Result<Vec<String>, MailboxError> {
        Ok(self
            .backlog
            .lock()
            .unwrap()
            .iter()
            .take(max as usize)
            .cloned()
            .collect())
    }

    fn history_since(&self, cursor: u64) -> Result<Vec<HistoryMessage>, MailboxError> {
        self.history_calls.lock().unwrap().push(cursor);
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(&cursor)
            .cloned()
            .unwrap_or_default())
    }

    fn enable_watch(&self, topic: &str) -> Result<u64, MailboxError> {
        self.watched_topics.lock().unwrap().push(topic.to_string());
        Ok(1)
    }

    fn list_labels(&self) -> Result<Vec<MailboxLabel>, MailboxError> {
        Ok(self.labels.lock().unwrap().clone())
    }

    fn create_label(&self, name: &str) -> Result<MailboxLabel, MailboxError> {
        self.created_labels.lock().unwrap().push(name.to_string());
        let label = MailboxLabel {
            id: format!("Label_{}", name.to_ascii_lowercase().replace(' ', "_")),
            name: name.to_string(),
        };
        self.labels.lock().unwrap().push(label.clone());
        if self.racing_label_names.lock().unwrap().remove(name) {
            return Err(MailboxError::Conflict(name.to_string()));
        }
        Ok(label)
    }
}

/// Returns one fixed decision and counts calls. Can be gated to hold every
/// caller inside `classify` until released.
pub struct ScriptedClassifier {
    decision: Result<Classification, String>,
    pub calls: Mutex<Vec<(String, String)>>,
    entered: AtomicUsize,
    gate: Option<(Mutex<bool>, Condvar)>,
}

impl ScriptedClassifier {
    pub fn returning(decision: Classification) -> Arc<Self> {
        Arc::new(Self {
            decision: Ok(decision),
            calls: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            decision: Err(reason.to_string()),
            calls: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn gated(decision: Classification) -> Arc<Self> {
        Arc::new(Self {
            decision: Ok(decision),
            calls: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            gate: Some((Mutex::new(false), Condvar::new())),
        })
    }

    pub fn open_gate(&self) {
        if let Some((open, condvar)) = &self.gate {
            *open.lock().unwrap() = true;
            condvar.notify_all();
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.entered.load(Ordering::SeqCst) >= count)
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, subject: &str, body: &str) -> Result<Classification, ClassifierError> {
        self.calls
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some((open, condvar)) = &self.gate {
            let mut guard = open.lock().unwrap();
            while !*guard {
                guard = condvar.wait(guard).unwrap();
            }
        }
        self.decision
            .clone()
            .map_err(ClassifierError::Http)
    }
}

/// Delegates reads to an inner store and fails every commit.
pub struct FailingCommitStore<S> {
    pub inner: S,
}

impl<S: ProcessedStore> ProcessedStore for FailingCommitStore<S> {
    fn already_committed(&self, message_id: &str) -> Result<bool, StoreError> {
        self.inner.already_committed(message_id)
    }

    fn commit(&self, _record: &ProcessedRecord) -> Result<bool, StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }
}

/// Every lookup fails.
pub struct UnavailableStore;

impl ProcessedStore for UnavailableStore {
    fn already_committed(&self, _message_id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "database is locked",
        )))
    }

    fn commit(&self, _record: &ProcessedRecord) -> Result<bool, StoreError> {
        Ok(true)
    }
}

pub fn label_table() -> LabelTable {
    let mut table = LabelTable::new();
    for category in Category::ALL {
        table.insert(category, format!("Label_{}", category));
    }
    table
}

pub fn action_needed(reply: &str, display_name: &str) -> Classification {
    Classification::new(
        Category::ActionNeeded,
        Some("action_needed"),
        Some(reply.to_string()),
        Some(display_name.to_string()),
    )
}

pub fn processor(
    store: Arc<dyn ProcessedStore>,
    mailbox: Arc<RecordingMailbox>,
    classifier: Arc<ScriptedClassifier>,
) -> JobProcessor {
    let mailbox: Arc<dyn Mailbox> = mailbox;
    JobProcessor::new(
        store,
        UnitFetcher::new(mailbox.clone()),
        classifier,
        EffectApplier::new(mailbox, label_table()),
    )
}

pub fn added(id: &str, labels: &[&str]) -> HistoryMessage {
    HistoryMessage {
        id: id.to_string(),
        label_ids: labels.iter().map(|label| label.to_string()).collect(),
    }
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}
