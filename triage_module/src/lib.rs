pub mod backlog;
pub mod claims;
pub mod classifier;
pub mod effects;
pub mod email;
pub mod fetcher;
pub mod history;
pub mod listener;
pub mod mailbox;
pub mod processed_store;
pub mod pubsub_consumer;
pub mod service;
pub mod shutdown;
pub mod worker_pool;

pub use classifier::{Classifier, ClassifierError, OpenAiClassifier, OpenAiConfig};
pub use effects::{bootstrap_labels, EffectApplier, EffectError, LabelTable};
pub use email::{Category, Classification, Email, ProcessedRecord};
pub use fetcher::{FetchError, UnitFetcher};
pub use history::{HistoryError, HistoryResolver};
pub use listener::{CursorCache, ListenerOutcome, NotificationListener};
pub use mailbox::{Mailbox, MailboxError};
pub use processed_store::{ProcessedStore, SqliteProcessedStore, StoreError};
pub use shutdown::ShutdownSignal;
pub use worker_pool::{Job, JobOutcome, JobProcessor, PoolConfig, PoolError, WorkerPool};
