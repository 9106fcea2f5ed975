use std::sync::Arc;
use tracing::{info, warn};

use google_module::{GmailClient, GoogleAuth, PubSubClient};

use crate::backlog::run_backlog_scan;
use crate::classifier::OpenAiClassifier;
use crate::effects::{bootstrap_labels, EffectApplier};
use crate::fetcher::UnitFetcher;
use crate::history::HistoryResolver;
use crate::listener::{HistoryDispatcher, NotificationListener};
use crate::mailbox::Mailbox;
use crate::processed_store::{ProcessedStore, SqliteProcessedStore};
use crate::pubsub_consumer::{start_pull_consumer, ListenerControl};
use crate::shutdown::ShutdownSignal;
use crate::worker_pool::{JobProcessor, WorkerPool};

use super::config::ServiceConfig;
use super::BoxError;

/// A running pipeline: workers started, watch requested, backlog queued.
/// Every method blocks and must run off the async runtime.
pub struct Pipeline {
    pub listener: Arc<NotificationListener>,
    pool: Arc<WorkerPool>,
    auth: GoogleAuth,
}

impl Pipeline {
    pub fn start(config: &ServiceConfig) -> Result<Self, BoxError> {
        let store: Arc<dyn ProcessedStore> =
            Arc::new(SqliteProcessedStore::new(&config.database_path)?);
        info!("idempotency store at {}", config.database_path.display());

        let auth = GoogleAuth::new(config.google_auth.clone())?;
        let mailbox: Arc<dyn Mailbox> = Arc::new(GmailClient::new(auth.clone()));

        let labels = bootstrap_labels(mailbox.as_ref(), &config.label_names)?;
        info!("mailbox labels ready");

        let classifier = Arc::new(OpenAiClassifier::new(config.openai.clone()));
        let signal = ShutdownSignal::new();
        let fetcher = UnitFetcher::new(mailbox.clone());
        let processor = Arc::new(JobProcessor::new(
            store.clone(),
            fetcher.clone(),
            classifier,
            EffectApplier::new(mailbox.clone(), labels),
        ));
        let pool = Arc::new(WorkerPool::start(config.pool, processor, signal.clone())?);

        let resolver = HistoryResolver::new(
            mailbox.clone(),
            config.history_max_attempts,
            config.history_backoff_step,
            signal.clone(),
        );
        let dispatcher = Arc::new(HistoryDispatcher::new(
            resolver,
            store,
            fetcher,
            pool.clone(),
        ));
        let listener = Arc::new(NotificationListener::new(
            dispatcher,
            config.cursor_cache_capacity,
        ));

        match mailbox.enable_watch(&config.topic_name) {
            Ok(history_id) => info!(
                "watching mailbox on {} from history {}",
                config.topic_name, history_id
            ),
            Err(err) => warn!(
                "failed to enable watch on {}, live notifications will not arrive: {}",
                config.topic_name, err
            ),
        }

        match run_backlog_scan(mailbox.as_ref(), &pool, config.initial_emails_to_fetch) {
            Ok(submitted) => info!("backlog scan queued {} job(s)", submitted),
            Err(err) => warn!("backlog scan failed: {}", err),
        }

        Ok(Self {
            listener,
            pool,
            auth,
        })
    }

    pub fn start_pull_intake(&self, config: &ServiceConfig) -> Result<ListenerControl, BoxError> {
        let client = PubSubClient::new(self.auth.clone(), &config.project_id, &config.subscription_id);
        info!("pulling notifications from {}", client.subscription());
        Ok(start_pull_consumer(
            Arc::new(client),
            self.listener.clone(),
            config.pull,
        )?)
    }

    /// Drain the queue and join the workers. Intake must already be stopped.
    pub fn shutdown(&self) {
        info!("draining worker pool");
        self.pool.close_and_join();
        info!(
            "worker pool stopped after {} job(s)",
            self.pool.completed_jobs()
        );
    }
}
