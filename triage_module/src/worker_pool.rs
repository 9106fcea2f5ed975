//! Bounded job queue drained by a fixed set of worker threads.
//!
//! Each job passes the idempotency barrier (in-process claim, then the durable
//! store) before anything touches the mailbox or the classifier, and is
//! committed only after its effects have been attempted. Workers sleep a
//! fixed interval after every job to stay under the classifier's rate limit.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::claims::ClaimSet;
use crate::classifier::Classifier;
use crate::effects::EffectApplier;
use crate::email::{Email, ProcessedRecord};
use crate::fetcher::{FetchError, UnitFetcher};
use crate::processed_store::ProcessedStore;
use crate::shutdown::ShutdownSignal;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(200);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Backlog entry: content is fetched by the worker.
    Fetch { message_id: String },
    /// Live notification: content was fetched by the dispatcher.
    Prefetched(Email),
}

impl Job {
    pub fn message_id(&self) -> &str {
        match self {
            Job::Fetch { message_id } => message_id,
            Job::Prefetched(email) => &email.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Committed,
    AlreadyCommitted,
    InFlightElsewhere,
    EmptyBody,
    NotFound,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub throttle: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            throttle: DEFAULT_THROTTLE,
        }
    }
}

/// The per-job state machine shared by all workers.
pub struct JobProcessor {
    store: Arc<dyn ProcessedStore>,
    fetcher: UnitFetcher,
    classifier: Arc<dyn Classifier>,
    effects: EffectApplier,
    claims: ClaimSet,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn ProcessedStore>,
        fetcher: UnitFetcher,
        classifier: Arc<dyn Classifier>,
        effects: EffectApplier,
    ) -> Self {
        Self {
            store,
            fetcher,
            classifier,
            effects,
            claims: ClaimSet::new(),
        }
    }

    pub fn process(&self, job: Job, signal: &ShutdownSignal, worker: usize) -> JobOutcome {
        let message_id = job.message_id().to_string();

        let Some(_claim) = self.claims.try_claim(&message_id) else {
            debug!("worker {} message {}: in flight elsewhere", worker, message_id);
            return JobOutcome::InFlightElsewhere;
        };

        match self.store.already_committed(&message_id) {
            Ok(true) => {
                debug!("worker {} message {}: already processed", worker, message_id);
                return JobOutcome::AlreadyCommitted;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(
                    "worker {} message {}: idempotency check failed, dropping job: {}",
                    worker, message_id, err
                );
                return JobOutcome::Failed(err.to_string());
            }
        }

        let email = match job {
            Job::Prefetched(email) => email,
            Job::Fetch { .. } => match self.fetcher.fetch(&message_id) {
                Ok(email) => email,
                Err(FetchError::NotFound(_)) => {
                    info!("worker {} message {}: no longer exists", worker, message_id);
                    return JobOutcome::NotFound;
                }
                Err(err) => {
                    warn!("worker {} message {}: {}", worker, message_id, err);
                    return JobOutcome::Failed(err.to_string());
                }
            },
        };

        if !email.has_body() {
            info!("worker {} message {}: empty body, skipping", worker, message_id);
            return JobOutcome::EmptyBody;
        }

        if signal.is_cancelled() {
            info!("worker {} message {}: cancelled before classification", worker, message_id);
            return JobOutcome::Cancelled;
        }

        let classification = match self.classifier.classify(&email.subject, &email.body) {
            Ok(classification) => classification,
            Err(err) => {
                warn!("worker {} message {}: classification failed: {}", worker, message_id, err);
                return JobOutcome::Failed(err.to_string());
            }
        };

        let report = self.effects.apply(&email, &classification);

        let record = ProcessedRecord::from_classification(&email, &classification);
        match self.store.commit(&record) {
            Ok(inserted) => {
                if !inserted {
                    warn!(
                        "worker {} message {}: record already present at commit",
                        worker, message_id
                    );
                }
                info!(
                    "worker {} message {}: category={} label={} labeled={} drafted={}",
                    worker,
                    message_id,
                    classification.category,
                    classification.label,
                    report.labeled,
                    report.drafted
                );
                JobOutcome::Committed
            }
            Err(err) => {
                error!(
                    "worker {} message {}: effects applied but commit failed, may be reprocessed after restart: {}",
                    worker, message_id, err
                );
                JobOutcome::Failed(err.to_string())
            }
        }
    }
}

pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    closed: Arc<AtomicBool>,
    signal: ShutdownSignal,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    completed: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn start(
        config: PoolConfig,
        processor: Arc<JobProcessor>,
        signal: ShutdownSignal,
    ) -> Result<Self, PoolError> {
        let (sender, receiver) = bounded::<Job>(config.queue_capacity.max(1));
        let completed = Arc::new(AtomicUsize::new(0));
        let workers = config.workers.max(1);

        let pool = Self {
            sender: Mutex::new(Some(sender)),
            closed: Arc::new(AtomicBool::new(false)),
            signal: signal.clone(),
            handles: Mutex::new(Vec::with_capacity(workers)),
            completed: completed.clone(),
        };

        for worker in 0..workers {
            let receiver = receiver.clone();
            let processor = processor.clone();
            let signal = signal.clone();
            let completed = completed.clone();
            let throttle = config.throttle;
            let spawned = thread::Builder::new()
                .name(format!("triage-worker-{}", worker))
                .spawn(move || {
                    run_worker(worker, receiver, processor, signal, completed, throttle)
                });
            match spawned {
                Ok(handle) => pool.lock_handles().push(handle),
                Err(err) => {
                    pool.close_and_join();
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        info!(
            "worker pool started: workers={} capacity={} throttle={:?}",
            workers, config.queue_capacity, config.throttle
        );
        Ok(pool)
    }

    /// Enqueue a job, blocking while the queue is full.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        let sender = {
            let guard = self.sender.lock().unwrap_or_else(|poison| poison.into_inner());
            guard.clone().ok_or(PoolError::Closed)?
        };
        let mut job = job;
        loop {
            if self.closed.load(Ordering::Relaxed) || self.signal.is_cancelled() {
                return Err(PoolError::Closed);
            }
            match sender.send_timeout(job, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => job = returned,
                Err(SendTimeoutError::Disconnected(_)) => return Err(PoolError::Closed),
            }
        }
    }

    pub fn completed_jobs(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.signal.cancel();
    }

    /// Stop accepting jobs, let workers drain the queue, and wait for them.
    pub fn close_and_join(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.sender
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        let handles: Vec<_> = self.lock_handles().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    pub fn stop_and_join(&self) {
        self.cancel();
        self.close_and_join();
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<thread::JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

fn run_worker(
    worker: usize,
    receiver: Receiver<Job>,
    processor: Arc<JobProcessor>,
    signal: ShutdownSignal,
    completed: Arc<AtomicUsize>,
    throttle: Duration,
) {
    debug!("worker {} started", worker);
    while !signal.is_cancelled() {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(job) => {
                let outcome = processor.process(job, &signal, worker);
                debug!("worker {} outcome {:?}", worker, outcome);
                completed.fetch_add(1, Ordering::Relaxed);
                signal.sleep(throttle);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("worker {} stopped", worker);
}
