mod test_support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use test_support::{
    action_needed, processor, FailingCommitStore, RecordingMailbox, ScriptedClassifier,
    UnavailableStore,
};
use triage_module::email::{Category, Classification, Email};
use triage_module::processed_store::{ProcessedStore, SqliteProcessedStore};
use triage_module::shutdown::ShutdownSignal;
use triage_module::worker_pool::{Job, JobOutcome, PoolConfig, WorkerPool};

fn sqlite_store(temp: &TempDir) -> Arc<SqliteProcessedStore> {
    Arc::new(SqliteProcessedStore::new(temp.path().join("mailai.db")).expect("store"))
}

fn fetch(id: &str) -> Job {
    Job::Fetch {
        message_id: id.to_string(),
    }
}

#[test]
fn action_needed_message_is_labeled_drafted_and_committed() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    mailbox.add_message("m1", "alex@example.com", "Invoice", "Can you confirm the invoice?");
    let classifier = ScriptedClassifier::returning(action_needed("Sure, confirming now.", "Alex"));
    let processor = processor(store.clone(), mailbox.clone(), classifier.clone());

    let outcome = processor.process(fetch("m1"), &ShutdownSignal::new(), 0);

    assert_eq!(outcome, JobOutcome::Committed);
    assert_eq!(
        *mailbox.applied_labels.lock().unwrap(),
        vec![("m1".to_string(), "Label_action_needed".to_string())]
    );
    let drafts = mailbox.drafts.lock().unwrap().clone();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].recipient, "Alex <alex@example.com>");
    assert_eq!(drafts[0].subject, "Invoice");
    assert_eq!(drafts[0].body, "Sure, confirming now.");

    let record = store.get("m1").expect("get").expect("record");
    assert_eq!(record.category, Category::ActionNeeded);
    assert_eq!(record.draft, "Sure, confirming now.");
    assert_eq!(store.count().expect("count"), 1);
}

#[test]
fn empty_body_never_reaches_classifier() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    mailbox.add_message("m2", "news@example.com", "Hello", "");
    let classifier = ScriptedClassifier::returning(action_needed("unused", ""));
    let processor = processor(store.clone(), mailbox.clone(), classifier.clone());

    let outcome = processor.process(fetch("m2"), &ShutdownSignal::new(), 0);

    assert_eq!(outcome, JobOutcome::EmptyBody);
    assert_eq!(classifier.call_count(), 0);
    assert_eq!(mailbox.label_count(), 0);
    assert_eq!(mailbox.draft_count(), 0);
    assert!(!store.already_committed("m2").expect("check"));
}

#[test]
fn redelivered_message_has_no_further_effects() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    mailbox.add_message("m1", "alex@example.com", "Invoice", "Can you confirm the invoice?");
    let classifier = ScriptedClassifier::returning(action_needed("Sure, confirming now.", "Alex"));
    let processor = processor(store.clone(), mailbox.clone(), classifier.clone());
    let signal = ShutdownSignal::new();

    assert_eq!(processor.process(fetch("m1"), &signal, 0), JobOutcome::Committed);
    let before = store.get("m1").expect("get").expect("record");

    let prefetched = Job::Prefetched(Email {
        id: "m1".to_string(),
        sender: "alex@example.com".to_string(),
        subject: "Invoice".to_string(),
        body: "Can you confirm the invoice?".to_string(),
    });
    assert_eq!(processor.process(prefetched, &signal, 1), JobOutcome::AlreadyCommitted);
    assert_eq!(processor.process(fetch("m1"), &signal, 2), JobOutcome::AlreadyCommitted);

    assert_eq!(classifier.call_count(), 1);
    assert_eq!(mailbox.label_count(), 1);
    assert_eq!(mailbox.draft_count(), 1);
    assert_eq!(mailbox.fetch_count(), 1);
    assert_eq!(store.get("m1").expect("get").expect("record"), before);
}

#[test]
fn label_failure_does_not_block_draft_or_commit() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    mailbox.fail_labels.store(true, Ordering::SeqCst);
    mailbox.add_message("m3", "sam@example.com", "Meeting", "Are you free Thursday?");
    let classifier = ScriptedClassifier::returning(action_needed("Thursday works.", "Sam"));
    let processor = processor(store.clone(), mailbox.clone(), classifier);

    let outcome = processor.process(fetch("m3"), &ShutdownSignal::new(), 0);

    assert_eq!(outcome, JobOutcome::Committed);
    assert_eq!(mailbox.label_count(), 0);
    assert_eq!(mailbox.draft_count(), 1);
    assert!(store.already_committed("m3").expect("check"));
}

#[test]
fn non_action_category_gets_label_only() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    mailbox.add_message("m4", "deals@shop.example", "50% off", "Big sale today");
    let classifier = ScriptedClassifier::returning(Classification::new(
        Category::Newsletter,
        Some("newsletter"),
        Some("Thanks!".to_string()),
        None,
    ));
    let processor = processor(store.clone(), mailbox.clone(), classifier);

    assert_eq!(
        processor.process(fetch("m4"), &ShutdownSignal::new(), 0),
        JobOutcome::Committed
    );
    assert_eq!(mailbox.label_count(), 1);
    assert_eq!(mailbox.draft_count(), 0);
    assert_eq!(store.get("m4").expect("get").expect("record").draft, "");
}

#[test]
fn classifier_failure_leaves_no_trace() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    mailbox.add_message("m5", "alex@example.com", "Invoice", "Please pay");
    let classifier = ScriptedClassifier::failing("timeout");
    let processor = processor(store.clone(), mailbox.clone(), classifier.clone());

    let outcome = processor.process(fetch("m5"), &ShutdownSignal::new(), 0);

    assert!(matches!(outcome, JobOutcome::Failed(_)));
    assert_eq!(classifier.call_count(), 1);
    assert_eq!(mailbox.label_count(), 0);
    assert!(!store.already_committed("m5").expect("check"));
}

#[test]
fn missing_and_unreachable_messages() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    let classifier = ScriptedClassifier::returning(action_needed("hi", ""));
    let processor = processor(store.clone(), mailbox.clone(), classifier.clone());
    let signal = ShutdownSignal::new();

    assert_eq!(processor.process(fetch("gone"), &signal, 0), JobOutcome::NotFound);

    mailbox.fail_fetches.store(true, Ordering::SeqCst);
    assert!(matches!(
        processor.process(fetch("gone"), &signal, 0),
        JobOutcome::Failed(_)
    ));
    assert_eq!(classifier.call_count(), 0);
}

#[test]
fn unavailable_store_aborts_before_fetch() {
    let mailbox = RecordingMailbox::new();
    mailbox.add_message("m6", "alex@example.com", "Invoice", "Please pay");
    let classifier = ScriptedClassifier::returning(action_needed("ok", ""));
    let processor = processor(Arc::new(UnavailableStore), mailbox.clone(), classifier.clone());

    let outcome = processor.process(fetch("m6"), &ShutdownSignal::new(), 0);

    assert!(matches!(outcome, JobOutcome::Failed(_)));
    assert_eq!(mailbox.fetch_count(), 0);
    assert_eq!(classifier.call_count(), 0);
}

#[test]
fn commit_failure_after_effects_is_reported() {
    let temp = TempDir::new().expect("tempdir");
    let inner = SqliteProcessedStore::new(temp.path().join("mailai.db")).expect("store");
    let store = Arc::new(FailingCommitStore {
        inner: inner.clone(),
    });
    let mailbox = RecordingMailbox::new();
    mailbox.add_message("m7", "alex@example.com", "Invoice", "Can you confirm?");
    let classifier = ScriptedClassifier::returning(action_needed("Confirmed.", "Alex"));
    let processor = processor(store, mailbox.clone(), classifier);

    let outcome = processor.process(fetch("m7"), &ShutdownSignal::new(), 0);

    assert!(matches!(outcome, JobOutcome::Failed(reason) if reason.contains("disk full")));
    assert_eq!(mailbox.label_count(), 1);
    assert_eq!(mailbox.draft_count(), 1);
    assert!(!inner.already_committed("m7").expect("check"));
}

#[test]
fn cancelled_job_stops_before_classification() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    mailbox.add_message("m8", "alex@example.com", "Invoice", "Can you confirm?");
    let classifier = ScriptedClassifier::returning(action_needed("ok", ""));
    let processor = processor(store.clone(), mailbox.clone(), classifier.clone());
    let signal = ShutdownSignal::new();
    signal.cancel();

    assert_eq!(processor.process(fetch("m8"), &signal, 0), JobOutcome::Cancelled);
    assert_eq!(classifier.call_count(), 0);
    assert_eq!(mailbox.label_count(), 0);
    assert!(!store.already_committed("m8").expect("check"));
}

#[test]
fn concurrent_duplicates_apply_effects_once() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    mailbox.add_message("m1", "alex@example.com", "Invoice", "Can you confirm the invoice?");
    let classifier = ScriptedClassifier::returning(action_needed("Sure, confirming now.", "Alex"));
    let processor = Arc::new(processor(store.clone(), mailbox.clone(), classifier.clone()));

    let pool = WorkerPool::start(
        PoolConfig {
            workers: 4,
            queue_capacity: 16,
            throttle: Duration::from_millis(1),
        },
        processor,
        ShutdownSignal::new(),
    )
    .expect("pool");
    for _ in 0..10 {
        pool.submit(fetch("m1")).expect("submit");
    }
    pool.close_and_join();

    assert_eq!(pool.completed_jobs(), 10);
    assert_eq!(classifier.call_count(), 1);
    assert_eq!(mailbox.label_count(), 1);
    assert_eq!(mailbox.draft_count(), 1);
    assert_eq!(store.count().expect("count"), 1);
}

#[test]
fn full_queue_blocks_submitters_until_workers_catch_up() {
    let temp = TempDir::new().expect("tempdir");
    let store = sqlite_store(&temp);
    let mailbox = RecordingMailbox::new();
    for id in ["b1", "b2", "b3", "b4"] {
        mailbox.add_message(id, "alex@example.com", "Invoice", "Can you confirm?");
    }
    let classifier = ScriptedClassifier::gated(action_needed("ok", "Alex"));
    let processor = Arc::new(processor(store.clone(), mailbox.clone(), classifier.clone()));
    let pool = Arc::new(
        WorkerPool::start(
            PoolConfig {
                workers: 1,
                queue_capacity: 2,
                throttle: Duration::ZERO,
            },
            processor,
            ShutdownSignal::new(),
        )
        .expect("pool"),
    );

    pool.submit(fetch("b1")).expect("submit b1");
    assert!(classifier.wait_entered(1, Duration::from_secs(2)));
    pool.submit(fetch("b2")).expect("submit b2");
    pool.submit(fetch("b3")).expect("submit b3");

    let blocked = {
        let pool = pool.clone();
        std::thread::spawn(move || pool.submit(fetch("b4")))
    };
    std::thread::sleep(Duration::from_millis(200));
    assert!(!blocked.is_finished());

    classifier.open_gate();
    blocked.join().expect("join").expect("submit b4");
    pool.close_and_join();

    assert_eq!(classifier.call_count(), 4);
    assert_eq!(store.count().expect("count"), 4);
}
