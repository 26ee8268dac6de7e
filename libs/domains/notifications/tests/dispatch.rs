//! Email-queue jobs through a real worker, the in-memory store and the mock
//! provider.

use chrono::Utc;
use domain_notifications::{
    confirmation_batch, EmailQueue, MockEmailProvider, NotificationDispatcher, NotificationService,
};
use job_queue::{
    HandlerRegistry, JobEvent, JobProducer, JobState, JobStore, JobWorker, ManualClock,
    MemoryJobStore, QueueDef, QueueDefaults, WorkerConfig,
};
use std::sync::Arc;

const READER: &str = "reader@example.com";

struct Harness {
    clock: ManualClock,
    store: Arc<MemoryJobStore>,
    provider: Arc<MockEmailProvider>,
    service: NotificationService,
    worker: JobWorker,
}

fn harness() -> Harness {
    let clock = ManualClock::new(Utc::now());
    let store = Arc::new(MemoryJobStore::with_clock(Arc::new(clock.clone())));
    let producer = JobProducer::new(store.clone(), QueueDefaults::default());

    let provider = Arc::new(MockEmailProvider::new());
    let mut registry = HandlerRegistry::new();
    registry.register_processor::<EmailQueue, _>(Arc::new(NotificationDispatcher::with_arc(
        provider.clone(),
    )));

    let worker = JobWorker::new(store.clone(), registry, WorkerConfig::new(EmailQueue::QUEUE_NAME));

    Harness {
        clock,
        store,
        provider,
        service: NotificationService::new(producer),
        worker,
    }
}

#[tokio::test]
async fn batch_with_one_failing_message_is_retried_as_a_whole() {
    let h = harness();
    let batch = confirmation_batch(READER);
    let second_subject = batch.0[1].subject.clone();
    h.provider.fail_subject(second_subject, 1);

    let id = h.service.queue_confirmation_emails(READER).await.unwrap();
    let mut events = h.worker.subscribe();

    // Attempt 1: message #2 fails, so the job fails and backs off
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);
    match events.recv().await.unwrap() {
        JobEvent::Failed { job_id, attempts_made, will_retry, error, .. } => {
            assert_eq!(job_id, id);
            assert_eq!(attempts_made, 1);
            assert!(will_retry);
            assert!(error.contains("1 of 3 emails failed"), "{}", error);
        }
        other => panic!("unexpected event {:?}", other),
    }
    let job = h.store.get(EmailQueue::QUEUE_NAME, id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Delayed);
    assert_eq!(h.provider.attempts().len(), 3);

    // Attempt 2 after the 1s backoff resends all three
    h.clock.advance_ms(1000);
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);
    assert_eq!(events.recv().await.unwrap().name(), "job.completed");

    let attempts = h.provider.attempts();
    assert_eq!(attempts.len(), 6);
    let mut retried: Vec<_> = attempts[3..].iter().map(|m| m.subject.clone()).collect();
    let mut expected: Vec<_> = batch.iter().map(|m| m.subject.clone()).collect();
    retried.sort();
    expected.sort();
    assert_eq!(retried, expected);

    let job = h.store.get(EmailQueue::QUEUE_NAME, id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts_made, 2);
    assert_eq!(job.result.as_ref().unwrap()["sent"], 3);
}

#[tokio::test]
async fn persistently_failing_batch_ends_failed_after_three_attempts() {
    let h = harness();
    h.provider.always_fail_subject("Your account is ready");

    let id = h.service.queue_confirmation_emails(READER).await.unwrap();

    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);
    h.clock.advance_ms(1000);
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);
    h.clock.advance_ms(2000);
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);
    h.clock.advance_ms(60_000);
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 0);

    let job = h.store.get(EmailQueue::QUEUE_NAME, id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts_made, 3);
    assert!(job.last_error.unwrap().contains("mailbox unavailable"));
    assert_eq!(h.provider.attempts().len(), 9);
}

#[tokio::test]
async fn malformed_payload_fails_without_sending() {
    let h = harness();
    let producer = JobProducer::new(h.store.clone(), QueueDefaults::default().with_max_attempts(1));
    let id = producer
        .enqueue(EmailQueue::QUEUE_NAME, &serde_json::json!({ "toEmail": READER }), Default::default())
        .await
        .unwrap();

    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);

    let job = h.store.get(EmailQueue::QUEUE_NAME, id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.last_error.unwrap().starts_with("Invalid payload"));
    assert!(h.provider.attempts().is_empty());
}
