use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use herald_core::store::{DistributedLock, ScheduleStore};
use herald_core::time::now_millis;
use herald_core::{
    DispatchService, Dispatcher, DispatcherConfig, Emitter, InMemoryStore, MessageRepository,
    PollOutcome, RocksDbStore,
};

#[derive(Default)]
struct SharedLog {
    lines: Mutex<Vec<String>>,
}

impl SharedLog {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Emitter for SharedLog {
    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        panic!("unexpected scheduler error: {message}");
    }
}

/// Build `count` independent dispatcher instances over one shared backend,
/// each with its own service and repository.
fn instances<S>(store: &Arc<S>, log: &Arc<SharedLog>, count: usize) -> Vec<Arc<Dispatcher>>
where
    S: ScheduleStore + DistributedLock + 'static,
{
    (0..count)
        .map(|_| {
            let service = DispatchService::new(MessageRepository::new(store.clone()));
            let dispatcher = Dispatcher::builder(service, store.clone())
                .config(&DispatcherConfig::default())
                .emitter(log.clone())
                .build();
            Arc::new(dispatcher)
        })
        .collect()
}

async fn poll_all(dispatchers: &[Arc<Dispatcher>]) -> usize {
    let handles: Vec<_> = dispatchers
        .iter()
        .map(|d| {
            let d = Arc::clone(d);
            tokio::spawn(async move { d.poll().await })
        })
        .collect();

    let mut emitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            PollOutcome::Completed(report) => emitted += report.emitted,
            PollOutcome::Skipped => {}
            PollOutcome::Failed(e) => panic!("poll failed: {e}"),
        }
    }
    emitted
}

async fn schedule_batch(store: Arc<dyn ScheduleStore>, count: i64) -> HashSet<String> {
    let service = DispatchService::new(MessageRepository::new(store));
    let now = now_millis();
    let mut expected = HashSet::new();
    for i in 0..count {
        let payload = format!("payload-{i}");
        service
            .schedule_message(now - 2000 + i, payload.clone())
            .await
            .unwrap();
        expected.insert(payload);
    }
    expected
}

fn assert_emitted_once(log: &SharedLog, expected: &HashSet<String>) {
    let lines = log.lines();
    assert_eq!(lines.len(), expected.len(), "duplicate or missing emission");
    let seen: HashSet<String> = lines.into_iter().collect();
    assert_eq!(&seen, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_memory_store_emits_each_message_once() {
    let store = Arc::new(InMemoryStore::new());
    let log = Arc::new(SharedLog::default());
    let expected = schedule_batch(store.clone(), 40).await;

    let dispatchers = instances(&store, &log, 6);
    let emitted = poll_all(&dispatchers).await;

    assert_eq!(emitted, 40);
    assert_emitted_once(&log, &expected);
    assert_eq!(store.index_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_rocksdb_store_emits_each_message_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RocksDbStore::open(dir.path()).unwrap());
    let log = Arc::new(SharedLog::default());
    let expected = schedule_batch(store.clone(), 40).await;

    let dispatchers = instances(&store, &log, 6);
    let emitted = poll_all(&dispatchers).await;

    assert_eq!(emitted, 40);
    assert_emitted_once(&log, &expected);
    assert!(store.range_by_score(i64::MIN, i64::MAX).await.unwrap().is_empty());
}

#[tokio::test]
async fn restarted_instance_emits_persisted_messages() {
    let dir = tempfile::tempdir().unwrap();
    let now = now_millis();

    {
        let store = Arc::new(RocksDbStore::open(dir.path()).unwrap());
        let service = DispatchService::new(MessageRepository::new(store.clone()));
        service.schedule_message(now - 10, "survives restart").await.unwrap();
        service
            .schedule_message(now + 3_600_000, "still pending")
            .await
            .unwrap();
        store.flush().unwrap();
    }

    let store = Arc::new(RocksDbStore::open(dir.path()).unwrap());
    let log = Arc::new(SharedLog::default());
    let dispatcher = instances(&store, &log, 1).remove(0);

    let outcome = dispatcher.poll().await;

    assert!(matches!(outcome, PollOutcome::Completed(r) if r.emitted == 1));
    assert_eq!(log.lines(), vec!["survives restart"]);
    let remaining = store.range_by_score(0, i64::MAX).await.unwrap();
    assert_eq!(remaining.len(), 1);
}
