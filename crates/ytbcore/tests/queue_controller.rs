//! End-to-end tests of the queue actor with scripted workers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use ytbcore::core::error::{AppError, AppResult};
use ytbcore::core::journal::Journal;
use ytbcore::core::process::DirectTerminator;
use ytbcore::download::controller::{spawn_queue, QueueHandle, TaskReporter, TaskRunner, TitleResolver};
use ytbcore::download::progress::DownloadProgress;
use ytbcore::download::queue::{
    CancelOutcome, DispatchedTask, EntryRef, EntryStatus, FailureKind, QueueSnapshot, TaskOutcome,
};

/// Behaviour is picked from the locator: `fail`, `hang`, `panic`, else success.
#[derive(Default)]
struct ScriptedRunner {
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn run(&self, task: DispatchedTask, reporter: TaskReporter) -> TaskOutcome {
        let locator = task.request.locator.clone();
        self.started.lock().push(locator.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        reporter.status(EntryStatus::Downloading);
        reporter.progress(DownloadProgress::new(50));

        if locator.contains("hang") {
            tokio::select! {
                _ = task.token.cancelled() => return TaskOutcome::Cancelled,
                _ = tokio::time::sleep(Duration::from_secs(30)) => return TaskOutcome::Succeeded,
            }
        }
        if locator.contains("panic") {
            panic!("scripted worker panic");
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        if locator.contains("fail") {
            reporter.status(EntryStatus::Failed(FailureKind::Tool));
            TaskOutcome::Failed(FailureKind::Tool)
        } else {
            reporter.status(EntryStatus::Remuxing);
            reporter.status(EntryStatus::Succeeded);
            TaskOutcome::Succeeded
        }
    }
}

/// `"Title of <last segment>"`, or an error for locators containing `notitle`.
struct FakeResolver;

#[async_trait]
impl TitleResolver for FakeResolver {
    async fn resolve(&self, locator: &str) -> AppResult<String> {
        if locator.contains("notitle") {
            return Err(AppError::Validation("no title".to_string()));
        }
        let last = locator.rsplit('/').next().unwrap_or(locator);
        Ok(format!("Title of {}", last))
    }
}

fn start() -> (QueueHandle, Arc<ScriptedRunner>) {
    let runner = Arc::new(ScriptedRunner::default());
    let (handle, _join) = spawn_queue(
        runner.clone(),
        Arc::new(FakeResolver),
        Arc::new(DirectTerminator),
        Journal::shared(),
    );
    (handle, runner)
}

async fn wait_for(handle: &QueueHandle, pred: impl Fn(&QueueSnapshot) -> bool) -> QueueSnapshot {
    for _ in 0..500 {
        let snapshot = handle.snapshot().await.unwrap();
        if pred(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", handle.snapshot().await.unwrap());
}

fn all_finished(snapshot: &QueueSnapshot) -> bool {
    snapshot.is_idle() && snapshot.entries.iter().all(|e| e.status.is_terminal())
}

#[tokio::test]
async fn test_runs_one_at_a_time_in_fifo_order() {
    let (handle, runner) = start();
    let a = handle.enqueue("https://example.com/v/a", "best").await.unwrap();
    let b = handle.enqueue("https://example.com/v/b", "best").await.unwrap();
    let c = handle.enqueue("https://example.com/v/c", "best").await.unwrap();
    assert!(a < b && b < c);

    let snapshot = wait_for(&handle, all_finished).await;
    assert_eq!(
        *runner.started.lock(),
        vec![
            "https://example.com/v/a".to_string(),
            "https://example.com/v/b".to_string(),
            "https://example.com/v/c".to_string()
        ]
    );
    assert_eq!(runner.max_running.load(Ordering::SeqCst), 1);
    assert!(snapshot.entries.iter().all(|e| e.status == EntryStatus::Succeeded));
}

#[tokio::test]
async fn test_failure_does_not_block_next() {
    let (handle, _runner) = start();
    let failing = handle.enqueue("https://example.com/v/fail", "137+140").await.unwrap();
    let ok = handle.enqueue("https://example.com/v/ok", "137+140").await.unwrap();

    let snapshot = wait_for(&handle, all_finished).await;
    assert_eq!(
        snapshot.entry(failing).unwrap().status,
        EntryStatus::Failed(FailureKind::Tool)
    );
    assert_eq!(snapshot.entry(ok).unwrap().status, EntryStatus::Succeeded);
}

#[tokio::test]
async fn test_panicking_worker_is_reported_and_queue_continues() {
    let (handle, _runner) = start();
    let broken = handle.enqueue("https://example.com/v/panic", "best").await.unwrap();
    let ok = handle.enqueue("https://example.com/v/ok", "best").await.unwrap();

    let snapshot = wait_for(&handle, all_finished).await;
    assert_eq!(
        snapshot.entry(broken).unwrap().status,
        EntryStatus::Failed(FailureKind::Internal)
    );
    assert_eq!(snapshot.entry(ok).unwrap().status, EntryStatus::Succeeded);
}

#[tokio::test]
async fn test_cancel_active_starts_next() {
    let (handle, runner) = start();
    let stuck = handle.enqueue("https://example.com/v/hang", "best").await.unwrap();
    let next = handle.enqueue("https://example.com/v/next", "best").await.unwrap();

    wait_for(&handle, |s| s.active == Some(stuck)).await;
    let outcome = handle.cancel(stuck).await.unwrap();
    assert_eq!(
        outcome,
        CancelOutcome::CancelledActive {
            id: stuck,
            terminated: false
        }
    );

    let snapshot = wait_for(&handle, all_finished).await;
    assert!(snapshot.entry(stuck).is_none());
    assert_eq!(snapshot.entry(next).unwrap().status, EntryStatus::Succeeded);
    assert_eq!(runner.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_queued_entry_never_runs() {
    let (handle, runner) = start();
    let stuck = handle.enqueue("https://example.com/v/hang", "best").await.unwrap();
    let queued = handle.enqueue("https://example.com/v/queued", "best").await.unwrap();

    wait_for(&handle, |s| s.active == Some(stuck)).await;
    assert_eq!(
        handle.cancel(queued).await.unwrap(),
        CancelOutcome::RemovedPending { id: queued }
    );
    handle.cancel(stuck).await.unwrap();

    let snapshot = wait_for(&handle, |s| s.is_idle() && s.entries.is_empty()).await;
    assert_eq!(snapshot.queued, 0);
    assert!(!runner.started.lock().iter().any(|l| l.ends_with("queued")));
}

#[tokio::test]
async fn test_cancel_by_display_key() {
    let (handle, _runner) = start();
    let id = handle.enqueue("https://example.com/v/done", "best").await.unwrap();
    wait_for(&handle, |s| all_finished(s) && s.entries[0].display_key == "Title of done").await;

    assert_eq!(
        handle.cancel(EntryRef::Key("nope".to_string())).await.unwrap(),
        CancelOutcome::NotFound
    );
    assert_eq!(
        handle.cancel(EntryRef::Key("Title of done".to_string())).await.unwrap(),
        CancelOutcome::RemovedFinished { id }
    );
}

#[tokio::test]
async fn test_title_replaces_provisional_key() {
    let (handle, _runner) = start();
    let named = handle.enqueue("https://example.com/v/song?t=1", "best").await.unwrap();
    let unnamed = handle.enqueue("https://example.com/v/notitle", "best").await.unwrap();

    let snapshot = wait_for(&handle, all_finished).await;
    assert_eq!(snapshot.entry(named).unwrap().display_key, "Title of song-t=1");
    assert_eq!(snapshot.entry(unnamed).unwrap().display_key, "notitle");
}

#[tokio::test]
async fn test_retry_and_clear() {
    let (handle, _runner) = start();
    let failing = handle.enqueue("https://example.com/v/fail", "best").await.unwrap();
    wait_for(&handle, all_finished).await;

    let retried = handle.retry(failing).await.unwrap().unwrap();
    assert!(retried > failing);
    let snapshot = wait_for(&handle, all_finished).await;
    assert!(snapshot.entry(failing).is_none());
    assert_eq!(snapshot.entries.len(), 1);

    assert_eq!(handle.clear_finished().await.unwrap(), 1);
    assert!(handle.snapshot().await.unwrap().entries.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_actor() {
    let runner = Arc::new(ScriptedRunner::default());
    let (handle, join) = spawn_queue(runner, Arc::new(FakeResolver), Arc::new(DirectTerminator), Journal::shared());
    handle.enqueue("https://example.com/v/hang", "best").await.unwrap();
    handle.shutdown().unwrap();
    tokio::time::timeout(Duration::from_secs(5), join).await.unwrap().unwrap();
    assert!(handle.snapshot().await.is_err());
}
