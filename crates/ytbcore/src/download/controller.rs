//! Queue controller actor
//!
//! One tokio task owns the [`QueueController`] and processes [`QueueMessage`]s
//! from an unbounded inbox, one at a time. Front-end requests and worker
//! reports are both messages, so queue state is never shared between threads.
//!
//! Workers run on their own tokio tasks. Each download worker is supervised
//! through its `JoinHandle`: if it panics, the supervisor still reports
//! `TaskFinished` so the next request starts.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::error::{AppError, AppResult};
use crate::core::journal::{LogCategory, SharedJournal};
use crate::core::process::{ProcessHandle, ProcessTerminator};
use crate::download::progress::DownloadProgress;
use crate::download::queue::{
    CachedTitle, CancelOutcome, DispatchedTask, DownloadRequest, EntryId, EntryRef, EntryStatus, FailureKind,
    QueueController, QueueSnapshot, TaskLauncher, TaskOutcome,
};

/// Executes one dispatched download task.
#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    async fn run(&self, task: DispatchedTask, reporter: TaskReporter) -> TaskOutcome;
}

/// Looks up the human title of a locator.
#[async_trait]
pub trait TitleResolver: Send + Sync + 'static {
    async fn resolve(&self, locator: &str) -> AppResult<String>;
}

/// Inbox of the controller actor.
#[derive(Debug)]
pub enum QueueMessage {
    Enqueue {
        request: DownloadRequest,
        reply: Option<oneshot::Sender<EntryId>>,
    },
    Cancel {
        target: EntryRef,
        reply: Option<oneshot::Sender<CancelOutcome>>,
    },
    Retry {
        id: EntryId,
        reply: Option<oneshot::Sender<Option<EntryId>>>,
    },
    ClearFinished {
        reply: Option<oneshot::Sender<usize>>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    TitleResolved {
        id: EntryId,
        locator: String,
        title: CachedTitle,
    },
    StatusChanged {
        id: EntryId,
        status: EntryStatus,
    },
    Progress {
        id: EntryId,
        progress: DownloadProgress,
    },
    ProcessStarted {
        id: EntryId,
        handle: ProcessHandle,
    },
    TaskFinished {
        id: EntryId,
        outcome: TaskOutcome,
    },
    Shutdown,
}

/// Posts a worker's reports for one entry back to the controller.
///
/// Sends never fail loudly: once the controller is gone there is nobody left
/// to tell.
#[derive(Debug, Clone)]
pub struct TaskReporter {
    id: EntryId,
    tx: mpsc::UnboundedSender<QueueMessage>,
}

impl TaskReporter {
    pub fn new(id: EntryId, tx: mpsc::UnboundedSender<QueueMessage>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    fn post(&self, msg: QueueMessage) {
        if self.tx.send(msg).is_err() {
            log::debug!("Controller gone, dropping report for {}", self.id);
        }
    }

    pub fn title_resolved(&self, locator: &str, title: CachedTitle) {
        self.post(QueueMessage::TitleResolved {
            id: self.id,
            locator: locator.to_string(),
            title,
        });
    }

    pub fn status(&self, status: EntryStatus) {
        self.post(QueueMessage::StatusChanged { id: self.id, status });
    }

    pub fn progress(&self, progress: DownloadProgress) {
        self.post(QueueMessage::Progress { id: self.id, progress });
    }

    pub fn process_started(&self, handle: ProcessHandle) {
        self.post(QueueMessage::ProcessStarted { id: self.id, handle });
    }
}

/// Cloneable front door to the controller actor.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<QueueMessage>,
}

fn controller_gone() -> AppError {
    AppError::Config("download queue is no longer running".to_string())
}

impl QueueHandle {
    fn send(&self, msg: QueueMessage) -> AppResult<()> {
        self.tx.send(msg).map_err(|_| controller_gone())
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> QueueMessage) -> AppResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| controller_gone())
    }

    /// Queues a download; returns the new entry's id.
    pub async fn enqueue(&self, locator: impl Into<String>, format_id: impl Into<String>) -> AppResult<EntryId> {
        let request = DownloadRequest::new(locator, format_id);
        self.ask(|reply| QueueMessage::Enqueue {
            request,
            reply: Some(reply),
        })
        .await
    }

    pub async fn cancel(&self, target: impl Into<EntryRef>) -> AppResult<CancelOutcome> {
        let target = target.into();
        self.ask(|reply| QueueMessage::Cancel {
            target,
            reply: Some(reply),
        })
        .await
    }

    /// Fire-and-forget cancel, usable from signal handlers.
    pub fn cancel_now(&self, target: impl Into<EntryRef>) -> AppResult<()> {
        self.send(QueueMessage::Cancel {
            target: target.into(),
            reply: None,
        })
    }

    pub async fn retry(&self, id: EntryId) -> AppResult<Option<EntryId>> {
        self.ask(|reply| QueueMessage::Retry { id, reply: Some(reply) }).await
    }

    pub async fn clear_finished(&self) -> AppResult<usize> {
        self.ask(|reply| QueueMessage::ClearFinished { reply: Some(reply) })
            .await
    }

    pub async fn snapshot(&self) -> AppResult<QueueSnapshot> {
        self.ask(|reply| QueueMessage::Snapshot { reply }).await
    }

    /// Cancels everything and stops the actor.
    pub fn shutdown(&self) -> AppResult<()> {
        self.send(QueueMessage::Shutdown)
    }
}

/// Spawns workers on the tokio runtime for the controller.
struct TokioLauncher {
    tx: mpsc::UnboundedSender<QueueMessage>,
    runner: Arc<dyn TaskRunner>,
    resolver: Arc<dyn TitleResolver>,
    journal: SharedJournal,
}

impl TaskLauncher for TokioLauncher {
    fn launch_download(&self, task: DispatchedTask) {
        let id = task.id;
        let runner = Arc::clone(&self.runner);
        let reporter = TaskReporter::new(id, self.tx.clone());
        let tx = self.tx.clone();
        let journal = Arc::clone(&self.journal);

        let worker = tokio::spawn(async move { runner.run(task, reporter).await });
        tokio::spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    journal.error(LogCategory::Download, format!("❌ Worker for {} crashed: {}", id, e));
                    TaskOutcome::Failed(FailureKind::Internal)
                }
            };
            if tx.send(QueueMessage::TaskFinished { id, outcome }).is_err() {
                log::debug!("Controller gone before {} finished", id);
            }
        });
    }

    fn launch_title_lookup(&self, id: EntryId, locator: String) {
        let resolver = Arc::clone(&self.resolver);
        let tx = self.tx.clone();
        let journal = Arc::clone(&self.journal);

        tokio::spawn(async move {
            match resolver.resolve(&locator).await {
                Ok(raw) => {
                    let title = CachedTitle::from_raw(raw);
                    let _ = tx.send(QueueMessage::TitleResolved { id, locator, title });
                }
                Err(e) => {
                    // the entry keeps its provisional key
                    journal.warn(LogCategory::Download, format!("⚠️ Title prefetch failed: {}", e));
                }
            }
        });
    }
}

/// Starts the controller actor.
///
/// Returns the handle used by the front-end and the actor's `JoinHandle`,
/// which completes after [`QueueHandle::shutdown`].
pub fn spawn_queue(
    runner: Arc<dyn TaskRunner>,
    resolver: Arc<dyn TitleResolver>,
    terminator: Arc<dyn ProcessTerminator>,
    journal: SharedJournal,
) -> (QueueHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let launcher = TokioLauncher {
        tx: tx.clone(),
        runner,
        resolver,
        journal: Arc::clone(&journal),
    };
    let controller = QueueController::new(terminator, journal);
    let join = tokio::spawn(run_controller(controller, launcher, rx));
    (QueueHandle { tx }, join)
}

async fn run_controller(
    mut queue: QueueController,
    launcher: TokioLauncher,
    mut rx: mpsc::UnboundedReceiver<QueueMessage>,
) {
    log::info!("🚀 Download queue controller started");
    while let Some(msg) = rx.recv().await {
        match msg {
            QueueMessage::Enqueue { request, reply } => {
                let id = queue.enqueue(request, &launcher);
                if let Some(reply) = reply {
                    let _ = reply.send(id);
                }
            }
            QueueMessage::Cancel { target, reply } => {
                let outcome = queue.cancel(&target);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            QueueMessage::Retry { id, reply } => {
                let new_id = queue.retry(id, &launcher);
                if let Some(reply) = reply {
                    let _ = reply.send(new_id);
                }
            }
            QueueMessage::ClearFinished { reply } => {
                let removed = queue.clear_finished();
                if let Some(reply) = reply {
                    let _ = reply.send(removed);
                }
            }
            QueueMessage::Snapshot { reply } => {
                let _ = reply.send(queue.snapshot());
            }
            QueueMessage::TitleResolved { id, locator, title } => {
                queue.apply_title(id, &locator, title);
            }
            QueueMessage::StatusChanged { id, status } => {
                queue.update_status(id, status);
            }
            QueueMessage::Progress { id, progress } => {
                queue.update_progress(id, progress);
            }
            QueueMessage::ProcessStarted { id, handle } => {
                queue.attach_process(id, handle);
            }
            QueueMessage::TaskFinished { id, outcome } => {
                queue.finish(id, outcome, &launcher);
            }
            QueueMessage::Shutdown => {
                queue.cancel_all();
                break;
            }
        }
    }
    log::info!("Download queue controller stopped");
}
