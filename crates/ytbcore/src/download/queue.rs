//! Download queue state machine
//!
//! [`QueueController`] owns every piece of queue state: the visible entries,
//! the FIFO of not-yet-started requests, the single active task and the title
//! cache. It is synchronous and never spawns anything itself; starting workers
//! is delegated to a [`TaskLauncher`]. The actor in
//! [`crate::download::controller`] wraps it and feeds it messages.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::journal::{LogCategory, SharedJournal};
use crate::core::process::{ProcessHandle, ProcessTerminator};
use crate::core::utils::{derive_display_key, sanitize_title};
use crate::download::progress::DownloadProgress;

/// Stable identity of a queue entry, independent of its display key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the user asked for: a media locator and a yt-dlp format selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub locator: String,
    pub format_id: String,
}

impl DownloadRequest {
    pub fn new(locator: impl Into<String>, format_id: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            format_id: format_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// yt-dlp / ffmpeg missing, failed or timed out
    Tool,
    /// the tool succeeded but no output file was found
    MissingOutput,
    /// folder creation or final rename failed
    Filesystem,
    /// the worker itself broke (panic, unexpected error)
    Internal,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Tool => "tool error",
            FailureKind::MissingOutput => "output missing",
            FailureKind::Filesystem => "filesystem error",
            FailureKind::Internal => "internal error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Pending,
    Downloading,
    Remuxing,
    Succeeded,
    Failed(FailureKind),
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Succeeded | EntryStatus::Failed(_))
    }

    /// Status text shown next to the display key.
    pub fn label(&self) -> String {
        match self {
            EntryStatus::Pending => "⏳ pending".to_string(),
            EntryStatus::Downloading => "⬇️ downloading".to_string(),
            EntryStatus::Remuxing => "🎞️ remuxing".to_string(),
            EntryStatus::Succeeded => "✅ done".to_string(),
            EntryStatus::Failed(kind) => format!("❌ failed ({})", kind.label()),
        }
    }
}

/// One visible row of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: EntryId,
    pub display_key: String,
    pub status: EntryStatus,
    /// Latest download progress reported by the worker
    pub progress: Option<DownloadProgress>,
    pub request: DownloadRequest,
}

impl QueueEntry {
    /// `"<key>: <status>"`, plus the progress while downloading.
    pub fn row(&self) -> String {
        match (self.status, self.progress) {
            (EntryStatus::Downloading, Some(progress)) => {
                format!("{}: {} {}", self.display_key, self.status.label(), progress.label())
            }
            _ => format!("{}: {}", self.display_key, self.status.label()),
        }
    }
}

/// A resolved title, raw and filesystem-safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTitle {
    pub raw: String,
    pub sanitized: String,
}

impl CachedTitle {
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into().trim().to_string();
        let sanitized = sanitize_title(&raw);
        Self { raw, sanitized }
    }
}

/// How callers point at an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRef {
    Id(EntryId),
    Key(String),
}

impl From<EntryId> for EntryRef {
    fn from(id: EntryId) -> Self {
        EntryRef::Id(id)
    }
}

impl From<&str> for EntryRef {
    fn from(key: &str) -> Self {
        EntryRef::Key(key.to_string())
    }
}

impl From<String> for EntryRef {
    fn from(key: String) -> Self {
        EntryRef::Key(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The running task was signalled; `terminated` is false when no process
    /// handle had been registered yet.
    CancelledActive { id: EntryId, terminated: bool },
    /// A queued request was dropped before it started.
    RemovedPending { id: EntryId },
    /// A finished entry was removed from the list.
    RemovedFinished { id: EntryId },
    NotFound,
    /// The display key matched this many entries; nothing was changed.
    Ambiguous(usize),
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(FailureKind),
    Cancelled,
}

/// Everything a worker needs to run one task.
#[derive(Debug, Clone)]
pub struct DispatchedTask {
    pub id: EntryId,
    pub request: DownloadRequest,
    /// Key the entry had when the task started
    pub display_key: String,
    /// Title already known from the cache, if any
    pub cached_title: Option<CachedTitle>,
    /// Fired when the user cancels this task
    pub token: CancellationToken,
}

/// Starts background work on behalf of the controller.
pub trait TaskLauncher {
    fn launch_download(&self, task: DispatchedTask);

    fn launch_title_lookup(&self, id: EntryId, locator: String);
}

/// Immutable copy of the queue for the front-end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    /// Entry the running task belongs to; `None` once it was cancelled
    pub active: Option<EntryId>,
    /// Requests waiting to start
    pub queued: usize,
    /// A worker still holds the execution slot, cancelled or not
    pub busy: bool,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        !self.busy && self.queued == 0
    }

    pub fn entry(&self, id: EntryId) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

#[derive(Debug)]
struct ActiveTask {
    id: EntryId,
    token: CancellationToken,
    process: Option<ProcessHandle>,
    /// Set once the user cancelled; the slot stays busy until the worker exits
    cancelled: bool,
}

/// Single-flight FIFO download queue.
pub struct QueueController {
    entries: Vec<QueueEntry>,
    pending: VecDeque<EntryId>,
    active: Option<ActiveTask>,
    titles: HashMap<String, CachedTitle>,
    next_id: u64,
    terminator: Arc<dyn ProcessTerminator>,
    journal: SharedJournal,
}

impl QueueController {
    pub fn new(terminator: Arc<dyn ProcessTerminator>, journal: SharedJournal) -> Self {
        Self {
            entries: Vec::new(),
            pending: VecDeque::new(),
            active: None,
            titles: HashMap::new(),
            next_id: 1,
            terminator,
            journal,
        }
    }

    // ==================== Queries ====================

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entry whose task is running and not cancelled.
    pub fn active_id(&self) -> Option<EntryId> {
        self.active.as_ref().filter(|a| !a.cancelled).map(|a| a.id)
    }

    /// True while a worker occupies the single execution slot.
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn cached_title(&self, locator: &str) -> Option<&CachedTitle> {
        self.titles.get(locator)
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending.is_empty()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            entries: self.entries.clone(),
            active: self.active_id(),
            queued: self.pending.len(),
            busy: self.is_busy(),
        }
    }

    fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Resolves a reference to exactly one live entry.
    fn resolve(&self, target: &EntryRef) -> Result<EntryId, CancelOutcome> {
        match target {
            EntryRef::Id(id) => self.entry(*id).map(|e| e.id).ok_or(CancelOutcome::NotFound),
            EntryRef::Key(key) => {
                let matches: Vec<EntryId> = self
                    .entries
                    .iter()
                    .filter(|e| &e.display_key == key)
                    .map(|e| e.id)
                    .collect();
                match matches.as_slice() {
                    [] => Err(CancelOutcome::NotFound),
                    [id] => Ok(*id),
                    many => Err(CancelOutcome::Ambiguous(many.len())),
                }
            }
        }
    }

    // ==================== Enqueue ====================

    /// Adds a request at the tail and starts it right away if the queue is idle.
    ///
    /// The visible entry appears immediately under its provisional key (or the
    /// cached title). A background title lookup is launched when the title is
    /// not cached yet.
    pub fn enqueue(&mut self, request: DownloadRequest, launcher: &dyn TaskLauncher) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;

        let cached = self.titles.get(&request.locator).cloned();
        let display_key = cached
            .as_ref()
            .map(|t| t.sanitized.clone())
            .unwrap_or_else(|| derive_display_key(&request.locator));

        self.journal.info(
            LogCategory::Download,
            format!("➕ Queued {} {} (format {})", id, display_key, request.format_id),
        );

        let locator = request.locator.clone();
        self.entries.push(QueueEntry {
            id,
            display_key,
            status: EntryStatus::Pending,
            progress: None,
            request,
        });
        self.pending.push_back(id);

        if cached.is_none() {
            launcher.launch_title_lookup(id, locator);
        }

        if self.active.is_none() {
            self.dispatch_next(launcher);
        }
        id
    }

    // ==================== Title Resolution ====================

    /// Records a resolved title and renames the entry, keeping its status.
    ///
    /// The cache is updated even when the entry is already gone. Returns
    /// whether an entry was renamed.
    pub fn apply_title(&mut self, id: EntryId, locator: &str, title: CachedTitle) -> bool {
        self.titles.insert(locator.to_string(), title.clone());
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                if entry.display_key != title.sanitized {
                    log::debug!("Renaming {} '{}' -> '{}'", id, entry.display_key, title.sanitized);
                    entry.display_key = title.sanitized;
                }
                true
            }
            None => {
                log::debug!("Title for removed entry {} cached only", id);
                false
            }
        }
    }

    // ==================== Dispatch ====================

    /// Starts the oldest queued request if nothing is running.
    ///
    /// Returns the started entry, or `None` when busy or when the queue is empty.
    pub fn dispatch_next(&mut self, launcher: &dyn TaskLauncher) -> Option<EntryId> {
        if self.active.is_some() {
            return None;
        }

        let id = loop {
            let id = self.pending.pop_front()?;
            if self.entry(id).is_some() {
                break id;
            }
            log::debug!("Skipping vanished queued entry {}", id);
        };

        let entry = self.entry(id)?.clone();
        let cached_title = self.titles.get(&entry.request.locator).cloned();
        let display_key = cached_title
            .as_ref()
            .map(|t| t.sanitized.clone())
            .unwrap_or_else(|| derive_display_key(&entry.request.locator));

        let token = CancellationToken::new();
        self.active = Some(ActiveTask {
            id,
            token: token.clone(),
            process: None,
            cancelled: false,
        });

        log::info!("▶️ Dispatching {} ({} queued behind)", id, self.pending.len());
        launcher.launch_download(DispatchedTask {
            id,
            request: entry.request,
            display_key,
            cached_title,
            token,
        });
        Some(id)
    }

    /// Registers the process of the running task so it can be killed.
    ///
    /// Reports for a task that is no longer active are ignored.
    pub fn attach_process(&mut self, id: EntryId, handle: ProcessHandle) -> bool {
        match self.active.as_mut() {
            Some(active) if active.id == id && !active.cancelled => {
                active.process = Some(handle);
                true
            }
            Some(active) if active.id == id => {
                // cancelled before the process was registered
                self.terminator.terminate(&handle);
                false
            }
            _ => {
                log::debug!("Ignoring process report for inactive entry {}", id);
                false
            }
        }
    }

    // ==================== Cancel ====================

    /// Cancels the entry `target` points at.
    ///
    /// - active: signal the worker, kill its process tree, remove the row
    /// - queued: drop it from the queue and remove the row
    /// - finished: just remove the row
    ///
    /// The title cached for a removed entry's locator is forgotten unless
    /// another live entry shares the locator.
    pub fn cancel(&mut self, target: &EntryRef) -> CancelOutcome {
        let id = match self.resolve(target) {
            Ok(id) => id,
            Err(outcome) => {
                if let CancelOutcome::Ambiguous(n) = outcome {
                    self.journal.warn(
                        LogCategory::Download,
                        format!("⚠️ {} entries match {:?}, cancel by id instead", n, target),
                    );
                }
                return outcome;
            }
        };

        let outcome = match self.active.as_mut() {
            Some(active) if active.id == id && !active.cancelled => {
                active.cancelled = true;
                active.token.cancel();
                let terminated = match active.process.take() {
                    Some(handle) => {
                        let killed = self.terminator.terminate(&handle);
                        log::info!(
                            "🛑 Cancelled {} via {} terminator ({} killed)",
                            id,
                            self.terminator.name(),
                            killed
                        );
                        true
                    }
                    None => false,
                };
                CancelOutcome::CancelledActive { id, terminated }
            }
            _ => {
                if let Some(pos) = self.pending.iter().position(|p| *p == id) {
                    self.pending.remove(pos);
                    CancelOutcome::RemovedPending { id }
                } else {
                    CancelOutcome::RemovedFinished { id }
                }
            }
        };

        if let Some(pos) = self.position(id) {
            let entry = self.entries.remove(pos);
            self.forget_title(&entry.request.locator);
            self.journal.info(
                LogCategory::Download,
                format!("🗑️ Removed {} {} from the queue", id, entry.display_key),
            );
        }
        outcome
    }

    fn forget_title(&mut self, locator: &str) {
        if !self.entries.iter().any(|e| e.request.locator == locator) {
            self.titles.remove(locator);
        }
    }

    // ==================== Worker Reports ====================

    /// Replaces the status of an entry in place.
    ///
    /// Unknown entries are ignored, and a terminal status is never left.
    pub fn update_status(&mut self, id: EntryId, status: EntryStatus) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        if entry.status.is_terminal() && entry.status != status {
            log::warn!("Ignoring {:?} for finished entry {} ({:?})", status, id, entry.status);
            return false;
        }
        entry.status = status;
        if status != EntryStatus::Downloading {
            entry.progress = None;
        }
        true
    }

    pub fn update_progress(&mut self, id: EntryId, progress: DownloadProgress) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) if entry.status == EntryStatus::Downloading => {
                entry.progress = Some(progress);
                true
            }
            _ => false,
        }
    }

    /// Frees the execution slot after a worker exits and starts the next task.
    ///
    /// A failure recorded here never blocks the next dispatch.
    pub fn finish(&mut self, id: EntryId, outcome: TaskOutcome, launcher: &dyn TaskLauncher) -> Option<EntryId> {
        match self.active.as_ref() {
            Some(active) if active.id == id => {
                self.active = None;
            }
            _ => {
                log::warn!("Finish report for {} which is not the active task", id);
            }
        }

        match outcome {
            TaskOutcome::Succeeded => {
                self.update_status(id, EntryStatus::Succeeded);
            }
            TaskOutcome::Failed(kind) => {
                self.update_status(id, EntryStatus::Failed(kind));
            }
            TaskOutcome::Cancelled => {
                log::info!("Task {} stopped after cancellation", id);
            }
        }

        self.dispatch_next(launcher)
    }

    // ==================== Maintenance ====================

    /// Re-queues a finished entry's request as a new entry and drops the old row.
    pub fn retry(&mut self, id: EntryId, launcher: &dyn TaskLauncher) -> Option<EntryId> {
        let pos = self.position(id)?;
        if !self.entries[pos].status.is_terminal() {
            self.journal.warn(
                LogCategory::Download,
                format!("⚠️ {} is still in progress, not retrying", id),
            );
            return None;
        }
        let entry = self.entries.remove(pos);
        self.journal.info(
            LogCategory::Download,
            format!("🔁 Retrying {} {}", id, entry.display_key),
        );
        Some(self.enqueue(entry.request, launcher))
    }

    /// Removes every entry in a terminal status; returns how many.
    pub fn clear_finished(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.status.is_terminal());
        before - self.entries.len()
    }

    /// Cancels everything; used on shutdown.
    pub fn cancel_all(&mut self) {
        self.pending.clear();
        if let Some(id) = self.active_id() {
            self.cancel(&EntryRef::Id(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::journal::Journal;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Records launches instead of spawning anything.
    #[derive(Default)]
    struct RecordingLauncher {
        downloads: Mutex<Vec<DispatchedTask>>,
        lookups: Mutex<Vec<(EntryId, String)>>,
    }

    impl RecordingLauncher {
        fn started(&self) -> Vec<EntryId> {
            self.downloads.lock().iter().map(|t| t.id).collect()
        }

        fn last_token(&self) -> CancellationToken {
            self.downloads.lock().last().unwrap().token.clone()
        }
    }

    impl TaskLauncher for RecordingLauncher {
        fn launch_download(&self, task: DispatchedTask) {
            self.downloads.lock().push(task);
        }

        fn launch_title_lookup(&self, id: EntryId, locator: String) {
            self.lookups.lock().push((id, locator));
        }
    }

    /// Counts termination attempts.
    #[derive(Default)]
    struct CountingTerminator {
        calls: Mutex<Vec<Option<u32>>>,
    }

    impl ProcessTerminator for CountingTerminator {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn terminate(&self, handle: &ProcessHandle) -> usize {
            handle.kill_switch().cancel();
            self.calls.lock().push(handle.pid());
            1
        }
    }

    fn controller() -> (QueueController, Arc<CountingTerminator>, RecordingLauncher) {
        let terminator = Arc::new(CountingTerminator::default());
        let queue = QueueController::new(terminator.clone(), Arc::new(Journal::new()));
        (queue, terminator, RecordingLauncher::default())
    }

    fn req(locator: &str) -> DownloadRequest {
        DownloadRequest::new(locator, "137+140")
    }

    // ==================== Enqueue / Dispatch Tests ====================

    #[test]
    fn test_first_enqueue_dispatches_immediately() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/aaa"), &launcher);

        assert_eq!(launcher.started(), vec![a]);
        assert_eq!(queue.active_id(), Some(a));
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.entry(a).unwrap().display_key, "aaa");
        assert_eq!(queue.entry(a).unwrap().status, EntryStatus::Pending);
        assert_eq!(launcher.lookups.lock().len(), 1);
    }

    #[test]
    fn test_single_flight_fifo_order() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        let b = queue.enqueue(req("https://youtu.be/b"), &launcher);
        let c = queue.enqueue(req("https://youtu.be/c"), &launcher);

        assert_eq!(launcher.started(), vec![a]);
        assert_eq!(queue.pending_len(), 2);

        assert_eq!(queue.finish(a, TaskOutcome::Succeeded, &launcher), Some(b));
        assert_eq!(queue.finish(b, TaskOutcome::Succeeded, &launcher), Some(c));
        assert_eq!(queue.finish(c, TaskOutcome::Succeeded, &launcher), None);

        assert_eq!(launcher.started(), vec![a, b, c]);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_dispatch_while_busy_is_noop() {
        let (mut queue, _, launcher) = controller();
        let _a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        let _b = queue.enqueue(req("https://youtu.be/b"), &launcher);

        assert_eq!(queue.dispatch_next(&launcher), None);
        assert_eq!(queue.dispatch_next(&launcher), None);
        assert_eq!(launcher.started().len(), 1);
    }

    #[test]
    fn test_dispatch_on_empty_queue_is_idle() {
        let (mut queue, _, launcher) = controller();
        assert_eq!(queue.dispatch_next(&launcher), None);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_a_downloads_before_b_leaves_pending() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        let b = queue.enqueue(req("https://youtu.be/b"), &launcher);

        queue.update_status(a, EntryStatus::Downloading);
        assert_eq!(queue.entry(b).unwrap().status, EntryStatus::Pending);

        queue.update_status(a, EntryStatus::Succeeded);
        queue.finish(a, TaskOutcome::Succeeded, &launcher);
        assert_eq!(queue.active_id(), Some(b));
    }

    #[test]
    fn test_failure_does_not_block_next() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        let b = queue.enqueue(req("https://youtu.be/b"), &launcher);

        assert_eq!(queue.finish(a, TaskOutcome::Failed(FailureKind::Tool), &launcher), Some(b));
        assert_eq!(queue.entry(a).unwrap().status, EntryStatus::Failed(FailureKind::Tool));
    }

    // ==================== Title Tests ====================

    #[test]
    fn test_title_swap_preserves_status() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.update_status(a, EntryStatus::Downloading);

        let renamed = queue.apply_title(a, "https://youtu.be/a", CachedTitle::from_raw("Live: Set 1"));
        assert!(renamed);

        let entry = queue.entry(a).unwrap();
        assert_eq!(entry.display_key, "Live- Set 1");
        assert_eq!(entry.status, EntryStatus::Downloading);
    }

    #[test]
    fn test_title_for_removed_entry_only_caches() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.cancel(&EntryRef::Id(a));

        assert!(!queue.apply_title(a, "https://youtu.be/a", CachedTitle::from_raw("Late")));
        assert_eq!(queue.cached_title("https://youtu.be/a").unwrap().raw, "Late");
        assert!(queue.entries().is_empty());
    }

    #[test]
    fn test_cached_title_used_on_enqueue_and_dispatch() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.apply_title(a, "https://youtu.be/a", CachedTitle::from_raw("Known"));
        let b = queue.enqueue(req("https://youtu.be/a"), &launcher);

        assert_eq!(queue.entry(b).unwrap().display_key, "Known");
        // no second lookup for a cached locator
        assert_eq!(launcher.lookups.lock().len(), 1);

        queue.finish(a, TaskOutcome::Succeeded, &launcher);
        let task = launcher.downloads.lock().last().cloned().unwrap();
        assert_eq!(task.id, b);
        assert_eq!(task.display_key, "Known");
        assert_eq!(task.cached_title.unwrap().raw, "Known");
    }

    // ==================== Cancel Tests ====================

    #[test]
    fn test_cancel_pending_removes_from_queue() {
        let (mut queue, terminator, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        let b = queue.enqueue(req("https://youtu.be/b"), &launcher);
        let c = queue.enqueue(req("https://youtu.be/c"), &launcher);

        assert_eq!(queue.cancel(&"b".into()), CancelOutcome::RemovedPending { id: b });
        assert!(queue.entry(b).is_none());
        assert!(terminator.calls.lock().is_empty());

        assert_eq!(queue.finish(a, TaskOutcome::Succeeded, &launcher), Some(c));
    }

    #[test]
    fn test_cancel_active_before_process_registered() {
        let (mut queue, terminator, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        let token = launcher.last_token();

        let outcome = queue.cancel(&EntryRef::Key("a".into()));
        assert_eq!(outcome, CancelOutcome::CancelledActive { id: a, terminated: false });
        assert!(token.is_cancelled());
        assert!(queue.entries().is_empty());
        assert_eq!(queue.active_id(), None);
        assert!(terminator.calls.lock().is_empty());
    }

    #[test]
    fn test_cancel_active_kills_process_and_dispatches_next() {
        let (mut queue, terminator, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        let b = queue.enqueue(req("https://youtu.be/b"), &launcher);
        let kill = CancellationToken::new();
        assert!(queue.attach_process(a, ProcessHandle::new(Some(4242), kill.clone())));

        let outcome = queue.cancel(&EntryRef::Id(a));
        assert_eq!(outcome, CancelOutcome::CancelledActive { id: a, terminated: true });
        assert_eq!(*terminator.calls.lock(), vec![Some(4242)]);
        assert!(kill.is_cancelled());
        assert_eq!(queue.active_id(), None);
        assert!(queue.entry(a).is_none());

        // slot is released by the worker's exit report
        assert!(queue.is_busy());
        assert_eq!(queue.finish(a, TaskOutcome::Cancelled, &launcher), Some(b));
        assert_eq!(queue.active_id(), Some(b));
    }

    #[test]
    fn test_process_registered_after_cancel_is_killed() {
        let (mut queue, terminator, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.cancel(&EntryRef::Id(a));

        let kill = CancellationToken::new();
        assert!(!queue.attach_process(a, ProcessHandle::new(Some(7), kill.clone())));
        assert!(kill.is_cancelled());
        assert_eq!(terminator.calls.lock().len(), 1);
    }

    #[test]
    fn test_cancel_finished_entry_only_removes_row() {
        let (mut queue, terminator, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.finish(a, TaskOutcome::Failed(FailureKind::MissingOutput), &launcher);

        assert_eq!(queue.cancel(&EntryRef::Id(a)), CancelOutcome::RemovedFinished { id: a });
        assert!(queue.entries().is_empty());
        assert!(terminator.calls.lock().is_empty());
    }

    #[test]
    fn test_cancel_ambiguous_key_changes_nothing() {
        let (mut queue, _, launcher) = controller();
        queue.enqueue(req("https://youtu.be/same?x=1"), &launcher);
        queue.enqueue(req("https://youtu.be/same?x=2"), &launcher);

        assert_eq!(queue.cancel(&"same".into()), CancelOutcome::Ambiguous(2));
        assert_eq!(queue.entries().len(), 2);
        assert_eq!(queue.cancel(&"nope".into()), CancelOutcome::NotFound);
    }

    #[test]
    fn test_cancel_forgets_cached_title() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.apply_title(a, "https://youtu.be/a", CachedTitle::from_raw("T"));
        queue.cancel(&EntryRef::Id(a));
        assert!(queue.cached_title("https://youtu.be/a").is_none());
    }

    // ==================== Status Tests ====================

    #[test]
    fn test_update_status_unknown_is_noop() {
        let (mut queue, _, _) = controller();
        assert!(!queue.update_status(EntryId(99), EntryStatus::Downloading));
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.update_status(a, EntryStatus::Failed(FailureKind::Tool));
        assert!(!queue.update_status(a, EntryStatus::Downloading));
        assert_eq!(queue.entry(a).unwrap().status, EntryStatus::Failed(FailureKind::Tool));
    }

    #[test]
    fn test_progress_only_while_downloading() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        assert!(!queue.update_progress(a, DownloadProgress::new(10)));

        queue.update_status(a, EntryStatus::Downloading);
        assert!(queue.update_progress(a, DownloadProgress::new(45)));
        assert_eq!(queue.entry(a).unwrap().row(), "a: ⬇️ downloading 45%");
        assert!(queue.update_progress(a, DownloadProgress::new(50).with_eta(95)));
        assert_eq!(queue.entry(a).unwrap().row(), "a: ⬇️ downloading 50% (01:35 left)");

        queue.update_status(a, EntryStatus::Remuxing);
        assert_eq!(queue.entry(a).unwrap().progress, None);
    }

    // ==================== Maintenance Tests ====================

    #[test]
    fn test_retry_requeues_finished_request() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        assert_eq!(queue.retry(a, &launcher), None);

        queue.finish(a, TaskOutcome::Failed(FailureKind::Tool), &launcher);
        let again = queue.retry(a, &launcher).unwrap();

        assert_ne!(again, a);
        assert!(queue.entry(a).is_none());
        assert_eq!(queue.active_id(), Some(again));
        assert_eq!(queue.entry(again).unwrap().request, req("https://youtu.be/a"));
    }

    #[test]
    fn test_clear_finished() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        let b = queue.enqueue(req("https://youtu.be/b"), &launcher);
        queue.finish(a, TaskOutcome::Succeeded, &launcher);

        assert_eq!(queue.clear_finished(), 1);
        assert_eq!(queue.entries().len(), 1);
        assert_eq!(queue.entries()[0].id, b);
    }

    #[test]
    fn test_snapshot_reports_active_and_queued() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.enqueue(req("https://youtu.be/b"), &launcher);

        let snap = queue.snapshot();
        assert_eq!(snap.active, Some(a));
        assert_eq!(snap.queued, 1);
        assert_eq!(snap.entries.len(), 2);
        assert!(snap.busy);
        assert!(!snap.is_idle());
    }

    #[test]
    fn test_snapshot_stays_busy_until_cancelled_worker_exits() {
        let (mut queue, _, launcher) = controller();
        let a = queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.cancel(&EntryRef::Id(a));

        let snap = queue.snapshot();
        assert_eq!(snap.active, None);
        assert!(snap.busy);
        assert!(!snap.is_idle());

        queue.finish(a, TaskOutcome::Cancelled, &launcher);
        let snap = queue.snapshot();
        assert!(!snap.busy);
        assert!(snap.is_idle());
    }

    #[test]
    fn test_cancel_all_stops_everything() {
        let (mut queue, _, launcher) = controller();
        queue.enqueue(req("https://youtu.be/a"), &launcher);
        queue.enqueue(req("https://youtu.be/b"), &launcher);
        let token = launcher.last_token();

        queue.cancel_all();
        assert!(token.is_cancelled());
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.active_id(), None);
    }
}
