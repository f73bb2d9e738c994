//! Execution worker for one download task
//!
//! Phases: title → cover → media download → PCM remux → final rename.
//! Cancellation is checked after the title, after the cover, before the
//! remux and after it; running tools are killed as soon as the task token
//! fires.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::journal::{LogCategory, SharedJournal};
use crate::core::process::{stream_output, ProcessHandle};
use crate::core::utils::derive_display_key;
use crate::download::controller::{TaskReporter, TaskRunner};
use crate::download::progress::parse_progress;
use crate::download::queue::{CachedTitle, DispatchedTask, EntryStatus, FailureKind, TaskOutcome};
use crate::download::thumbnail::{clear_leftover_sources, find_source, install_cover};
use crate::download::ytdlp::YtDlp;
use crate::download::ytdlp_errors::{analyze_ytdlp_error, get_error_message, get_fix_recommendations, invalidates_cookies};
use crate::media::ffmpeg::Ffmpeg;

/// Lines kept from a failed yt-dlp run for classification.
const ERROR_TAIL: usize = 40;

/// Maps an error to the failure shown on the entry.
pub fn failure_kind(err: &AppError) -> FailureKind {
    match err {
        AppError::ToolMissing { .. } | AppError::ToolFailed { .. } | AppError::Timeout { .. } => FailureKind::Tool,
        AppError::MissingOutput(_) => FailureKind::MissingOutput,
        AppError::Io(_) | AppError::Rename { .. } => FailureKind::Filesystem,
        _ => FailureKind::Internal,
    }
}

/// Runs folder scans and renames on the blocking pool.
async fn blocking_fs<T, F>(job: F) -> AppResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| AppError::Config(format!("filesystem task failed: {}", e)))
}

/// The save directory can change while the queue runs.
pub type SharedSaveDir = Arc<RwLock<PathBuf>>;

/// yt-dlp + ffmpeg task runner used by the queue controller.
pub struct DownloadPipeline {
    ytdlp: Arc<YtDlp>,
    ffmpeg: Arc<Ffmpeg>,
    save_dir: SharedSaveDir,
    journal: SharedJournal,
}

impl DownloadPipeline {
    pub fn new(ytdlp: Arc<YtDlp>, ffmpeg: Arc<Ffmpeg>, save_dir: SharedSaveDir, journal: SharedJournal) -> Self {
        Self {
            ytdlp,
            ffmpeg,
            save_dir,
            journal,
        }
    }

    fn log(&self, message: impl Into<String>) {
        self.journal.info(LogCategory::Download, message);
    }

    fn cancelled(&self, task: &DispatchedTask, phase: &str, key: &str) -> Option<TaskOutcome> {
        if task.token.is_cancelled() {
            self.log(format!("⏹️ Cancelled {}: {}", phase, key));
            Some(TaskOutcome::Cancelled)
        } else {
            None
        }
    }

    /// Phase 1: cached title, else a lookup; the derived key when the lookup fails.
    async fn resolve_title(&self, task: &DispatchedTask) -> Option<CachedTitle> {
        if let Some(title) = &task.cached_title {
            return Some(title.clone());
        }
        match self.ytdlp.get_title(&task.request.locator, &task.token).await {
            Ok(Some(raw)) => Some(CachedTitle::from_raw(raw)),
            Ok(None) => None,
            Err(e) => {
                self.journal.warn(
                    LogCategory::Download,
                    format!("⚠️ Title lookup failed, using '{}': {}", task.display_key, e),
                );
                Some(CachedTitle::from_raw(derive_display_key(&task.request.locator)))
            }
        }
    }

    /// Phase 3: cover.jpg; failures are logged and ignored.
    async fn fetch_cover(&self, task: &DispatchedTask, folder: &Path, title: &CachedTitle) {
        self.log("🖼️ Fetching cover...");
        match self.ytdlp.write_thumbnail(&task.request.locator, folder, &task.token).await {
            Ok(true) => {
                let (dir, raw) = (folder.to_path_buf(), title.raw.clone());
                match blocking_fs(move || install_cover(&dir, &raw)).await.and_then(|r| r) {
                    Ok(cover) => self.log(format!("🖼️ Saved cover: {}", cover.display())),
                    Err(e) => self.journal.warn(LogCategory::Download, format!("⚠️ No cover: {}", e)),
                }
            }
            Ok(false) => {}
            Err(e) => self
                .journal
                .warn(LogCategory::Download, format!("⚠️ Cover download failed: {}", e)),
        }
    }

    /// Phase 4: the media download, streamed into the journal.
    ///
    /// Returns `Ok(false)` when the task was cancelled while yt-dlp ran.
    async fn download_media(&self, task: &DispatchedTask, folder: &Path, reporter: &TaskReporter) -> AppResult<bool> {
        let dir = folder.to_path_buf();
        let removed = blocking_fs(move || clear_leftover_sources(&dir)).await?;
        if removed > 0 {
            log::debug!("Removed {} leftover source file(s) in {}", removed, folder.display());
        }

        let args = self
            .ytdlp
            .download_args(&task.request.locator, &task.request.format_id, folder);
        let mut child = self.ytdlp.spawn_download(&args)?;

        let kill_switch = task.token.child_token();
        reporter.process_started(ProcessHandle::new(child.id(), kill_switch.clone()));

        let mut lines = stream_output(&mut child);
        let mut error_tail: Vec<String> = Vec::new();
        let mut last_percent = None;
        let mut killed = false;

        loop {
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else { break };
                    if let Some(progress) = parse_progress(&line.text) {
                        if last_percent != Some(progress.percent) {
                            last_percent = Some(progress.percent);
                            reporter.progress(progress);
                        }
                    }
                    if line.text.contains("ERROR") || line.text.contains("WARNING") {
                        error_tail.push(line.text.clone());
                        if error_tail.len() > ERROR_TAIL {
                            error_tail.remove(0);
                        }
                    }
                    if !line.text.trim().is_empty() {
                        self.log(line.text);
                    }
                }
                _ = kill_switch.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        log::debug!("yt-dlp already exited: {}", e);
                    }
                    killed = true;
                    break;
                }
            }
        }

        let status = child.wait().await?;
        if killed || task.token.is_cancelled() {
            return Ok(false);
        }
        if !status.success() {
            let stderr = error_tail.join("\n");
            let kind = analyze_ytdlp_error(&stderr);
            self.journal.error(LogCategory::Download, get_error_message(kind));
            self.journal.info(LogCategory::Download, get_fix_recommendations(kind));
            if invalidates_cookies(kind) {
                self.ytdlp.cookies().mark(false);
            }
            return Err(AppError::ToolFailed {
                tool: "yt-dlp".to_string(),
                code: status.code(),
                output: stderr,
            });
        }
        Ok(true)
    }

    async fn execute(&self, task: &DispatchedTask, reporter: &TaskReporter) -> AppResult<TaskOutcome> {
        // 1. title
        let Some(title) = self.resolve_title(task).await else {
            self.log(format!("⏹️ Cancelled during preparation: {}", task.display_key));
            return Ok(TaskOutcome::Cancelled);
        };
        if let Some(outcome) = self.cancelled(task, "during preparation", &task.display_key) {
            return Ok(outcome);
        }

        // 2. rename entry
        reporter.title_resolved(&task.request.locator, title.clone());
        reporter.status(EntryStatus::Downloading);
        self.log(format!(
            "⬇️ Downloading with format {}: {}",
            task.request.format_id, title.raw
        ));
        self.log(format!("URL: {}", task.request.locator));

        // 3. folder + cover
        let save_dir = self.save_dir.read().clone();
        let folder = save_dir.join(&title.sanitized);
        tokio::fs::create_dir_all(&folder).await?;
        self.fetch_cover(task, &folder, &title).await;
        if let Some(outcome) = self.cancelled(task, "while fetching the cover", &title.sanitized) {
            return Ok(outcome);
        }

        // 4. media
        if !self.download_media(task, &folder, reporter).await? {
            self.log(format!("⏹️ Download cancelled: {}", title.sanitized));
            return Ok(TaskOutcome::Cancelled);
        }
        self.log("✅ Download finished");

        // 5. locate output
        let dir = folder.clone();
        let source = blocking_fs(move || find_source(&dir)).await?.ok_or_else(|| {
            AppError::MissingOutput(folder.join(format!("{}.*", config::download::SOURCE_STEM)))
        })?;

        // 6. remux
        if let Some(outcome) = self.cancelled(task, "before remux", &title.sanitized) {
            return Ok(outcome);
        }
        reporter.status(EntryStatus::Remuxing);
        self.log("🔄 Converting audio to PCM (48 kHz / 32-bit / stereo)");
        let remuxed = folder.join(format!("{}.{}", title.sanitized, config::download::REMUX_SUFFIX));
        if !self.ffmpeg.remux_to_pcm(&source, &remuxed, &task.token).await? {
            self.log(format!("⏹️ Remux cancelled: {}", title.sanitized));
            return Ok(TaskOutcome::Cancelled);
        }
        if let Some(outcome) = self.cancelled(task, "after remux", &title.sanitized) {
            return Ok(outcome);
        }

        // 7. final name
        let final_path = folder.join(format!("{}.mkv", title.sanitized));
        tokio::fs::rename(&remuxed, &final_path)
            .await
            .map_err(|source| AppError::Rename {
                from: remuxed.clone(),
                to: final_path.clone(),
                source,
            })?;
        self.log(format!("✅ Saved: {}", final_path.display()));
        reporter.status(EntryStatus::Succeeded);
        Ok(TaskOutcome::Succeeded)
    }
}

#[async_trait]
impl TaskRunner for DownloadPipeline {
    async fn run(&self, task: DispatchedTask, reporter: TaskReporter) -> TaskOutcome {
        match self.execute(&task, &reporter).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let kind = failure_kind(&e);
                self.journal
                    .error(LogCategory::Download, format!("❌ {} failed: {}", task.display_key, e));
                reporter.status(EntryStatus::Failed(kind));
                TaskOutcome::Failed(kind)
            }
        }
    }
}
