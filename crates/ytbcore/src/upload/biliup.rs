//! Bilibili uploads through the biliup CLI
//!
//! biliup reads `cookies.json` from its working directory, so every upload
//! runs with the biliup folder as cwd. Success is detected from the output
//! text; the exit code only decides when no marker was seen.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::journal::{LogCategory, SharedJournal};
use crate::core::process::{command, stream_output, ProcessHandle, ProcessTerminator};
use crate::download::thumbnail::find_cover_near;

const TOOL: &str = "biliup";

fn biliup_exe_name() -> &'static str {
    if cfg!(windows) {
        "biliup.exe"
    } else {
        "biliup"
    }
}

/// A biliup folder holding both the binary and its login cookies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiliupInstall {
    pub dir: PathBuf,
    pub exe: PathBuf,
    pub cookies: PathBuf,
}

impl BiliupInstall {
    /// `Some` when `dir` contains the binary and `cookies.json`.
    pub fn at(dir: &Path) -> Option<Self> {
        let exe = dir.join(biliup_exe_name());
        let cookies = dir.join("cookies.json");
        if exe.is_file() && cookies.is_file() {
            Some(Self {
                dir: dir.to_path_buf(),
                exe,
                cookies,
            })
        } else {
            None
        }
    }

    /// Candidate folders in lookup order.
    pub fn candidates(explicit: Option<&Path>, exe_dir: &Path) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = explicit {
            dirs.push(dir.to_path_buf());
        }
        dirs.push(exe_dir.to_path_buf());
        dirs.push(exe_dir.join("biliup"));
        dirs.push(exe_dir.join("..").join("biliup"));
        dirs.push(exe_dir.join("..").join("..").join("biliup"));
        dirs
    }

    pub fn discover(explicit: Option<&Path>, exe_dir: &Path) -> Option<Self> {
        Self::candidates(explicit, exe_dir).iter().find_map(|dir| Self::at(dir))
    }
}

/// What the user asked to upload; empty fields get defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    pub video: PathBuf,
    pub title: Option<String>,
    pub cover: Option<PathBuf>,
    pub tags: Option<String>,
}

impl UploadRequest {
    pub fn new(video: impl Into<PathBuf>) -> Self {
        Self {
            video: video.into(),
            ..Self::default()
        }
    }

    /// Title falls back to the file stem.
    pub fn title(&self) -> String {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.video
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
    }

    /// An explicit cover that exists, else an image next to the video.
    pub fn cover(&self) -> Option<PathBuf> {
        match &self.cover {
            Some(cover) if cover.is_file() => Some(cover.clone()),
            Some(cover) => {
                log::warn!("Cover {} does not exist, ignoring it", cover.display());
                None
            }
            None => find_cover_near(&self.video),
        }
    }

    pub fn tags(&self) -> &str {
        self.tags
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(config::upload::DEFAULT_TAGS)
    }
}

/// `upload --title T --tag ... --hires 1 [--cover C] <video>`
pub fn upload_args(title: &str, tags: &str, cover: Option<&Path>, video: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "upload".into(),
        "--title".into(),
        title.into(),
        "--tag".into(),
        tags.into(),
        "--tid".into(),
        config::upload::TID.into(),
        "--copyright".into(),
        config::upload::COPYRIGHT.into(),
        "--source".into(),
        config::upload::SOURCE.into(),
        "--hires".into(),
        "1".into(),
    ];
    if let Some(cover) = cover {
        args.push("--cover".into());
        args.push(cover.into());
    }
    args.push(video.into());
    args
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
    Success,
    Failure,
}

pub fn classify_line(line: &str) -> Option<LineVerdict> {
    let line = line.trim();
    if config::upload::SUCCESS_MARKERS.iter().any(|m| line.contains(m)) {
        return Some(LineVerdict::Success);
    }
    let lower = line.to_lowercase();
    if line.contains("Error:") || lower.contains("error") || lower.contains("failed") {
        return Some(LineVerdict::Failure);
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Succeeded,
    Failed { reason: String },
    Cancelled,
}

struct RunningUpload {
    token: CancellationToken,
    handles: Vec<ProcessHandle>,
}

/// Runs one upload at a time and can cancel it from another task.
pub struct Uploader {
    install: BiliupInstall,
    terminator: Arc<dyn ProcessTerminator>,
    journal: SharedJournal,
    mirror_terminal: bool,
    running: Mutex<Option<RunningUpload>>,
}

impl Uploader {
    pub fn new(install: BiliupInstall, terminator: Arc<dyn ProcessTerminator>, journal: SharedJournal) -> Self {
        Self {
            install,
            terminator,
            journal,
            mirror_terminal: false,
            running: Mutex::new(None),
        }
    }

    /// Also show biliup's own output in a console window (Windows only).
    pub fn with_mirror_terminal(mut self, enabled: bool) -> Self {
        self.mirror_terminal = enabled;
        self
    }

    pub fn install(&self) -> &BiliupInstall {
        &self.install
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    fn log(&self, message: impl Into<String>) {
        self.journal.info(LogCategory::Upload, message);
    }

    /// Kills the upload and its mirror window; `false` when nothing runs.
    pub fn cancel(&self) -> bool {
        let guard = self.running.lock();
        let Some(running) = guard.as_ref() else {
            self.log("ℹ️ No upload in progress");
            return false;
        };
        self.log("⏹️ Cancelling upload...");
        running.token.cancel();
        for handle in &running.handles {
            self.terminator.terminate(handle);
        }
        true
    }

    fn register(&self, handle: ProcessHandle) {
        if let Some(running) = self.running.lock().as_mut() {
            running.handles.push(handle);
        }
    }

    pub async fn upload(&self, request: &UploadRequest) -> AppResult<UploadOutcome> {
        if !request.video.is_file() {
            return Err(AppError::Validation(format!(
                "video file does not exist: {}",
                request.video.display()
            )));
        }
        if !self.install.cookies.is_file() {
            return Err(AppError::Config(format!(
                "biliup cookies not found: {}",
                self.install.cookies.display()
            )));
        }

        let token = CancellationToken::new();
        {
            let mut running = self.running.lock();
            if running.is_some() {
                return Err(AppError::Validation("an upload is already running".to_string()));
            }
            *running = Some(RunningUpload {
                token: token.clone(),
                handles: Vec::new(),
            });
        }

        let result = self.run_upload(request, &token).await;
        *self.running.lock() = None;

        match &result {
            Ok(UploadOutcome::Succeeded) => self.log("✅ Upload finished, check the Bilibili creator center"),
            Ok(UploadOutcome::Cancelled) => self.log("✅ Upload cancelled"),
            Ok(UploadOutcome::Failed { reason }) => self
                .journal
                .error(LogCategory::Upload, format!("❌ Upload failed: {}", reason)),
            Err(e) => self
                .journal
                .error(LogCategory::Upload, format!("❌ Upload error: {}", e)),
        }
        result
    }

    async fn run_upload(&self, request: &UploadRequest, token: &CancellationToken) -> AppResult<UploadOutcome> {
        let title = request.title();
        let cover = request.cover();
        let args = upload_args(&title, request.tags(), cover.as_deref(), &request.video);

        self.log(format!("🚀 Uploading to Bilibili: {}", request.video.display()));
        self.log(format!("📝 Title: {}", title));
        self.log(format!("🔧 biliup: {}", self.install.exe.display()));
        match &cover {
            Some(c) => self.log(format!("🖼️ Cover: {}", c.display())),
            None => self.log("ℹ️ No cover, Bilibili will pick one"),
        }

        self.log("⏳ Waiting 1 s before starting to avoid rate limits...");
        tokio::select! {
            _ = tokio::time::sleep(config::upload::start_delay()) => {}
            _ = token.cancelled() => return Ok(UploadOutcome::Cancelled),
        }

        if self.mirror_terminal {
            self.spawn_mirror(&args);
        }

        let mut cmd = command(&self.install.exe);
        cmd.args(&args)
            .current_dir(&self.install.dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| AppError::spawn(TOOL, e))?;

        let kill_switch = token.child_token();
        self.register(ProcessHandle::new(child.id(), kill_switch.clone()));
        self.log("⏳ Waiting for the upload to finish...");

        let mut lines = stream_output(&mut child);
        let mut verdict: Option<(LineVerdict, String)> = None;
        let mut killed = false;
        loop {
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else { break };
                    log::debug!("[biliup] {}", line.text);
                    if verdict.is_none() {
                        if let Some(v) = classify_line(&line.text) {
                            match v {
                                LineVerdict::Success => self.log("✅ Submission accepted"),
                                LineVerdict::Failure => self.log(format!("❌ Upload error: {}", line.text.trim())),
                            }
                            verdict = Some((v, line.text.trim().to_string()));
                        }
                    }
                }
                _ = kill_switch.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        log::debug!("biliup already exited: {}", e);
                    }
                    killed = true;
                    break;
                }
            }
        }
        let status = child.wait().await?;

        if killed || token.is_cancelled() {
            return Ok(UploadOutcome::Cancelled);
        }
        Ok(match verdict {
            Some((LineVerdict::Success, _)) => UploadOutcome::Succeeded,
            _ if status.success() => UploadOutcome::Succeeded,
            Some((LineVerdict::Failure, line)) => UploadOutcome::Failed { reason: line },
            None => UploadOutcome::Failed {
                reason: match status.code() {
                    Some(code) => format!("biliup exited with code {}", code),
                    None => "biliup was terminated".to_string(),
                },
            },
        })
    }

    #[cfg(windows)]
    fn spawn_mirror(&self, args: &[OsString]) {
        const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;

        let quoted: Vec<String> = std::iter::once(self.install.exe.as_os_str())
            .chain(args.iter().map(OsString::as_os_str))
            .map(|a| {
                let a = a.to_string_lossy();
                if a.contains(' ') {
                    format!("\"{}\"", a)
                } else {
                    a.into_owned()
                }
            })
            .collect();

        let mut cmd = tokio::process::Command::new("cmd.exe");
        cmd.arg("/c")
            .arg(quoted.join(" "))
            .current_dir(&self.install.dir)
            .creation_flags(CREATE_NEW_CONSOLE)
            .kill_on_drop(true);
        match cmd.spawn() {
            Ok(child) => {
                let pid = child.id();
                let kill_switch = CancellationToken::new();
                self.register(ProcessHandle::new(pid, kill_switch.clone()));
                self.log("🖥️ Mirroring biliup output in a console window");
                tokio::spawn(async move {
                    let mut child = child;
                    if let Err(e) = crate::core::process::wait_or_kill(&mut child, &kill_switch).await {
                        log::debug!("Mirror terminal wait failed: {}", e);
                    }
                });
            }
            Err(e) => log::warn!("Could not open mirror terminal: {}", e),
        }
    }

    #[cfg(not(windows))]
    fn spawn_mirror(&self, _args: &[OsString]) {
        self.log("ℹ️ Mirror terminal is only available on Windows");
    }
}
