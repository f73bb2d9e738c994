//! yt-dlp invocations: title lookup, thumbnail, media download, formats, version

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::process::{command, run_cancellable, run_checked, run_with_timeout};
use crate::download::controller::TitleResolver;
use crate::download::cookies::CookieGate;

const TOOL: &str = "yt-dlp";

/// yt-dlp binary plus the shared cookies gate.
#[derive(Debug, Clone)]
pub struct YtDlp {
    bin: String,
    ffmpeg_location: Option<PathBuf>,
    cookies: Arc<CookieGate>,
}

impl YtDlp {
    pub fn new(bin: impl Into<String>, cookies: Arc<CookieGate>) -> Self {
        Self {
            bin: bin.into(),
            ffmpeg_location: None,
            cookies,
        }
    }

    /// Binary from `YTDL_BIN`; an absolute `FFMPEG_BIN` is forwarded as `--ffmpeg-location`.
    pub fn from_env(cookies: Arc<CookieGate>) -> Self {
        let ffmpeg = Path::new(config::FFMPEG_BIN.as_str());
        let mut ytdlp = Self::new(config::YTDL_BIN.as_str(), cookies);
        if ffmpeg.is_absolute() {
            ytdlp.ffmpeg_location = Some(ffmpeg.to_path_buf());
        }
        ytdlp
    }

    pub fn with_ffmpeg_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_location = Some(path.into());
        self
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    pub fn cookies(&self) -> &Arc<CookieGate> {
        &self.cookies
    }

    fn command(&self) -> Command {
        let mut cmd = command(&self.bin);
        cmd.env("PYTHONIOENCODING", "utf-8");
        cmd
    }

    fn common_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.cookies.args().into_iter().map(OsString::from).collect();
        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.into());
        }
        args
    }

    // ==================== Title ====================

    pub fn title_args(&self, url: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--get-title".into(), url.into()];
        args.extend(self.common_args());
        args
    }

    /// Fetches the video title; `Ok(None)` when `token` fired first.
    pub async fn get_title(&self, url: &str, token: &CancellationToken) -> AppResult<Option<String>> {
        let mut cmd = self.command();
        cmd.args(self.title_args(url));
        let Some(output) = run_cancellable(&mut cmd, token, TOOL).await? else {
            return Ok(None);
        };
        if !output.status.success() {
            return Err(AppError::tool_failed(TOOL, &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(title) => Ok(Some(title.to_string())),
            None => Err(AppError::Validation(format!("yt-dlp returned no title for {}", url))),
        }
    }

    // ==================== Thumbnail ====================

    pub fn thumbnail_args(&self, url: &str, folder: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--skip-download".into(),
            "--write-thumbnail".into(),
            "--convert-thumbnails".into(),
            "jpg".into(),
            "-o".into(),
            folder.join("%(title)s.%(ext)s").into(),
            url.into(),
        ];
        args.extend(self.common_args());
        args
    }

    /// Writes the thumbnail as JPG into `folder`; `Ok(false)` when cancelled.
    pub async fn write_thumbnail(&self, url: &str, folder: &Path, token: &CancellationToken) -> AppResult<bool> {
        let mut cmd = self.command();
        cmd.args(self.thumbnail_args(url, folder));
        match run_cancellable(&mut cmd, token, TOOL).await? {
            Some(output) if output.status.success() => Ok(true),
            Some(output) => Err(AppError::tool_failed(TOOL, &output)),
            None => Ok(false),
        }
    }

    // ==================== Media ====================

    /// Arguments for the media download into `<folder>/source.%(ext)s`.
    pub fn download_args(&self, url: &str, format_id: &str, folder: &Path) -> Vec<OsString> {
        let template = folder.join(format!("{}.%(ext)s", config::download::SOURCE_STEM));
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            format_id.into(),
            "--remux-video".into(),
            "mp4".into(),
            "--output".into(),
            template.into(),
            url.into(),
        ];
        args.extend(config::download::RESILIENCE_ARGS.iter().map(OsString::from));
        args.extend(self.common_args());
        args
    }

    /// Spawns the media download with both pipes captured.
    pub fn spawn_download(&self, args: &[OsString]) -> AppResult<Child> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.spawn().map_err(|e| AppError::spawn(TOOL, e))
    }

    // ==================== Formats / Version ====================

    /// `yt-dlp -F URL`, returned line by line.
    pub async fn list_formats(&self, url: &str) -> AppResult<Vec<String>> {
        let mut cmd = self.command();
        cmd.args(["-F", url]).args(self.common_args());
        let output = run_checked(&mut cmd, TOOL).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    pub async fn version(&self) -> AppResult<String> {
        let mut cmd = self.command();
        cmd.arg("--version");
        let output = run_with_timeout(&mut cmd, config::setup::version_command_timeout(), TOOL).await?;
        if !output.status.success() {
            return Err(AppError::tool_failed(TOOL, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Title prefetch used by the queue controller.
#[derive(Debug, Clone)]
pub struct YtDlpTitleResolver {
    ytdlp: Arc<YtDlp>,
}

impl YtDlpTitleResolver {
    pub fn new(ytdlp: Arc<YtDlp>) -> Self {
        Self { ytdlp }
    }
}

#[async_trait]
impl TitleResolver for YtDlpTitleResolver {
    async fn resolve(&self, locator: &str) -> AppResult<String> {
        let never = CancellationToken::new();
        self.ytdlp
            .get_title(locator, &never)
            .await?
            .ok_or_else(|| AppError::Validation("title lookup cancelled".to_string()))
    }
}
