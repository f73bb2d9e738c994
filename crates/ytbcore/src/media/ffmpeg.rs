//! ffmpeg invocations: PCM remux of downloads and equalizer rendering

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::journal::{Journal, LogCategory};
use crate::core::process::{command, run_cancellable, run_with_timeout};
use crate::media::equalizer::{EqSettings, MediaKind};

const TOOL: &str = "ffmpeg";

/// Audio options shared by the remux and the EQ render: 48 kHz stereo PCM s32le.
const PCM_AUDIO_ARGS: &[&str] = &["-ar", "48000", "-ac", "2", "-c:a", "pcm_s32le"];

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    bin: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Ffmpeg {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn from_env() -> Self {
        Self::new(config::FFMPEG_BIN.as_str())
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    fn command(&self) -> Command {
        command(&self.bin)
    }

    /// Video copied, audio converted to PCM, timestamps regenerated.
    pub fn remux_args(input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-loglevel".into(),
            "info".into(),
            "-i".into(),
            input.into(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            "pcm_s32le".into(),
            "-ar".into(),
            "48000".into(),
            "-ac".into(),
            "2".into(),
            "-fflags".into(),
            "+genpts".into(),
            "-y".into(),
        ];
        args.push(output.into());
        args
    }

    /// EQ render: `-af <filter>` plus PCM audio; video streams are copied.
    pub fn eq_args(input: &Path, output: &Path, filter: &str, kind: MediaKind) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-loglevel".into(), "info".into(), "-i".into(), input.into()];
        if kind == MediaKind::Video {
            args.push("-c:v".into());
            args.push("copy".into());
        }
        args.push("-af".into());
        args.push(filter.into());
        args.extend(PCM_AUDIO_ARGS.iter().map(OsString::from));
        args.push("-y".into());
        args.push(output.into());
        args
    }

    async fn run(&self, args: Vec<OsString>, token: &CancellationToken) -> AppResult<bool> {
        let mut cmd = self.command();
        cmd.args(args);
        match run_cancellable(&mut cmd, token, TOOL).await? {
            Some(output) if output.status.success() => Ok(true),
            Some(output) => Err(AppError::tool_failed(TOOL, &output)),
            None => Ok(false),
        }
    }

    /// Remuxes `input` into `output`; `Ok(false)` when cancelled.
    pub async fn remux_to_pcm(&self, input: &Path, output: &Path, token: &CancellationToken) -> AppResult<bool> {
        let done = self.run(Self::remux_args(input, output), token).await?;
        if done && !output.is_file() {
            return Err(AppError::MissingOutput(output.to_path_buf()));
        }
        Ok(done)
    }

    /// `ffmpeg -version`, first line.
    pub async fn version(&self) -> AppResult<String> {
        let mut cmd = self.command();
        cmd.arg("-version");
        let output = run_with_timeout(&mut cmd, config::setup::version_command_timeout(), TOOL).await?;
        if !output.status.success() {
            return Err(AppError::tool_failed(TOOL, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    /// Renders the equalizer into `<base>_EQ.wav` / `<base>_EQ.mkv`.
    ///
    /// Returns `Ok(None)` when the settings are flat (nothing to do).
    pub async fn apply_eq(&self, input: &Path, eq: &EqSettings, journal: &Journal) -> AppResult<Option<PathBuf>> {
        if !input.is_file() {
            return Err(AppError::Validation(format!("not a file: {}", input.display())));
        }
        let kind = MediaKind::detect(input)?;
        let Some(filter) = eq.build_filter() else {
            journal.info(LogCategory::Equalizer, "ℹ️ All gains are 0 dB, nothing to do");
            return Ok(None);
        };

        let output = kind.output_path(input);
        journal.info(
            LogCategory::Equalizer,
            format!("🔄 Processing {} file: {}", if kind == MediaKind::Audio { "audio" } else { "video" }, input.display()),
        );
        journal.info(LogCategory::Equalizer, format!("🔧 Filter: -af {}", filter));

        let never = CancellationToken::new();
        if let Err(e) = self.run(Self::eq_args(input, &output, &filter, kind), &never).await {
            journal.error(LogCategory::Equalizer, format!("❌ EQ failed: {}", e));
            return Err(e);
        }
        journal.info(LogCategory::Equalizer, format!("✅ Done: {}", output.display()));
        Ok(Some(output))
    }
}
