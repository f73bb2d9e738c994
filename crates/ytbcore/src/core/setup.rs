//! First-run environment setup and yt-dlp self-update
//!
//! Setup makes sure the external tools are present: a managed yt-dlp binary
//! in the config dir, ffmpeg (downloaded on Windows when missing) and,
//! optionally, biliup. A status file records a successful run so later starts
//! skip the checks.

use std::path::{Component, Path, PathBuf};

use chrono::Local;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::journal::{LogCategory, SharedJournal};
use crate::core::process::{command, run_with_timeout};
use crate::core::utils::{format_megabytes, normalize_version};
use crate::upload::biliup::BiliupInstall;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+\.\d+").expect("valid version regex"));

/// First dotted `x.y.z` version in `text`.
pub fn parse_version(text: &str) -> Option<String> {
    VERSION_RE.find(text).map(|m| m.as_str().to_string())
}

/// Contents of `setup_status.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupStatus {
    #[serde(default)]
    pub setup_complete: bool,
    #[serde(default)]
    pub setup_time: Option<String>,
}

/// Missing or unreadable status files count as "not set up".
pub fn read_status(path: &Path) -> SetupStatus {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

pub fn mark_complete(path: &Path) -> AppResult<SetupStatus> {
    let status = SetupStatus {
        setup_complete: true,
        setup_time: Some(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&status)?)?;
    Ok(status)
}

/// Extracts `archive` into `dest`, dropping the top-level folder of each entry.
///
/// Entries that would land outside `dest` are rejected.
pub fn extract_stripped(archive: &Path, dest: &Path) -> AppResult<usize> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    let mut written = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().replace('\\', "/");
        let Some((_, rel)) = name.split_once('/') else {
            continue;
        };
        if rel.is_empty() {
            continue;
        }

        let rel_path = Path::new(rel);
        if rel_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(AppError::Validation(format!("unsafe path in archive: {}", name)));
        }

        let out_path = dest.join(rel_path);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    Ok(written)
}

/// What a full setup run found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// The status file said setup was already done.
    pub skipped: bool,
    pub ytdlp: bool,
    pub ffmpeg: bool,
    pub biliup: bool,
}

impl SetupReport {
    /// Setup counts as complete once yt-dlp is usable.
    pub fn is_complete(&self) -> bool {
        self.skipped || self.ytdlp
    }
}

/// Result of comparing the local yt-dlp with the latest release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    UpToDate { local: String, latest: String },
    Updated { previous: Option<String>, latest: String },
    /// The latest version could not be determined; nothing was changed.
    Skipped { reason: String },
}

pub struct EnvironmentSetup {
    client: reqwest::Client,
    journal: SharedJournal,
    ytdlp_path: PathBuf,
    status_path: PathBuf,
}

impl EnvironmentSetup {
    pub fn new(journal: SharedJournal) -> AppResult<Self> {
        Self::with_paths(journal, config::managed_ytdlp_path(), config::setup_status_path())
    }

    pub fn with_paths(journal: SharedJournal, ytdlp_path: PathBuf, status_path: PathBuf) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config::setup::download_timeout())
            .user_agent(concat!("ytb/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            journal,
            ytdlp_path,
            status_path,
        })
    }

    fn log(&self, message: impl Into<String>) {
        self.journal.info(LogCategory::Setup, message);
    }

    fn warn(&self, message: impl Into<String>) {
        self.journal.warn(LogCategory::Setup, message);
    }

    pub fn ytdlp_path(&self) -> &Path {
        &self.ytdlp_path
    }

    pub fn is_complete(&self) -> bool {
        read_status(&self.status_path).setup_complete
    }

    /// Runs every step; a recorded successful run is skipped unless `force`.
    pub async fn run(&self, force: bool) -> AppResult<SetupReport> {
        if !force && self.is_complete() {
            log::debug!("Setup already complete, skipping");
            return Ok(SetupReport {
                skipped: true,
                ..SetupReport::default()
            });
        }

        self.log("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        self.log("🚀 Setting up the environment...");
        self.log("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        let mut report = SetupReport::default();

        self.log("📥 Step 1/3: yt-dlp");
        report.ytdlp = self.ensure_ytdlp().await;
        if !report.ytdlp {
            self.journal
                .error(LogCategory::Setup, "❌ yt-dlp is not available, check the network connection");
        }

        self.log("🎬 Step 2/3: ffmpeg");
        report.ffmpeg = match self.check_ffmpeg().await {
            Some(_) => true,
            None => {
                self.warn("⚠️ ffmpeg not found, trying to install it...");
                match self.install_ffmpeg().await {
                    Ok(bin) => {
                        self.log(format!("✅ ffmpeg installed: {}", bin.display()));
                        true
                    }
                    Err(e) => {
                        // ffmpeg is not required for setup to count as done
                        self.warn(format!("❌ ffmpeg install failed: {}", e));
                        self.log("   Manual download: https://www.gyan.dev/ffmpeg/builds/");
                        false
                    }
                }
            }
        };

        self.log("📺 Step 3/3: biliup (optional)");
        report.biliup = self.check_biliup().is_some();

        if report.is_complete() {
            mark_complete(&self.status_path)?;
            self.log("✅ Setup complete");
        } else {
            self.warn("⚠️ Setup partially complete, see the errors above");
        }
        Ok(report)
    }

    /// `--version` of the managed yt-dlp copy, if it runs.
    pub async fn local_ytdlp_version(&self) -> Option<String> {
        if !self.ytdlp_path.is_file() {
            return None;
        }
        let mut cmd = command(&self.ytdlp_path);
        cmd.arg("--version");
        match run_with_timeout(&mut cmd, config::setup::version_command_timeout(), "yt-dlp").await {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|l| l.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Managed yt-dlp did not answer: {}", e);
                None
            }
        }
    }

    /// Keeps a working managed copy, else downloads the latest release.
    pub async fn ensure_ytdlp(&self) -> bool {
        if let Some(version) = self.local_ytdlp_version().await {
            self.log(format!("✅ yt-dlp present: {}", version));
            return true;
        }
        match self.download_ytdlp().await {
            Ok(()) => true,
            Err(e) => {
                self.journal
                    .error(LogCategory::Setup, format!("❌ yt-dlp download failed: {}", e));
                false
            }
        }
    }

    pub async fn download_ytdlp(&self) -> AppResult<()> {
        self.log("📥 Downloading yt-dlp...");
        let size = self
            .download_file(config::setup::YTDLP_RELEASE_URL, &self.ytdlp_path)
            .await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.ytdlp_path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        self.log(format!(
            "✅ yt-dlp saved to {} ({})",
            self.ytdlp_path.display(),
            format_megabytes(size)
        ));
        Ok(())
    }

    /// Streams `url` into `dest` through a `.part` file, logging every 10%.
    pub async fn download_file(&self, url: &str, dest: &Path) -> AppResult<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::HttpStatus(response.status()));
        }

        let total = response.content_length();
        let part = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&part).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_decile = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total.filter(|t| *t > 0) {
                let decile = downloaded * 10 / total;
                if decile > last_decile {
                    last_decile = decile;
                    self.log(format!("📥 Progress: {}%", (decile * 10).min(100)));
                }
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part, dest).await.map_err(|source| AppError::Rename {
            from: part.clone(),
            to: dest.to_path_buf(),
            source,
        })?;
        Ok(downloaded)
    }

    /// Finds a working ffmpeg: the configured binary, then common install dirs.
    pub async fn check_ffmpeg(&self) -> Option<PathBuf> {
        let mut cmd = command(config::FFMPEG_BIN.as_str());
        cmd.arg("-version");
        if let Ok(output) = run_with_timeout(&mut cmd, config::setup::version_check_timeout(), "ffmpeg").await {
            if output.status.success() {
                let first = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                self.log(format!("✅ ffmpeg installed: {}", first));
                return Some(PathBuf::from(config::FFMPEG_BIN.as_str()));
            }
        }

        if !cfg!(windows) {
            return None;
        }
        let mut dirs: Vec<PathBuf> = config::setup::FFMPEG_COMMON_DIRS.iter().map(PathBuf::from).collect();
        for var in ["PROGRAMFILES", "PROGRAMFILES(X86)"] {
            if let Ok(base) = std::env::var(var) {
                dirs.push(Path::new(&base).join("ffmpeg").join("bin"));
            }
        }
        let found = dirs.into_iter().map(|d| d.join("ffmpeg.exe")).find(|p| p.is_file())?;
        self.log(format!("✅ Found ffmpeg at {}", found.display()));
        self.log(format!("   Set FFMPEG_BIN={} to use it", found.display()));
        Some(found)
    }

    /// Downloads the essentials build and unpacks it to `C:\ffmpeg`.
    pub async fn install_ffmpeg(&self) -> AppResult<PathBuf> {
        if !cfg!(windows) {
            return Err(AppError::Validation(
                "automatic ffmpeg install is only available on Windows, use your package manager".to_string(),
            ));
        }

        let install_dir = PathBuf::from("C:\\ffmpeg");
        let temp_zip = std::env::temp_dir().join("ffmpeg.zip");

        self.log("📥 Downloading ffmpeg...");
        self.download_file(config::setup::FFMPEG_ZIP_URL, &temp_zip).await?;

        if install_dir.exists() {
            self.warn(format!("⚠️ Replacing existing {}", install_dir.display()));
            if let Err(e) = tokio::fs::remove_dir_all(&install_dir).await {
                self.warn(format!("⚠️ Could not remove old install: {}", e));
            }
        }

        self.log(format!("📦 Extracting to {}...", install_dir.display()));
        let (zip_path, dest) = (temp_zip.clone(), install_dir.clone());
        let extracted = tokio::task::spawn_blocking(move || extract_stripped(&zip_path, &dest))
            .await
            .map_err(|e| AppError::Config(format!("extraction task failed: {}", e)))?;
        if let Err(e) = tokio::fs::remove_file(&temp_zip).await {
            log::debug!("Could not remove {}: {}", temp_zip.display(), e);
        }
        let count = extracted?;
        log::debug!("Extracted {} files", count);

        let bin = install_dir.join("bin").join("ffmpeg.exe");
        if !bin.is_file() {
            return Err(AppError::MissingOutput(bin));
        }
        self.log(format!("   Set FFMPEG_BIN={} or add its folder to PATH", bin.display()));
        Ok(bin)
    }

    pub fn check_biliup(&self) -> Option<BiliupInstall> {
        match BiliupInstall::discover(config::BILIUP_DIR.as_deref(), &config::exe_dir()) {
            Some(install) => {
                self.log(format!("✅ Found biliup: {}", install.exe.display()));
                Some(install)
            }
            None => {
                self.log("ℹ️ biliup not found (optional, needed for Bilibili uploads)");
                None
            }
        }
    }

    /// Latest yt-dlp version published on PyPI.
    pub async fn latest_ytdlp_version(&self) -> AppResult<String> {
        let response = self
            .client
            .get(config::setup::PYPI_URL)
            .timeout(config::setup::version_check_timeout())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::HttpStatus(response.status()));
        }
        let body: serde_json::Value = response.json().await?;
        body["info"]["version"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::Validation("PyPI response has no info.version".to_string()))
    }

    /// Downloads a fresh yt-dlp when the managed copy is missing or outdated.
    pub async fn check_ytdlp_update(&self) -> AppResult<UpdateCheck> {
        self.log("🔍 Checking yt-dlp version...");
        let local = self
            .local_ytdlp_version()
            .await
            .and_then(|line| parse_version(&line));

        let latest = match self.latest_ytdlp_version().await {
            Ok(v) => v,
            Err(e) => {
                self.warn(format!("⚠️ Version check failed: {}", e));
                return Ok(UpdateCheck::Skipped { reason: e.to_string() });
            }
        };

        if let Some(local) = &local {
            if normalize_version(local) == normalize_version(&latest) {
                self.log(format!("✅ yt-dlp is up to date ({})", local));
                return Ok(UpdateCheck::UpToDate {
                    local: local.clone(),
                    latest,
                });
            }
        }

        self.log(format!(
            "⬆️ yt-dlp missing or outdated (local: {}, latest: {})",
            local.as_deref().unwrap_or("unknown"),
            latest
        ));
        self.download_ytdlp().await?;
        Ok(UpdateCheck::Updated { previous: local, latest })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::journal::Journal;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("2024.03.10").as_deref(), Some("2024.03.10"));
        assert_eq!(parse_version("yt-dlp 2023.12.30 (pip)").as_deref(), Some("2023.12.30"));
        assert_eq!(parse_version("nightly"), None);
    }

    #[test]
    fn test_status_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("setup_status.json");
        assert_eq!(read_status(&path), SetupStatus::default());

        let written = mark_complete(&path).unwrap();
        assert!(written.setup_complete);
        assert_eq!(read_status(&path), written);
    }

    #[test]
    fn test_corrupt_status_is_incomplete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setup_status.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(!read_status(&path).setup_complete);
    }

    #[tokio::test]
    async fn test_run_skips_when_complete() {
        let dir = tempdir().unwrap();
        let status = dir.path().join("setup_status.json");
        mark_complete(&status).unwrap();

        let setup = EnvironmentSetup::with_paths(Journal::shared(), dir.path().join("yt-dlp"), status).unwrap();
        let report = setup.run(false).await.unwrap();
        assert!(report.skipped);
        assert!(report.is_complete());
    }

    #[test]
    fn test_extract_stripped() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("ffmpeg.zip");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            zip.add_directory("ffmpeg-7.0-essentials_build/", options).unwrap();
            zip.start_file("ffmpeg-7.0-essentials_build/bin/ffmpeg.exe", options)
                .unwrap();
            zip.write_all(b"binary").unwrap();
            zip.start_file("ffmpeg-7.0-essentials_build/README.txt", options).unwrap();
            zip.write_all(b"readme").unwrap();
            zip.finish().unwrap();
        }

        let dest = dir.path().join("install");
        assert_eq!(extract_stripped(&archive, &dest).unwrap(), 2);
        assert_eq!(std::fs::read(dest.join("bin").join("ffmpeg.exe")).unwrap(), b"binary");
        assert!(dest.join("README.txt").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_version_from_managed_copy() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let bin = dir.path().join("yt-dlp");
        std::fs::write(&bin, "#!/bin/sh\necho 2024.08.06\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let setup =
            EnvironmentSetup::with_paths(Journal::shared(), bin, dir.path().join("setup_status.json")).unwrap();
        assert_eq!(setup.local_ytdlp_version().await.as_deref(), Some("2024.08.06"));
        assert!(setup.ensure_ytdlp().await);
    }
}
