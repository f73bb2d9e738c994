//! Cookies file state and validity probe
//!
//! yt-dlp only receives `--cookies` when the configured file passed the last
//! probe. The probe runs at startup and whenever the path changes.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::config;
use crate::core::journal::{Journal, LogCategory};
use crate::core::process::{command, run_with_timeout};

/// Current cookies file plus the "usable" flag, shared by every yt-dlp call.
#[derive(Debug, Default)]
pub struct CookieGate {
    path: RwLock<Option<PathBuf>>,
    valid: AtomicBool,
}

impl CookieGate {
    /// A gate for `path`; unusable until probed.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: RwLock::new(path),
            valid: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }

    /// Switches to another file; it stays unusable until probed again.
    pub fn set_path(&self, path: Option<PathBuf>) {
        *self.path.write() = path;
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn mark(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// The file to pass as `--cookies`, if it is currently usable.
    pub fn usable(&self) -> Option<PathBuf> {
        if self.is_valid() {
            self.path()
        } else {
            None
        }
    }

    /// `--cookies <file>` or nothing.
    pub fn args(&self) -> Vec<String> {
        match self.usable() {
            Some(path) => vec!["--cookies".to_string(), path.to_string_lossy().into_owned()],
            None => Vec::new(),
        }
    }
}

/// True iff yt-dlp can fetch the probe video's metadata with `path`.
///
/// Any failure (missing file, spawn error, timeout, non-zero exit,
/// `LOGIN_REQUIRED` on stderr) counts as invalid.
pub async fn check_cookies(ytdlp_bin: &str, path: Option<&Path>) -> bool {
    let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
        return false;
    };
    if !path.exists() {
        log::warn!("Cookies file {} does not exist", path.display());
        return false;
    }

    let mut cmd = command(ytdlp_bin);
    cmd.env("PYTHONIOENCODING", "utf-8")
        .arg("--cookies")
        .arg(path)
        .args(["--dump-json", config::cookies::PROBE_URL]);

    match run_with_timeout(&mut cmd, config::cookies::probe_timeout(), "yt-dlp").await {
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            output.status.success() && !stderr.contains(config::cookies::LOGIN_REQUIRED_MARKER)
        }
        Err(e) => {
            log::warn!("Cookies probe failed: {}", e);
            false
        }
    }
}

/// Probes the gate's current file, records the verdict and journals it.
pub async fn refresh_cookies(gate: &CookieGate, ytdlp_bin: &str, journal: &Journal) -> bool {
    let path = gate.path();
    let valid = check_cookies(ytdlp_bin, path.as_deref()).await;
    gate.mark(valid);

    match (&path, valid) {
        (None, _) => journal.warn(LogCategory::Cookies, "⚠️ No cookies file configured"),
        (Some(p), true) => journal.info(LogCategory::Cookies, format!("✅ Cookies valid: {}", p.display())),
        (Some(p), false) => journal.warn(
            LogCategory::Cookies,
            format!("❌ Cookies invalid or expired, continuing without them: {}", p.display()),
        ),
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_gate_unusable_until_marked() {
        let gate = CookieGate::new(Some(PathBuf::from("/tmp/cookies.txt")));
        assert!(gate.usable().is_none());
        assert!(gate.args().is_empty());

        gate.mark(true);
        assert_eq!(gate.args(), vec!["--cookies".to_string(), "/tmp/cookies.txt".to_string()]);
    }

    #[test]
    fn test_set_path_resets_validity() {
        let gate = CookieGate::new(Some(PathBuf::from("a.txt")));
        gate.mark(true);
        gate.set_path(Some(PathBuf::from("b.txt")));
        assert!(!gate.is_valid());
        assert_eq!(gate.path(), Some(PathBuf::from("b.txt")));
    }

    #[tokio::test]
    async fn test_check_cookies_missing_or_empty_path() {
        assert!(!check_cookies("yt-dlp", None).await);
        assert!(!check_cookies("yt-dlp", Some(Path::new(""))).await);

        let dir = tempdir().unwrap();
        assert!(!check_cookies("yt-dlp", Some(&dir.path().join("nope.txt"))).await);
    }

    #[tokio::test]
    async fn test_check_cookies_missing_binary_is_invalid() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("cookies.txt");
        std::fs::write(&file, "# Netscape HTTP Cookie File\n").unwrap();
        assert!(!check_cookies("definitely-not-yt-dlp-4242", Some(&file)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_cookies_with_fake_ytdlp() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let file = dir.path().join("cookies.txt");
        std::fs::write(&file, "# Netscape HTTP Cookie File\n").unwrap();

        let ok = dir.path().join("ok.sh");
        std::fs::write(&ok, "#!/bin/sh\necho '{}'\n").unwrap();
        std::fs::set_permissions(&ok, std::fs::Permissions::from_mode(0o755)).unwrap();

        let login = dir.path().join("login.sh");
        std::fs::write(&login, "#!/bin/sh\necho 'ERROR: LOGIN_REQUIRED' >&2\n").unwrap();
        std::fs::set_permissions(&login, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(check_cookies(ok.to_str().unwrap(), Some(&file)).await);
        assert!(!check_cookies(login.to_str().unwrap(), Some(&file)).await);

        let gate = CookieGate::new(Some(file.clone()));
        let journal = Journal::new();
        assert!(refresh_cookies(&gate, ok.to_str().unwrap(), &journal).await);
        assert_eq!(gate.usable(), Some(file));
        assert_eq!(journal.lines(LogCategory::Cookies).len(), 1);
    }
}
