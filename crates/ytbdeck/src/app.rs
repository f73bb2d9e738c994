//! Shared wiring for every subcommand

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use ytbcore::core::process::default_terminator;
use ytbcore::core::settings::SettingsStore;
use ytbcore::core::{log_tools_configuration, Journal, SharedJournal};
use ytbcore::download::cookies::refresh_cookies;
use ytbcore::download::pipeline::SharedSaveDir;
use ytbcore::download::{spawn_queue, CookieGate, DownloadPipeline, QueueHandle, YtDlp, YtDlpTitleResolver};
use ytbcore::media::Ffmpeg;

pub struct App {
    pub settings: SettingsStore,
    pub journal: SharedJournal,
    pub cookies: Arc<CookieGate>,
    pub ytdlp: Arc<YtDlp>,
    pub ffmpeg: Arc<Ffmpeg>,
    pub save_dir: SharedSaveDir,
}

impl App {
    pub fn load() -> Self {
        let settings = SettingsStore::open_default();
        log::debug!("Settings loaded from {}", settings.path().display());

        let cookies = Arc::new(CookieGate::new(settings.cookies_path().map(|p| p.to_path_buf())));
        let ytdlp = Arc::new(YtDlp::from_env(Arc::clone(&cookies)));
        let save_dir = Arc::new(RwLock::new(settings.save_path()));

        Self {
            settings,
            journal: Journal::shared(),
            cookies,
            ytdlp,
            ffmpeg: Arc::new(Ffmpeg::from_env()),
            save_dir,
        }
    }

    /// Logs the tool setup and probes the cookies once.
    pub async fn startup_checks(&self) {
        log_tools_configuration(self.settings.cookies_path());
        if self.cookies.path().is_some() {
            self.probe_cookies().await;
        }
    }

    pub async fn probe_cookies(&self) -> bool {
        refresh_cookies(&self.cookies, self.ytdlp.bin(), &self.journal).await
    }

    /// Persists a new save directory and points running downloads at it.
    pub fn set_save_path(&mut self, dir: &std::path::Path) -> anyhow::Result<std::path::PathBuf> {
        let absolute = self.settings.set_save_path(dir)?;
        *self.save_dir.write() = absolute.clone();
        Ok(absolute)
    }

    /// Persists a new cookies file; it stays unused until probed.
    pub fn set_cookies_path(&mut self, path: &std::path::Path) -> anyhow::Result<std::path::PathBuf> {
        let absolute = self.settings.set_cookies_path(path)?;
        self.cookies.set_path(Some(absolute.clone()));
        Ok(absolute)
    }

    pub fn start_queue(&self) -> (QueueHandle, JoinHandle<()>) {
        let pipeline = DownloadPipeline::new(
            Arc::clone(&self.ytdlp),
            Arc::clone(&self.ffmpeg),
            Arc::clone(&self.save_dir),
            Arc::clone(&self.journal),
        );
        let terminator = default_terminator();
        log::debug!("Using {} terminator", terminator.name());
        spawn_queue(
            Arc::new(pipeline),
            Arc::new(YtDlpTitleResolver::new(Arc::clone(&self.ytdlp))),
            terminator,
            Arc::clone(&self.journal),
        )
    }
}
