use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};

use ytbcore::core::config;
use ytbcore::core::process::default_terminator;
use ytbcore::core::setup::{EnvironmentSetup, UpdateCheck};
use ytbcore::download::queue::{EntryId, EntryStatus, QueueSnapshot};
use ytbcore::media::{Band, EqSettings};
use ytbcore::upload::{fetch_account, BiliupInstall, UploadOutcome, UploadRequest, Uploader};

use crate::app::App;

/// Prints rows whose text changed since the last call.
#[derive(Default)]
pub struct StatusPrinter {
    rows: HashMap<EntryId, String>,
}

impl StatusPrinter {
    pub fn changes(&mut self, snapshot: &QueueSnapshot) -> Vec<String> {
        let mut changed = Vec::new();
        for entry in &snapshot.entries {
            let row = entry.row();
            if self.rows.get(&entry.id) != Some(&row) {
                changed.push(format!("{} {}", entry.id, row));
                self.rows.insert(entry.id, row);
            }
        }
        self.rows.retain(|id, _| snapshot.entry(*id).is_some());
        changed
    }

    pub fn print(&mut self, snapshot: &QueueSnapshot) {
        for line in self.changes(snapshot) {
            println!("{}", line);
        }
    }
}

pub async fn run_download(app: App, urls: Vec<String>, format: String) -> Result<()> {
    app.startup_checks().await;
    println!("📁 Saving into {}", app.save_dir.read().display());

    let (queue, join) = app.start_queue();
    for url in urls {
        queue.enqueue(url, format.clone()).await?;
    }

    let mut printer = StatusPrinter::default();
    let snapshot = loop {
        let snapshot = queue.snapshot().await?;
        printer.print(&snapshot);
        if snapshot.is_idle() {
            break snapshot;
        }
        tokio::select! {
            _ = tokio::time::sleep(config::queue::poll_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                match snapshot.active {
                    Some(id) => {
                        println!("⏹️ Cancelling {}...", id);
                        queue.cancel_now(id)?;
                    }
                    None => break snapshot,
                }
            }
        }
    };

    queue.shutdown()?;
    if let Err(e) = join.await {
        log::warn!("Queue controller ended abnormally: {}", e);
    }

    let failed = snapshot
        .entries
        .iter()
        .filter(|e| matches!(e.status, EntryStatus::Failed(_)))
        .count();
    let done = snapshot
        .entries
        .iter()
        .filter(|e| e.status == EntryStatus::Succeeded)
        .count();
    println!("✅ {} done, ❌ {} failed", done, failed);
    if failed > 0 {
        bail!("{} download(s) failed", failed);
    }
    Ok(())
}

pub async fn run_formats(app: App, url: String) -> Result<()> {
    app.startup_checks().await;
    for line in app.ytdlp.list_formats(&url).await? {
        println!("{}", line);
    }
    Ok(())
}

pub struct EqArgs {
    pub file: PathBuf,
    pub gains: Vec<(Band, Option<String>)>,
    pub volume: Option<String>,
}

pub fn build_eq(args: &EqArgs) -> EqSettings {
    let mut eq = EqSettings::new();
    for (band, text) in &args.gains {
        if let Some(text) = text {
            eq.set_band_text(*band, text);
        }
    }
    if let Some(volume) = &args.volume {
        eq.set_volume_text(volume);
    }
    eq
}

pub async fn run_eq(app: App, args: EqArgs) -> Result<()> {
    let eq = build_eq(&args);
    for band in Band::ALL {
        log::debug!("{} ({} Hz): {} dB", band, band.frequency_hz(), eq.band(band));
    }
    // progress and the output path are reported through the journal
    app.ffmpeg.apply_eq(&args.file, &eq, &app.journal).await?;
    Ok(())
}

fn find_biliup() -> Result<BiliupInstall> {
    let exe_dir = config::exe_dir();
    BiliupInstall::discover(config::BILIUP_DIR.as_deref(), &exe_dir).ok_or_else(|| {
        let places: Vec<String> = BiliupInstall::candidates(config::BILIUP_DIR.as_deref(), &exe_dir)
            .iter()
            .map(|p| format!("  {}", p.display()))
            .collect();
        anyhow!(
            "biliup not found. Put the biliup binary and cookies.json in one of:\n{}",
            places.join("\n")
        )
    })
}

pub async fn run_upload(app: App, request: UploadRequest, mirror: bool) -> Result<()> {
    let install = find_biliup()?;
    let account = fetch_account(&install.cookies).await;
    println!("👤 Bilibili user: {}", account.username);
    println!("🔗 {}", account.space_url);

    let uploader = Uploader::new(install, default_terminator(), app.journal.clone()).with_mirror_terminal(mirror);
    let upload = uploader.upload(&request);
    tokio::pin!(upload);

    let outcome = loop {
        tokio::select! {
            result = &mut upload => break result?,
            _ = tokio::signal::ctrl_c() => {
                uploader.cancel();
            }
        }
    };

    match outcome {
        UploadOutcome::Succeeded => Ok(()),
        UploadOutcome::Cancelled => {
            println!("⏹️ Upload cancelled");
            Ok(())
        }
        UploadOutcome::Failed { reason } => bail!("upload failed: {}", reason),
    }
}

pub async fn run_account() -> Result<()> {
    let install = find_biliup()?;
    let account = fetch_account(&install.cookies).await;
    println!("biliup:   {}", install.dir.display());
    println!("user:     {}", account.username);
    println!("space:    {}", account.space_url);
    Ok(())
}

pub async fn run_cookies_check(app: App) -> Result<()> {
    if app.cookies.path().is_none() {
        bail!("no cookies file configured, use `ytb cookies set <PATH>`");
    }
    if app.probe_cookies().await {
        println!("✅ Cookies are valid");
        Ok(())
    } else {
        bail!("cookies are invalid or expired")
    }
}

pub async fn run_cookies_set(mut app: App, path: PathBuf) -> Result<()> {
    let absolute = app.set_cookies_path(&path)?;
    println!("🍪 Cookies file: {}", absolute.display());
    if app.probe_cookies().await {
        println!("✅ Cookies are valid");
    } else {
        println!("⚠️ Cookies are invalid or expired, downloads will run without them");
    }
    Ok(())
}

pub fn run_config_show(app: &App) {
    println!("config file: {}", app.settings.path().display());
    println!("save path:   {}", app.settings.save_path().display());
    println!(
        "cookies:     {}",
        app.settings
            .cookies_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("config dir:  {}", config::CONFIG_DIR.display());
    println!("log file:    {}", config::LOG_FILE_PATH.display());
    println!("yt-dlp:      {}", app.ytdlp.bin());
    println!("ffmpeg:      {}", app.ffmpeg.bin());
}

pub fn run_config_set_save_path(mut app: App, dir: PathBuf) -> Result<()> {
    let absolute = app.set_save_path(&dir)?;
    println!("💾 Save path: {}", absolute.display());
    Ok(())
}

pub async fn run_setup(app: App, force: bool) -> Result<()> {
    let setup = EnvironmentSetup::new(app.journal.clone())?;
    let report = setup.run(force).await?;
    if report.skipped {
        println!("✅ Setup already complete (use --force to run it again)");
        return Ok(());
    }
    println!(
        "yt-dlp: {}  ffmpeg: {}  biliup: {}",
        mark(report.ytdlp),
        mark(report.ffmpeg),
        mark(report.biliup)
    );
    if !report.is_complete() {
        bail!("setup incomplete, yt-dlp is not available");
    }
    Ok(())
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✅"
    } else {
        "❌"
    }
}

pub async fn run_update(app: App) -> Result<()> {
    let setup = EnvironmentSetup::new(app.journal.clone())?;
    match setup.check_ytdlp_update().await? {
        UpdateCheck::UpToDate { local, .. } => println!("✅ yt-dlp {} is up to date", local),
        UpdateCheck::Updated { previous, latest } => println!(
            "⬆️ yt-dlp {} → {} ({})",
            previous.as_deref().unwrap_or("none"),
            latest,
            setup.ytdlp_path().display()
        ),
        UpdateCheck::Skipped { reason } => println!("⚠️ Could not check for updates: {}", reason),
    }
    Ok(())
}
