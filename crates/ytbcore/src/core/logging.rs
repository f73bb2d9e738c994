//! Logging initialization and tool configuration checking
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - Startup diagnostics for the external binaries and the cookies file

use anyhow::Result;
use simplelog::*;
use std::fs::File;
use std::path::Path;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file; its parent directory is created
/// * `verbose` - Lower the console level to `Debug`
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to initialize logger
pub fn init_logger(log_file_path: &Path, verbose: bool) -> Result<()> {
    if let Some(parent) = log_file_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| anyhow::anyhow!("Failed to create log directory: {}", e))?;
    }
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    let term_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    CombinedLogger::init(vec![
        TermLogger::new(term_level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Debug, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs which external tools and cookies file will be used
///
/// Checks:
/// - yt-dlp / ffmpeg binary configuration (env override or default)
/// - biliup directory override
/// - Cookies file existence
pub fn log_tools_configuration(cookies_path: Option<&Path>) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("🔧 Tools Configuration Check");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    log::info!("📁 Config dir: {}", config::CONFIG_DIR.display());
    log_binary("yt-dlp", "YTDL_BIN", &config::YTDL_BIN);
    log_binary("ffmpeg", "FFMPEG_BIN", &config::FFMPEG_BIN);

    match config::BILIUP_DIR.as_deref() {
        Some(dir) if dir.is_dir() => log::info!("✅ BILIUP_DIR: {}", dir.display()),
        Some(dir) => log::error!("❌ BILIUP_DIR: {} (DIRECTORY NOT FOUND!)", dir.display()),
        None => log::info!("ℹ️  BILIUP_DIR: not set, searching next to the executable"),
    }

    match cookies_path {
        Some(path) if path.exists() => {
            log::info!("✅ Cookies file: {}", path.display());
            log::info!("   Validity is probed against YouTube before first use");
        }
        Some(path) => {
            log::error!("❌ Cookies file: {} (FILE NOT FOUND!)", path.display());
            log::error!("   Age-restricted and members-only videos will FAIL");
        }
        None => {
            log::warn!("⚠️  Cookies file: not set");
            log::warn!("   Set one with: ytb cookies set <PATH>");
        }
    }

    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

fn log_binary(name: &str, var: &str, value: &str) {
    let path = Path::new(value);
    if path.is_absolute() {
        if path.exists() {
            log::info!("✅ {}: {}", name, path.display());
        } else {
            log::error!("❌ {}: {} (FILE NOT FOUND!)", name, path.display());
        }
    } else if std::env::var(var).is_ok() {
        log::info!("✅ {}: {} (from {})", name, value, var);
    } else {
        log::info!("ℹ️  {}: {} (searched on PATH)", name, value);
    }
}
