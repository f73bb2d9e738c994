use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Expands `~` in user-supplied paths.
fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Per-user configuration directory
/// Read from YTB_CONFIG_DIR environment variable
/// Default: <platform config dir>/YTBDownloader (APPDATA on Windows)
pub static CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    env::var("YTB_CONFIG_DIR").map(|p| expand(&p)).unwrap_or_else(|_| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("YTBDownloader")
    })
});

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable.
/// Falls back to the managed copy in the config dir, then to "yt-dlp" on PATH.
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| {
    env::var("YTDL_BIN").unwrap_or_else(|_| {
        let managed = managed_ytdlp_path();
        if managed.exists() {
            managed.to_string_lossy().into_owned()
        } else {
            "yt-dlp".to_string()
        }
    })
});

/// Cached ffmpeg binary path
/// Read from FFMPEG_BIN environment variable, defaults to "ffmpeg"
pub static FFMPEG_BIN: Lazy<String> = Lazy::new(|| env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()));

/// Directory holding biliup and its cookies.json
/// Read from BILIUP_DIR environment variable; searched next to the executable when unset
pub static BILIUP_DIR: Lazy<Option<PathBuf>> = Lazy::new(|| env::var("BILIUP_DIR").ok().map(|p| expand(&p)));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: ytb.log inside the config dir
pub static LOG_FILE_PATH: Lazy<PathBuf> = Lazy::new(|| {
    env::var("LOG_FILE_PATH")
        .map(|p| expand(&p))
        .unwrap_or_else(|_| CONFIG_DIR.join("ytb.log"))
});

/// Where `setup`/`update` place the downloaded yt-dlp binary.
pub fn managed_ytdlp_path() -> PathBuf {
    CONFIG_DIR.join(if cfg!(windows) { "yt-dlp.exe" } else { "yt-dlp" })
}

/// Persisted user settings (save path, cookies path).
pub fn settings_path() -> PathBuf {
    CONFIG_DIR.join("config.json")
}

/// First-run setup marker.
pub fn setup_status_path() -> PathBuf {
    CONFIG_DIR.join("setup_status.json")
}

/// Directory of the running executable; biliup is looked up relative to it.
pub fn exe_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Queue controller configuration
pub mod queue {
    use super::Duration;

    /// How often the CLI polls the controller for a snapshot (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 250;

    pub fn poll_interval() -> Duration {
        Duration::from_millis(POLL_INTERVAL_MS)
    }
}

/// Download pipeline configuration
pub mod download {
    /// Stem of the intermediate file yt-dlp writes into the task folder
    pub const SOURCE_STEM: &str = "source";

    /// Final name of the cover image inside the task folder
    pub const COVER_FILE: &str = "cover.jpg";

    /// Containers yt-dlp may leave behind after `--remux-video mp4`
    pub const SOURCE_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov"];

    /// Suffix of the temporary remux target before the final rename
    pub const REMUX_SUFFIX: &str = "remux.mkv";

    /// Extra yt-dlp resilience flags appended to every media download
    pub const RESILIENCE_ARGS: &[&str] = &[
        "--no-post-overwrites",
        "--retries",
        "5",
        "--fragment-retries",
        "5",
        "--socket-timeout",
        "30",
        "--http-chunk-size",
        "5242880",
        "--buffer-size",
        "32768",
        "--concurrent-fragments",
        "1",
        "--sleep-interval",
        "1",
        "--max-sleep-interval",
        "3",
    ];
}

/// Cookie probe configuration
pub mod cookies {
    use super::Duration;

    /// Public video used to check that a cookies file still authenticates
    pub const PROBE_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    /// Marker yt-dlp prints when the cookies no longer log in
    pub const LOGIN_REQUIRED_MARKER: &str = "LOGIN_REQUIRED";

    pub const PROBE_TIMEOUT_SECS: u64 = 10;

    pub fn probe_timeout() -> Duration {
        Duration::from_secs(PROBE_TIMEOUT_SECS)
    }
}

/// biliup upload configuration
pub mod upload {
    use super::Duration;

    pub const DEFAULT_TAGS: &str = "电音节,LIVE,DJ,电子音乐,电音";

    /// Bilibili category id (music)
    pub const TID: &str = "29";

    /// 2 = repost
    pub const COPYRIGHT: &str = "2";

    pub const SOURCE: &str = "yt";

    /// Lines biliup prints when the submission went through
    pub const SUCCESS_MARKERS: &[&str] = &["投稿成功", "APP接口投稿成功"];

    /// Pause before launching biliup to stay clear of rate limits (milliseconds)
    pub const START_DELAY_MS: u64 = 1000;

    pub fn start_delay() -> Duration {
        Duration::from_millis(START_DELAY_MS)
    }

    /// Bilibili "who am I" endpoint
    pub const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";

    pub const NAV_TIMEOUT_SECS: u64 = 5;

    pub const SPACE_URL_PREFIX: &str = "https://space.bilibili.com/";
}

/// First-run setup and self-update configuration
pub mod setup {
    use super::Duration;

    /// Latest yt-dlp release asset for this platform
    pub const YTDLP_RELEASE_URL: &str = if cfg!(windows) {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux"
    };

    /// Release metadata used to detect a newer yt-dlp
    pub const PYPI_URL: &str = "https://pypi.org/pypi/yt-dlp/json";

    pub const FFMPEG_ZIP_URL: &str = "https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip";

    /// Windows locations checked when ffmpeg is not on PATH
    pub const FFMPEG_COMMON_DIRS: &[&str] = &[
        "C:\\ffmpeg\\bin",
        "C:\\Program Files\\ffmpeg\\bin",
        "C:\\Program Files (x86)\\ffmpeg\\bin",
    ];

    pub const VERSION_CHECK_TIMEOUT_SECS: u64 = 5;

    /// Binary downloads (yt-dlp, ffmpeg zip)
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

    /// `<tool> --version` must answer within this time
    pub const VERSION_COMMAND_TIMEOUT_SECS: u64 = 10;

    pub fn version_check_timeout() -> Duration {
        Duration::from_secs(VERSION_CHECK_TIMEOUT_SECS)
    }

    pub fn download_timeout() -> Duration {
        Duration::from_secs(DOWNLOAD_TIMEOUT_SECS)
    }

    pub fn version_command_timeout() -> Duration {
        Duration::from_secs(VERSION_COMMAND_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_in_config_dir() {
        assert!(settings_path().starts_with(&*CONFIG_DIR));
        assert!(setup_status_path().starts_with(&*CONFIG_DIR));
        assert!(managed_ytdlp_path().starts_with(&*CONFIG_DIR));
    }

    #[test]
    fn test_resilience_args_are_flag_value_pairs() {
        // one bare flag followed by (flag, value) pairs
        assert_eq!(download::RESILIENCE_ARGS[0], "--no-post-overwrites");
        assert_eq!((download::RESILIENCE_ARGS.len() - 1) % 2, 0);
    }

    #[test]
    fn test_durations() {
        assert_eq!(cookies::probe_timeout(), Duration::from_secs(10));
        assert_eq!(upload::start_delay(), Duration::from_secs(1));
    }
}
