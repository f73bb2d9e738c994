use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ytb")]
#[command(author, version, about = "Download live sets with yt-dlp, remux or EQ them with ffmpeg, upload them with biliup", long_about = None)]
pub struct Cli {
    /// Debug-level console logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Queue one or more downloads and run them to completion
    Download {
        /// Media URLs, downloaded one at a time in order
        #[arg(required = true)]
        urls: Vec<String>,

        /// yt-dlp format selector (see `ytb formats`)
        #[arg(short, long, default_value = "bestvideo+bestaudio/best")]
        format: String,
    },

    /// Line-based queue console (default when no command is given)
    Interactive,

    /// List the formats yt-dlp offers for a URL
    Formats { url: String },

    /// Apply the nine-band equalizer and master volume to a file
    Eq {
        file: PathBuf,

        #[arg(long = "L1", allow_hyphen_values = true)]
        l1: Option<String>,
        #[arg(long = "L2", allow_hyphen_values = true)]
        l2: Option<String>,
        #[arg(long = "L3", allow_hyphen_values = true)]
        l3: Option<String>,
        #[arg(long = "M1", allow_hyphen_values = true)]
        m1: Option<String>,
        #[arg(long = "M2", allow_hyphen_values = true)]
        m2: Option<String>,
        #[arg(long = "M3", allow_hyphen_values = true)]
        m3: Option<String>,
        #[arg(long = "H1", allow_hyphen_values = true)]
        h1: Option<String>,
        #[arg(long = "H2", allow_hyphen_values = true)]
        h2: Option<String>,
        #[arg(long = "H3", allow_hyphen_values = true)]
        h3: Option<String>,

        /// Master volume in dB (not limited to ±12)
        #[arg(long, allow_hyphen_values = true)]
        volume: Option<String>,
    },

    /// Upload a video to Bilibili with biliup
    Upload {
        video: PathBuf,

        /// Defaults to the file name without extension
        #[arg(long)]
        title: Option<String>,

        /// Defaults to the first image next to the video
        #[arg(long)]
        cover: Option<PathBuf>,

        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,

        /// Also show biliup output in a console window (Windows)
        #[arg(long)]
        mirror: bool,
    },

    /// Manage the YouTube cookies file
    Cookies {
        #[command(subcommand)]
        action: CookiesAction,
    },

    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Install or verify yt-dlp, ffmpeg and biliup
    Setup {
        /// Run even if setup completed before
        #[arg(long)]
        force: bool,
    },

    /// Update the managed yt-dlp when PyPI has a newer release
    Update,

    /// Show the Bilibili account biliup is logged in with
    Account,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum CookiesAction {
    /// Probe the configured cookies against YouTube
    Check,
    /// Use a new cookies file and probe it
    Set { path: PathBuf },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    Show,
    /// Directory downloads are saved into
    SetSavePath { dir: PathBuf },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_download_defaults() {
        let cli = Cli::try_parse_from(["ytb", "download", "https://youtu.be/a", "https://youtu.be/b"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Download {
                urls: vec!["https://youtu.be/a".to_string(), "https://youtu.be/b".to_string()],
                format: "bestvideo+bestaudio/best".to_string(),
            })
        );
        assert!(Cli::try_parse_from(["ytb", "download"]).is_err());
    }

    #[test]
    fn test_eq_accepts_negative_gains() {
        let cli = Cli::try_parse_from(["ytb", "-v", "eq", "set.flac", "--L1", "-3", "--H3", "+2", "--volume", "-1.5"])
            .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Eq {
                l1, h3, volume, m2, ..
            }) => {
                assert_eq!(l1.as_deref(), Some("-3"));
                assert_eq!(h3.as_deref(), Some("+2"));
                assert_eq!(volume.as_deref(), Some("-1.5"));
                assert_eq!(m2, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nested_subcommands() {
        let cli = Cli::try_parse_from(["ytb", "config", "set-save-path", "/data"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::SetSavePath { dir: PathBuf::from("/data") }
            })
        );

        let cli = Cli::try_parse_from(["ytb", "cookies", "check"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Cookies { action: CookiesAction::Check }));

        assert_eq!(Cli::try_parse_from(["ytb"]).unwrap().command, None);
    }
}
