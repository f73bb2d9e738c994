//! Nine-band equalizer
//!
//! Gains are typed by hand, so parsing is forgiving: full-width characters,
//! comma decimals and a `dB` suffix are all accepted, and anything unreadable
//! counts as 0 dB.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::error::{AppError, AppResult};

/// Band gains are limited to this many dB either way.
pub const GAIN_LIMIT_DB: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Band {
    L1,
    L2,
    L3,
    M1,
    M2,
    M3,
    H1,
    H2,
    H3,
}

impl Band {
    pub const ALL: [Band; 9] = [
        Band::L1,
        Band::L2,
        Band::L3,
        Band::M1,
        Band::M2,
        Band::M3,
        Band::H1,
        Band::H2,
        Band::H3,
    ];

    pub fn frequency_hz(&self) -> u32 {
        match self {
            Band::L1 => 60,
            Band::L2 => 120,
            Band::L3 => 250,
            Band::M1 => 500,
            Band::M2 => 1000,
            Band::M3 => 2000,
            Band::H1 => 4000,
            Band::H2 => 8000,
            Band::H3 => 16000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::L1 => "L1",
            Band::L2 => "L2",
            Band::L3 => "L3",
            Band::M1 => "M1",
            Band::M2 => "M2",
            Band::M3 => "M3",
            Band::H1 => "H1",
            Band::H2 => "H2",
            Band::H3 => "H3",
        }
    }

    fn index(&self) -> usize {
        Band::ALL.iter().position(|b| b == self).unwrap_or(0)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Band {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Band::ALL
            .iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| AppError::Validation(format!("unknown EQ band '{}', expected L1..H3", s)))
    }
}

/// Parses a typed gain.
///
/// Empty or unreadable input is 0. With `clamp`, the result is limited to
/// ±[`GAIN_LIMIT_DB`].
pub fn parse_gain(text: &str, clamp: bool) -> f64 {
    let mut s = text
        .trim()
        .replace('\u{3000}', " ")
        .replace('，', ",")
        .replace('＋', "+")
        .replace('－', "-")
        .replace('—', "-")
        .replace("Db", "dB");
    if s.is_empty() {
        return 0.0;
    }

    if s.to_lowercase().ends_with("db") {
        s.truncate(s.len() - 2);
    }
    let mut s = s.trim().to_string();

    if s.matches(',').count() == 1 && !s.contains('.') {
        s = s.replace(',', ".");
    }
    let s = s.strip_prefix('+').unwrap_or(&s).trim();

    let value = match s.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => return 0.0,
    };
    if clamp {
        value.clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB)
    } else {
        value
    }
}

/// Formats a float the way the filter strings expect: `3.0`, `-2.5`, `0.3`.
fn filter_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

/// Gains per band plus a master volume, all in dB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EqSettings {
    gains: [f64; 9],
    volume_db: f64,
}

impl EqSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a band from typed text (clamped).
    pub fn set_band_text(&mut self, band: Band, text: &str) {
        self.gains[band.index()] = parse_gain(text, true);
    }

    pub fn set_band(&mut self, band: Band, gain_db: f64) {
        self.gains[band.index()] = gain_db.clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB);
    }

    pub fn band(&self, band: Band) -> f64 {
        self.gains[band.index()]
    }

    /// Sets the master volume from typed text (not clamped).
    pub fn set_volume_text(&mut self, text: &str) {
        self.volume_db = parse_gain(text, false);
    }

    pub fn volume_db(&self) -> f64 {
        self.volume_db
    }

    /// ffmpeg `-af` chain, or `None` when nothing would change.
    pub fn build_filter(&self) -> Option<String> {
        let mut filters: Vec<String> = Band::ALL
            .iter()
            .filter(|b| self.band(**b) != 0.0)
            .map(|b| {
                format!(
                    "equalizer=f={}:t=o:w=1:g={}",
                    filter_number(f64::from(b.frequency_hz())),
                    filter_number(self.band(*b))
                )
            })
            .collect();

        if self.volume_db != 0.0 {
            filters.push(format!("volume={}dB", filter_number(self.volume_db)));
        }

        if filters.is_empty() {
            None
        } else {
            Some(filters.join(","))
        }
    }
}

/// Adjusts a typed volume by `delta`, returning the new text.
///
/// The result is clamped to ±12 and printed without trailing zeros; values
/// that start with a digit 1-9 get a leading `+`.
pub fn nudge_volume(current: &str, delta: f64) -> String {
    let value = (parse_gain(current, true) + delta).clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB);
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    let text = if text == "-0" { "0" } else { text };
    if text.starts_with('-') || text.starts_with('0') || text.starts_with('.') {
        text.to_string()
    } else {
        format!("+{}", text)
    }
}

/// What kind of file the EQ is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Audio: mp3 wav flac m4a. Video: mp4 mkv mov.
    pub fn detect(path: &Path) -> AppResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "mp3" | "wav" | "flac" | "m4a" => Ok(MediaKind::Audio),
            "mp4" | "mkv" | "mov" => Ok(MediaKind::Video),
            _ => Err(AppError::Validation(format!(
                "unsupported file type '{}' (audio: mp3/wav/flac/m4a, video: mp4/mkv/mov)",
                path.display()
            ))),
        }
    }

    /// `<base>_EQ.wav` for audio, `<base>_EQ.mkv` for video, next to the input.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let ext = match self {
            MediaKind::Audio => "wav",
            MediaKind::Video => "mkv",
        };
        input.with_file_name(format!("{}_EQ.{}", stem, ext))
    }
}
