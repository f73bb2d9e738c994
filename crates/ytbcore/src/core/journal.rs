//! In-memory activity journal
//!
//! Every worker (download pipeline, cookie probe, equalizer, uploader, setup)
//! appends human-readable lines here. The front-end reads them back per
//! category. Appending also forwards the line to the `log` facade so it lands
//! in the terminal and in the log file.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Oldest lines are dropped past this many per journal.
const DEFAULT_CAPACITY: usize = 5_000;

/// Log panel a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    Download,
    Cookies,
    Equalizer,
    Upload,
    Setup,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Download => "download",
            LogCategory::Cookies => "cookies",
            LogCategory::Equalizer => "eq",
            LogCategory::Upload => "upload",
            LogCategory::Setup => "setup",
        }
    }

    /// `log` target used when forwarding lines.
    fn target(&self) -> &'static str {
        match self {
            LogCategory::Download => "ytb::download",
            LogCategory::Cookies => "ytb::cookies",
            LogCategory::Equalizer => "ytb::eq",
            LogCategory::Upload => "ytb::upload",
            LogCategory::Setup => "ytb::setup",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalLine {
    pub at: DateTime<Local>,
    pub category: LogCategory,
    pub level: log::Level,
    pub message: String,
}

impl fmt::Display for JournalLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Thread-safe line sink shared by all workers.
#[derive(Debug)]
pub struct Journal {
    lines: Mutex<VecDeque<JournalLine>>,
    capacity: usize,
}

pub type SharedJournal = Arc<Journal>;

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn shared() -> SharedJournal {
        Arc::new(Self::new())
    }

    /// Appends a line at `level` and forwards it to the logger.
    pub fn append(&self, category: LogCategory, level: log::Level, message: impl Into<String>) {
        let message = message.into();
        log::log!(target: category.target(), level, "{}", message);

        let mut lines = self.lines.lock();
        lines.push_back(JournalLine {
            at: Local::now(),
            category,
            level,
            message,
        });
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    pub fn info(&self, category: LogCategory, message: impl Into<String>) {
        self.append(category, log::Level::Info, message);
    }

    pub fn warn(&self, category: LogCategory, message: impl Into<String>) {
        self.append(category, log::Level::Warn, message);
    }

    pub fn error(&self, category: LogCategory, message: impl Into<String>) {
        self.append(category, log::Level::Error, message);
    }

    /// All retained lines of one category, oldest first.
    pub fn lines(&self, category: LogCategory) -> Vec<JournalLine> {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.category == category)
            .cloned()
            .collect()
    }

    /// Last `n` messages of one category, oldest first.
    pub fn tail(&self, category: LogCategory, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let mut tail: Vec<String> = lines
            .iter()
            .rev()
            .filter(|l| l.category == category)
            .take(n)
            .map(|l| l.message.clone())
            .collect();
        tail.reverse();
        tail
    }

    /// Drops every line of one category ("clear log" button).
    pub fn clear(&self, category: LogCategory) {
        self.lines.lock().retain(|l| l.category != category);
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}
