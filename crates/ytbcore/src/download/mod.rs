//! Download queue and the yt-dlp pipeline behind it

pub mod controller;
pub mod cookies;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod thumbnail;
pub mod ytdlp;
pub mod ytdlp_errors;

// Re-exports for convenience
pub use controller::{spawn_queue, QueueHandle, TaskReporter, TaskRunner, TitleResolver};
pub use cookies::CookieGate;
pub use pipeline::DownloadPipeline;
pub use queue::{CancelOutcome, EntryId, EntryRef, EntryStatus, QueueController, QueueSnapshot};
pub use ytdlp::{YtDlp, YtDlpTitleResolver};
