//! YTB Downloader - download, remux and upload live sets
//!
//! This library drives three external tools: yt-dlp for downloads, ffmpeg
//! for PCM remuxing and equalization, and biliup for Bilibili uploads.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, process control, settings, setup
//! - `download`: the single-flight download queue and its yt-dlp pipeline
//! - `media`: ffmpeg remux and the nine-band equalizer
//! - `upload`: biliup uploads and account lookup

pub mod core;
pub mod download;
pub mod media;
pub mod upload;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult, Journal, LogCategory};
pub use download::{spawn_queue, DownloadPipeline, QueueHandle};
