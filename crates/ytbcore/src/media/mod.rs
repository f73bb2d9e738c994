//! Audio processing with ffmpeg

pub mod equalizer;
pub mod ffmpeg;

pub use equalizer::{Band, EqSettings, MediaKind};
pub use ffmpeg::Ffmpeg;
