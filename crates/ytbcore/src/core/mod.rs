//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod journal;
pub mod logging;
pub mod process;
pub mod settings;
pub mod setup;
pub mod utils;

// Re-exports for convenience
pub use error::{AppError, AppResult};
pub use journal::{Journal, LogCategory, SharedJournal};
pub use logging::{init_logger, log_tools_configuration};
