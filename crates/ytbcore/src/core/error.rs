use std::path::PathBuf;

use thiserror::Error;

/// Centralized error types for the library
///
/// Every fallible operation in `ytbcore` returns this enum. A cancelled task
/// is reported as an outcome, never as an error.
///
/// # Example
///
/// ```no_run
/// use ytbcore::core::error::AppError;
///
/// fn report(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings / status file (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP/Fetch errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP status code errors
    #[error("HTTP request failed with status: {0}")]
    HttpStatus(reqwest::StatusCode),

    /// Archive extraction errors
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// External binary could not be started (not installed / not on PATH)
    #[error("{tool} not found, install it or point the matching *_BIN variable at it")]
    ToolMissing { tool: String },

    /// External binary ran but exited unsuccessfully
    #[error("{tool} exited with {}: {output}", .code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        output: String,
    },

    /// External binary reported success but the expected file is absent
    #[error("Expected output is missing: {}", .0.display())]
    MissingOutput(PathBuf),

    /// Final rename of a produced file failed
    #[error("Failed to rename {} to {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External binary did not finish in time
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Builds a `ToolFailed` from a finished process output, preferring stderr.
    pub fn tool_failed(tool: &str, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        AppError::ToolFailed {
            tool: tool.to_string(),
            code: output.status.code(),
            output: text,
        }
    }

    /// Maps a spawn error: `NotFound` means the binary is missing.
    pub fn spawn(tool: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            AppError::ToolMissing { tool: tool.to_string() }
        } else {
            AppError::Io(err)
        }
    }

    /// True for errors raised by an external tool rather than by us.
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            AppError::ToolMissing { .. } | AppError::ToolFailed { .. } | AppError::Timeout { .. }
        )
    }
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Validation(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Validation(err.to_string())
    }
}
