//! Classification of yt-dlp failures
//!
//! Turns the stderr of a failed yt-dlp run into an error type, a short message
//! for the download log and a fix recommendation.

/// Kinds of yt-dlp failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YtDlpErrorType {
    /// Cookies are invalid or were rotated
    InvalidCookies,
    /// YouTube flagged the request as automated
    BotDetection,
    /// Video is private, removed or region locked
    VideoUnavailable,
    /// Timeouts, resets, DNS
    NetworkError,
    /// The requested format id does not exist for this video
    FormatUnavailable,
    Unknown,
}

/// Analyzes yt-dlp stderr and determines the error type
pub fn analyze_ytdlp_error(stderr: &str) -> YtDlpErrorType {
    let stderr_lower = stderr.to_lowercase();

    if stderr_lower.contains("cookies are no longer valid")
        || stderr_lower.contains("cookies have likely been rotated")
        || stderr_lower.contains("sign in to confirm you're not a bot")
        || stderr_lower.contains("sign in to confirm your age")
        || stderr_lower.contains("please sign in")
        || stderr_lower.contains("use --cookies for the authentication")
        || stderr_lower.contains("login_required")
    {
        return YtDlpErrorType::InvalidCookies;
    }

    if stderr_lower.contains("requested format is not available") {
        return YtDlpErrorType::FormatUnavailable;
    }

    if stderr_lower.contains("bot detection")
        || stderr_lower.contains("http error 403")
        || stderr_lower.contains("unable to extract")
        || stderr_lower.contains("signature extraction failed")
    {
        return YtDlpErrorType::BotDetection;
    }

    if stderr_lower.contains("private video")
        || stderr_lower.contains("video unavailable")
        || stderr_lower.contains("this video is not available")
        || stderr_lower.contains("video is private")
        || stderr_lower.contains("video has been removed")
        || stderr_lower.contains("this video does not exist")
        || stderr_lower.contains("not made this video available in your country")
    {
        return YtDlpErrorType::VideoUnavailable;
    }

    if stderr_lower.contains("timed out")
        || stderr_lower.contains("timeout")
        || stderr_lower.contains("connection")
        || stderr_lower.contains("network")
        || stderr_lower.contains("socket")
        || stderr_lower.contains("getaddrinfo")
        || stderr_lower.contains("failed to connect")
    {
        return YtDlpErrorType::NetworkError;
    }

    YtDlpErrorType::Unknown
}

/// One-line message for the download log
pub fn get_error_message(error_type: YtDlpErrorType) -> &'static str {
    match error_type {
        YtDlpErrorType::InvalidCookies => "❌ YouTube wants a signed-in session, the cookies file was rejected",
        YtDlpErrorType::BotDetection => "❌ YouTube blocked the request",
        YtDlpErrorType::VideoUnavailable => "❌ Video unavailable (private, removed or region locked)",
        YtDlpErrorType::NetworkError => "❌ Network problem while downloading",
        YtDlpErrorType::FormatUnavailable => "❌ The selected format is not offered for this video",
        YtDlpErrorType::Unknown => "❌ Download failed",
    }
}

/// Whether this failure means the current cookies should no longer be used
pub fn invalidates_cookies(error_type: YtDlpErrorType) -> bool {
    matches!(error_type, YtDlpErrorType::InvalidCookies)
}

/// Fix recommendations logged after a failure
pub fn get_fix_recommendations(error_type: YtDlpErrorType) -> &'static str {
    match error_type {
        YtDlpErrorType::InvalidCookies => {
            "🔧 Export fresh cookies from a browser signed in to youtube.com \
             (Netscape cookie file), then run: ytb cookies set <PATH>"
        }
        YtDlpErrorType::BotDetection => {
            "🔧 Refresh the cookies file and update yt-dlp with: ytb update"
        }
        YtDlpErrorType::VideoUnavailable => "ℹ️  Nothing to fix on this side",
        YtDlpErrorType::NetworkError => "🔧 Check the connection to youtube.com and retry the entry",
        YtDlpErrorType::FormatUnavailable => "🔧 List the formats again with: ytb formats <URL>",
        YtDlpErrorType::Unknown => "🔧 Check the yt-dlp output above and make sure yt-dlp is up to date",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_invalid_cookies() {
        let stderr = "ERROR: [youtube] abc: Sign in to confirm you're not a bot. Use --cookies-from-browser";
        assert_eq!(analyze_ytdlp_error(stderr), YtDlpErrorType::InvalidCookies);
        assert!(invalidates_cookies(YtDlpErrorType::InvalidCookies));
    }

    #[test]
    fn test_analyze_bot_detection() {
        assert_eq!(
            analyze_ytdlp_error("ERROR: unable to download video data: HTTP Error 403: Forbidden"),
            YtDlpErrorType::BotDetection
        );
    }

    #[test]
    fn test_analyze_unavailable() {
        assert_eq!(
            analyze_ytdlp_error("ERROR: [youtube] xyz: Private video. Sign in if you've been granted access"),
            YtDlpErrorType::VideoUnavailable
        );
    }

    #[test]
    fn test_analyze_format() {
        assert_eq!(
            analyze_ytdlp_error("ERROR: [youtube] xyz: Requested format is not available. Use --list-formats"),
            YtDlpErrorType::FormatUnavailable
        );
    }

    #[test]
    fn test_analyze_network_and_unknown() {
        assert_eq!(
            analyze_ytdlp_error("ERROR: Unable to download webpage: The read operation timed out"),
            YtDlpErrorType::NetworkError
        );
        assert_eq!(analyze_ytdlp_error("something odd"), YtDlpErrorType::Unknown);
        assert!(!invalidates_cookies(YtDlpErrorType::Unknown));
    }
}
