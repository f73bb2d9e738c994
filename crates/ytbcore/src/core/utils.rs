/// Provisional display key for a locator: the last path segment before any query.
///
/// `https://www.youtube.com/watch?v=abc` yields `watch`, `https://youtu.be/abc?t=3`
/// yields `abc`. A locator ending in `/` has no last segment, so the whole
/// locator is used instead.
///
/// # Example
///
/// ```
/// use ytbcore::core::utils::derive_display_key;
///
/// assert_eq!(derive_display_key("https://youtu.be/abc?t=3"), "abc");
/// ```
pub fn derive_display_key(locator: &str) -> String {
    let without_query = locator.split('?').next().unwrap_or(locator);
    match without_query.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => segment.to_string(),
        _ => locator.trim().to_string(),
    }
}

/// Makes a video title safe to use as a folder and file name.
///
/// Each of `< > : " / \ | ? *` becomes `-`; everything else is kept. An empty
/// (or whitespace-only) title becomes `unnamed` so it never collapses into the
/// save directory itself.
pub fn sanitize_title(title: &str) -> String {
    let sanitized: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '-',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

/// Strips leading zeros from each numeric component: `2024.03.01` → `2024.3.1`.
///
/// Non-numeric components are kept verbatim.
pub fn normalize_version(version: &str) -> String {
    version
        .trim()
        .split('.')
        .map(|part| match part.parse::<u64>() {
            Ok(n) => n.to_string(),
            Err(_) => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Formats a byte count as MB with one decimal, for progress lines.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}
