//! yt-dlp `[download]` progress lines

/// Percentage and remaining time of a running download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub percent: u8,
    pub eta_secs: Option<u64>,
}

impl DownloadProgress {
    pub fn new(percent: u8) -> Self {
        Self {
            percent: percent.min(100),
            eta_secs: None,
        }
    }

    pub fn with_eta(mut self, eta_secs: u64) -> Self {
        self.eta_secs = Some(eta_secs);
        self
    }

    /// `45%`, or `45% (00:10 left)` when yt-dlp reported an ETA.
    pub fn label(&self) -> String {
        match self.eta_secs {
            Some(secs) if secs >= 3600 => format!(
                "{}% ({}:{:02}:{:02} left)",
                self.percent,
                secs / 3600,
                secs % 3600 / 60,
                secs % 60
            ),
            Some(secs) => format!("{}% ({:02}:{:02} left)", self.percent, secs / 60, secs % 60),
            None => format!("{}%", self.percent),
        }
    }
}

/// Reads `[download]  45.2% of 10.00MiB at 500.00KiB/s ETA 00:10`.
///
/// Only the percentage right after the tag counts; `Destination:` and other
/// `[download]` lines yield `None`.
pub fn parse_progress(line: &str) -> Option<DownloadProgress> {
    let rest = line.trim_start().strip_prefix("[download]")?;
    let mut words = rest.split_whitespace();

    let percent: f32 = words.next()?.strip_suffix('%')?.parse().ok()?;
    if !percent.is_finite() {
        return None;
    }
    let progress = DownloadProgress::new(percent.clamp(0.0, 100.0) as u8);

    let eta = words.skip_while(|w| *w != "ETA").nth(1).and_then(parse_clock);
    Some(match eta {
        Some(secs) => progress.with_eta(secs),
        None => progress,
    })
}

/// `MM:SS` or `HH:MM:SS` in seconds.
fn parse_clock(text: &str) -> Option<u64> {
    let fields: Vec<u64> = text.split(':').map(|f| f.parse().ok()).collect::<Option<_>>()?;
    if !(2..=3).contains(&fields.len()) {
        return None;
    }
    Some(fields.iter().fold(0, |acc, f| acc * 60 + f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_percent_and_eta() {
        assert_eq!(
            parse_progress("[download]  45.2% of 10.00MiB at 500.00KiB/s ETA 00:10"),
            Some(DownloadProgress::new(45).with_eta(10))
        );
        assert_eq!(
            parse_progress("[download]   3.0% of ~ 1.20GiB at 2.00MiB/s ETA 1:02:03 (frag 3/100)"),
            Some(DownloadProgress::new(3).with_eta(3723))
        );
    }

    #[test]
    fn test_finished_and_unknown_eta() {
        assert_eq!(
            parse_progress("[download] 100% of 3.51MiB in 00:00:02 at 1.60MiB/s"),
            Some(DownloadProgress::new(100))
        );
        assert_eq!(
            parse_progress("[download]  12.0% of 50.00MiB at Unknown speed ETA Unknown"),
            Some(DownloadProgress::new(12))
        );
    }

    #[test]
    fn test_other_lines_are_ignored() {
        assert_eq!(parse_progress("[download] Destination: /tmp/source.mp4"), None);
        assert_eq!(parse_progress("[youtube] abc: Downloading webpage"), None);
        assert_eq!(parse_progress("[Merger] Merging formats into \"source.mp4\""), None);
        assert_eq!(parse_progress("[download] n/a% of 1.00MiB"), None);
    }

    #[test]
    fn test_label() {
        assert_eq!(DownloadProgress::new(45).label(), "45%");
        assert_eq!(DownloadProgress::new(45).with_eta(70).label(), "45% (01:10 left)");
        assert_eq!(DownloadProgress::new(3).with_eta(3723).label(), "3% (1:02:03 left)");
    }
}
