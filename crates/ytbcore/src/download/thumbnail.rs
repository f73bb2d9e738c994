//! Cover image handling inside a task folder

use std::path::{Path, PathBuf};

use crate::core::config;
use crate::core::error::{AppError, AppResult};

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Picks the converted thumbnail: the `.jpg` named after the title, else the first `.jpg`.
///
/// An existing `cover.jpg` is never picked as the source.
pub fn pick_thumbnail(folder: &Path, raw_title: &str) -> AppResult<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, &["jpg"]))
        .filter(|p| p.file_name().and_then(|n| n.to_str()) != Some(config::download::COVER_FILE))
        .collect();
    candidates.sort();

    let by_title = candidates.iter().find(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(raw_title))
            .unwrap_or(false)
    });

    by_title
        .or_else(|| candidates.first())
        .cloned()
        .ok_or_else(|| AppError::MissingOutput(folder.join("*.jpg")))
}

/// Renames the picked thumbnail to `cover.jpg`, replacing an older cover.
pub fn install_cover(folder: &Path, raw_title: &str) -> AppResult<PathBuf> {
    let src = pick_thumbnail(folder, raw_title)?;
    let dst = folder.join(config::download::COVER_FILE);
    if dst.exists() {
        if let Err(e) = std::fs::remove_file(&dst) {
            log::debug!("Could not remove old cover {}: {}", dst.display(), e);
        }
    }
    std::fs::rename(&src, &dst).map_err(|source| AppError::Rename {
        from: src.clone(),
        to: dst.clone(),
        source,
    })?;
    Ok(dst)
}

/// Cover for an upload: first `.jpg`/`.jpeg` next to the video, else first `.png`.
pub fn find_cover_near(video: &Path) -> Option<PathBuf> {
    let dir = video.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    files
        .iter()
        .find(|p| has_extension(p, &["jpg", "jpeg"]))
        .or_else(|| files.iter().find(|p| has_extension(p, &["png"])))
        .cloned()
}

/// Removes `source.*` files left over from an earlier attempt.
pub fn clear_leftover_sources(folder: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(folder) else {
        return 0;
    };
    let prefix = format!("{}.", config::download::SOURCE_STEM);
    let mut removed = 0;
    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        let is_leftover = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(&prefix))
            .unwrap_or(false);
        if is_leftover && path.is_file() {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Could not remove leftover {}: {}", path.display(), e),
            }
        }
    }
    removed
}

/// The merged file yt-dlp produced, if any.
pub fn find_source(folder: &Path) -> Option<PathBuf> {
    config::download::SOURCE_EXTENSIONS
        .iter()
        .map(|ext| folder.join(format!("{}.{}", config::download::SOURCE_STEM, ext)))
        .find(|p| p.is_file())
}
