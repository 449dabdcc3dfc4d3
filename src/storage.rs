//! Output directory and file naming for saved photos

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use log::{info, warn};

use crate::constants::{FILE_NAME_FORMAT, PHOTO_EXTENSION};

/// Pick the directory photos are written to.
///
/// Prefers `<external_media>/<app_name>`, creating it when missing. Falls back
/// to `fallback` when there is no external media dir or the directory still
/// does not exist after the create attempt. Never fails.
pub fn resolve_output_directory(
    external_media: Option<&Path>,
    app_name: &str,
    fallback: &Path,
) -> PathBuf {
    if let Some(media_dir) = external_media {
        let dir = media_dir.join(app_name);
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!("create {} failed: {err}", dir.display());
        }
        if dir.is_dir() {
            info!("photo directory: {}", dir.display());
            return dir;
        }
    }
    info!("photo directory (fallback): {}", fallback.display());
    fallback.to_path_buf()
}

/// `yyyy-MM-dd-HH-mm-ss-SSS.jpg` for the given instant.
pub fn photo_file_name<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}.{PHOTO_EXTENSION}", timestamp.format(FILE_NAME_FORMAT))
}

/// `file://` reference shown to the user after a save.
pub fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn file_name_uses_millisecond_pattern() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 7)
            .and_then(|d| d.and_hms_milli_opt(9, 5, 2, 41))
            .unwrap()
            .and_utc();
        assert_eq!(photo_file_name(&ts), "2024-03-07-09-05-02-041.jpg");
    }

    #[test]
    fn file_name_matches_pattern_for_now() {
        let name = photo_file_name(&Utc::now());
        let (stem, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "jpg");
        let parts: Vec<&str> = stem.split('-').collect();
        assert_eq!(parts.len(), 7);
        let widths = [4, 2, 2, 2, 2, 2, 3];
        for (part, width) in parts.iter().zip(widths) {
            assert_eq!(part.len(), width, "{stem}");
            assert!(part.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn prefers_external_media_and_creates_it() {
        let media = tempfile::tempdir().unwrap();
        let files = tempfile::tempdir().unwrap();
        let dir = resolve_output_directory(Some(media.path()), "Cam", files.path());
        assert_eq!(dir, media.path().join("Cam"));
        assert!(dir.is_dir());
    }

    #[test]
    fn falls_back_without_external_media() {
        let files = tempfile::tempdir().unwrap();
        let dir = resolve_output_directory(None, "Cam", files.path());
        assert_eq!(dir, files.path());
    }

    #[test]
    fn falls_back_when_media_dir_cannot_be_created() {
        let scratch = tempfile::tempdir().unwrap();
        // a regular file where the media dir should be
        let blocker = scratch.path().join("media");
        std::fs::write(&blocker, b"x").unwrap();
        let files = scratch.path().join("files");
        let dir = resolve_output_directory(Some(&blocker), "Cam", &files);
        assert_eq!(dir, files);
    }

    #[test]
    fn uri_has_file_scheme() {
        assert_eq!(file_uri(Path::new("/a/b.jpg")), "file:///a/b.jpg");
    }
}
