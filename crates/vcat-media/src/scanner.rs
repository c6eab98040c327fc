//! Recursive discovery of video files.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use vcat_models::FileDescriptor;

use crate::error::{MediaError, MediaResult};

/// Video file extensions we catalog (matched case-insensitively).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "3gp"];

/// Check whether a path has a cataloged video extension.
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Walk `root` recursively and describe every regular video file found.
///
/// The walk runs on the blocking pool. Entries that cannot be read are logged
/// and skipped; only an unreadable root fails the scan. The order of the
/// result is unspecified.
pub async fn scan_directory(root: impl AsRef<Path>) -> MediaResult<Vec<FileDescriptor>> {
    let root = root.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || scan_blocking(&root))
        .await
        .map_err(|e| MediaError::internal(format!("scan task failed: {}", e)))?
}

fn scan_blocking(root: &Path) -> MediaResult<Vec<FileDescriptor>> {
    let root = absolute_root(root)?;
    let root_meta = std::fs::metadata(&root).map_err(|e| MediaError::scan_failed(&root, e.to_string()))?;
    if !root_meta.is_dir() {
        return Err(MediaError::scan_failed(&root, "not a directory"));
    }

    info!(directory = %root.display(), "Starting directory scan");

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_video_file(entry.path()) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) => match describe_file(entry.path(), &meta) {
                Some(file) => {
                    debug!(path = %file.original_path, size = file.file_size, "Found video file");
                    files.push(file);
                }
                None => warn!(path = %entry.path().display(), "Skipping file without modification time"),
            },
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping file with unreadable metadata");
            }
        }
    }

    info!(directory = %root.display(), count = files.len(), "Directory scan complete");
    Ok(files)
}

/// Make the root absolute without resolving symlinks, so catalog paths keep
/// the configured prefix.
fn absolute_root(root: &Path) -> MediaResult<PathBuf> {
    std::path::absolute(root).map_err(|e| MediaError::scan_failed(root, e.to_string()))
}

fn describe_file(path: &Path, meta: &Metadata) -> Option<FileDescriptor> {
    let modified: DateTime<Utc> = meta.modified().ok()?.into();
    Some(FileDescriptor {
        original_path: path.to_string_lossy().to_string(),
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        file_type: path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default(),
        file_size: meta.len(),
        file_date_time: modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn sized_file(path: &Path, len: u64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap().set_len(len).unwrap();
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/videos/a.mp4")));
        assert!(is_video_file(Path::new("/videos/B.MKV")));
        assert!(is_video_file(Path::new("clip.3gp")));
        assert!(!is_video_file(Path::new("/videos/note.txt")));
        assert!(!is_video_file(Path::new("/videos/mp4")));
        assert!(!is_video_file(Path::new("/videos/a.mp4.part")));
    }

    #[tokio::test]
    async fn test_scan_filters_and_recurses() {
        let dir = TempDir::new().unwrap();
        sized_file(&dir.path().join("a.mp4"), 5 * 1024 * 1024);
        sized_file(&dir.path().join("sub").join("b.mkv"), 2 * 1024 * 1024);
        sized_file(&dir.path().join("note.txt"), 10);

        let files = scan_directory(dir.path()).await.unwrap();
        assert_eq!(files.len(), 2);

        let a = files.iter().find(|f| f.filename == "a.mp4").expect("a.mp4 cataloged");
        assert_eq!(a.file_size, 5 * 1024 * 1024);
        assert_eq!(a.file_type, "mp4");
        assert!(Path::new(&a.original_path).is_absolute());

        let b = files.iter().find(|f| f.filename == "b.mkv").expect("sub/b.mkv cataloged");
        assert_eq!(b.file_size, 2 * 1024 * 1024);
        assert!(b.original_path.ends_with("sub/b.mkv"));

        assert!(files.iter().all(|f| f.filename != "note.txt"));
    }

    #[tokio::test]
    async fn test_scan_matches_extensions_case_insensitively() {
        let dir = TempDir::new().unwrap();
        sized_file(&dir.path().join("UPPER.MOV"), 1);
        sized_file(&dir.path().join("deep").join("er").join("x.Avi"), 1);

        let files = scan_directory(dir.path()).await.unwrap();
        let names: BTreeSet<_> = files.iter().map(|f| f.filename.clone()).collect();
        assert_eq!(names, BTreeSet::from(["UPPER.MOV".to_string(), "x.Avi".to_string()]));
        assert!(files.iter().any(|f| f.file_type == "MOV"));
    }

    #[tokio::test]
    async fn test_rescan_yields_same_set() {
        let dir = TempDir::new().unwrap();
        sized_file(&dir.path().join("a.mp4"), 3);
        sized_file(&dir.path().join("sub").join("b.mkv"), 4);

        let first: BTreeSet<_> = scan_directory(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.original_path)
            .collect();
        let second: BTreeSet<_> = scan_directory(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.original_path)
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_directory_named_like_video_is_not_a_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("movie.mp4")).unwrap();
        sized_file(&dir.path().join("movie.mp4").join("inner.mkv"), 1);

        let files = scan_directory(dir.path()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "inner.mkv");
    }

    #[tokio::test]
    async fn test_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let result = scan_directory(dir.path().join("missing")).await;
        assert!(matches!(result, Err(MediaError::ScanFailed { .. })));
    }
}
