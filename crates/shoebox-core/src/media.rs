use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Photo container formats recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoFormat {
    Jpeg,
    Png,
    Gif,
    Tiff,
    Heic,
    WebP,
    Dng,
}

/// Video container formats recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    Mp4,
    Mov,
    M4v,
    Avi,
    Mts,
    Mkv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo(PhotoFormat),
    Video(VideoFormat),
}

impl MediaKind {
    pub fn is_photo(&self) -> bool {
        matches!(self, MediaKind::Photo(_))
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Video(_))
    }
}

/// One source file. Immutable once hashed; batch and destination names are
/// assigned later by the batcher and the path planner.
#[derive(Debug, Clone)]
pub struct MediaItem {
    /// Absolute source path
    pub path: PathBuf,
    /// SHA-256 of the full byte content, lowercase hex
    pub hash: String,
    /// File size in bytes
    pub size: u64,
    pub kind: MediaKind,
    /// Capture timestamp: embedded metadata, else fs mtime, else absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl MediaItem {
    /// Original extension with its case preserved ("JPG" stays "JPG").
    pub fn extension(&self) -> &str {
        self.path.extension().and_then(|e| e.to_str()).unwrap_or("")
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Classify a path by extension, case-insensitive. None means not media.
pub fn detect_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let kind = match ext.as_str() {
        "jpg" | "jpeg" => MediaKind::Photo(PhotoFormat::Jpeg),
        "png" => MediaKind::Photo(PhotoFormat::Png),
        "gif" => MediaKind::Photo(PhotoFormat::Gif),
        "tif" | "tiff" => MediaKind::Photo(PhotoFormat::Tiff),
        "heic" | "heif" => MediaKind::Photo(PhotoFormat::Heic),
        "webp" => MediaKind::Photo(PhotoFormat::WebP),
        "dng" => MediaKind::Photo(PhotoFormat::Dng),
        "mp4" => MediaKind::Video(VideoFormat::Mp4),
        "mov" => MediaKind::Video(VideoFormat::Mov),
        "m4v" => MediaKind::Video(VideoFormat::M4v),
        "avi" => MediaKind::Video(VideoFormat::Avi),
        "mts" => MediaKind::Video(VideoFormat::Mts),
        "mkv" => MediaKind::Video(VideoFormat::Mkv),
        _ => return None,
    };
    Some(kind)
}
