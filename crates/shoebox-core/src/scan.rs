use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{IngestError, Result};
use crate::media::{detect_kind, MediaItem};
use crate::metadata;
use crate::ThrottledProgress;

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Scanner output: the items found plus per-item warnings for files that
/// had to be skipped or degraded. Warnings never abort the scan.
pub struct ScanOutcome {
    pub items: Vec<MediaItem>,
    pub warnings: Vec<String>,
}

/// Streaming SHA-256 over the full file content. Holds one buffer in
/// memory regardless of file size.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Walk a source root and produce MediaItems for every media file in it.
///
/// Non-media extensions are skipped silently; unreadable files are skipped
/// with a warning. Timestamp resolution: embedded capture metadata, then
/// (opt-in) filename patterns, then fs mtime, then absent.
pub fn scan_source(
    root: &Path,
    guess_dates: bool,
    progress: &ThrottledProgress,
) -> Result<ScanOutcome> {
    std::fs::read_dir(root).map_err(|e| IngestError::SourceUnreadable {
        path: root.to_path_buf(),
        source: e,
    })?;

    let mut warnings = Vec::new();
    let paths = collect_media_paths(root, &mut warnings);

    let mut items = Vec::with_capacity(paths.len());
    let total = paths.len() as u64;

    for (i, path) in paths.into_iter().enumerate() {
        progress.report("scan", i as u64, total, "Hashing source files");

        let Some(kind) = detect_kind(&path) else {
            continue;
        };

        let size = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) => {
                skip_warn(&mut warnings, &path, &e);
                continue;
            }
        };

        let hash = match hash_file(&path) {
            Ok(h) => h,
            Err(e) => {
                skip_warn(&mut warnings, &path, &e);
                continue;
            }
        };

        let timestamp = resolve_timestamp(&path, guess_dates);

        items.push(MediaItem {
            path,
            hash,
            size,
            kind,
            timestamp,
        });
    }

    progress.report("scan", total, total, "Source scan complete");
    Ok(ScanOutcome { items, warnings })
}

/// Collect media file paths under a root, depth-first. Unreadable entries
/// are recorded and skipped.
pub fn collect_media_paths(root: &Path, warnings: &mut Vec<String>) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let msg = format!("skipped unreadable entry: {e}");
                warn!("{msg}");
                warnings.push(msg);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if detect_kind(&path).is_some() {
            paths.push(path);
        }
    }

    // Walk order is platform-dependent; sort for stable batch assignment.
    paths.sort();
    paths
}

fn skip_warn(warnings: &mut Vec<String>, path: &Path, err: &std::io::Error) {
    let msg = format!("skipped {}: {err}", path.display());
    warn!("{msg}");
    warnings.push(msg);
}

/// Embedded capture metadata first, filename patterns when enabled, fs
/// mtime last. Extraction failures downgrade to the next source rather
/// than failing the scan.
fn resolve_timestamp(path: &Path, guess_dates: bool) -> Option<DateTime<Utc>> {
    if metadata::has_exif_container(path) {
        if let Some(ts) = metadata::exif_capture_time(path) {
            return Some(ts);
        }
    }

    if guess_dates {
        if let Some(ts) = guess_date_from_filename(path) {
            return Some(ts);
        }
    }

    modified_time(path)
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.into())
}

static FILENAME_DATE_RES: LazyLock<[(Regex, &'static str); 3]> = LazyLock::new(|| {
    [
        (
            Regex::new(r"(?P<date>(20|19)\d{2}(0[1-9]|1[0-2])[0-3]\d-\d{6})").unwrap(),
            "%Y%m%d-%H%M%S",
        ),
        (
            Regex::new(r"(?P<date>(20|19)\d{2}(0[1-9]|1[0-2])[0-3]\d_\d{6})").unwrap(),
            "%Y%m%d_%H%M%S",
        ),
        (
            Regex::new(r"(?P<date>(20|19)\d{2}-(0[1-9]|1[0-2])-[0-3]\d-\d{2}-\d{2}-\d{2})").unwrap(),
            "%Y-%m-%d-%H-%M-%S",
        ),
    ]
});

/// Camera-style date stamps embedded in filenames, e.g.
/// "IMG_20190509_154733.jpg" or "signal-2020-10-26-16-38-32.jpg".
fn guess_date_from_filename(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;

    for (re, fmt) in FILENAME_DATE_RES.iter() {
        if let Some(caps) = re.captures(name) {
            if let Some(m) = caps.name("date") {
                if let Ok(dt) = NaiveDateTime::parse_from_str(m.as_str(), fmt) {
                    return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
                }
            }
        }
    }

    None
}
