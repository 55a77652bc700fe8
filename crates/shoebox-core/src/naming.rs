use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::media::MediaItem;

/// Archive-relative YYYY/MM/DD folder for a capture date.
pub fn folder_for(timestamp: DateTime<Utc>) -> PathBuf {
    PathBuf::from(format!(
        "{:04}/{:02}/{:02}",
        timestamp.year(),
        timestamp.month(),
        timestamp.day()
    ))
}

/// `YYYYMMDD-HHMMSS-<batch>.<ext>`, original extension case preserved.
pub fn filename_for(timestamp: DateTime<Utc>, batch_name: &str, extension: &str) -> String {
    format!(
        "{:04}{:02}{:02}-{:02}{:02}{:02}-{}.{}",
        timestamp.year(),
        timestamp.month(),
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second(),
        batch_name,
        extension
    )
}

/// Folder for items that carry no timestamp at all.
pub const UNDATED_FOLDER: &str = "undated";

/// Assigns unique archive-relative destinations within one run.
///
/// Collisions are keyed on the generated stem (not the full filename), so
/// the one-sidecar-per-file invariant holds even when a photo and a video
/// land on the same second. A collision gets a zero-padded `-NN` suffix,
/// deterministic from planning order.
#[derive(Default)]
pub struct PathPlanner {
    used_stems: HashSet<PathBuf>,
    counters: HashMap<PathBuf, u32>,
}

impl PathPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, item: &MediaItem, batch_name: &str) -> PathBuf {
        let (folder, stem) = match item.timestamp {
            Some(ts) => {
                let name = filename_for(ts, batch_name, item.extension());
                let stem = Path::new(&name)
                    .file_stem()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(&name));
                (folder_for(ts), stem)
            }
            None => {
                // Content-derived stem: deterministic and unique per hash.
                let prefix = &item.hash[..8.min(item.hash.len())];
                (
                    PathBuf::from(UNDATED_FOLDER),
                    PathBuf::from(format!("{batch_name}-{prefix}")),
                )
            }
        };

        let base = folder.join(&stem);
        let stem_key = if self.used_stems.contains(&base) {
            let counter = self.counters.entry(base.clone()).or_insert(0);
            loop {
                *counter += 1;
                let candidate = folder.join(format!("{}-{:02}", stem.display(), counter));
                if !self.used_stems.contains(&candidate) {
                    break candidate;
                }
            }
        } else {
            base
        };

        self.used_stems.insert(stem_key.clone());

        let ext = item.extension();
        if ext.is_empty() {
            stem_key
        } else {
            stem_key.with_extension(ext)
        }
    }
}
