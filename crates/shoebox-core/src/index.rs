use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{IngestError, Result};
use crate::metadata::MetadataRecord;
use crate::scan;
use crate::sidecar;
use crate::ThrottledProgress;

/// One already-archived file, plus its parsed sidecar when present.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub metadata: Option<MetadataRecord>,
}

/// Snapshot of the archive keyed by content hash. Built once per session
/// and read-only afterward; concurrent external writers are unsupported.
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    entries: HashMap<String, ArchiveEntry>,
    pub warnings: Vec<String>,
}

impl ArchiveIndex {
    /// Walk the archive once, hashing every media file and pairing it with
    /// its co-located sidecar. A missing root yields an empty index; an
    /// existing but unreadable root is fatal.
    pub fn build(root: &Path, progress: &ThrottledProgress) -> Result<Self> {
        if !root.exists() {
            return Ok(Self::default());
        }
        std::fs::read_dir(root).map_err(|e| IngestError::ArchiveUnreadable {
            path: root.to_path_buf(),
            source: e,
        })?;

        let mut warnings = Vec::new();
        let paths = scan::collect_media_paths(root, &mut warnings);
        let total = paths.len() as u64;

        let mut entries = HashMap::new();
        for (i, path) in paths.into_iter().enumerate() {
            progress.report("index", i as u64, total, "Indexing archive");

            let hash = match scan::hash_file(&path) {
                Ok(h) => h,
                Err(e) => {
                    let msg = format!("archive file skipped {}: {e}", path.display());
                    warn!("{msg}");
                    warnings.push(msg);
                    continue;
                }
            };

            let sidecar_file = sidecar::sidecar_path(&path);
            let metadata = if sidecar_file.is_file() {
                match sidecar::read_sidecar(&sidecar_file) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        let msg =
                            format!("unreadable sidecar {}: {e}", sidecar_file.display());
                        warn!("{msg}");
                        warnings.push(msg);
                        None
                    }
                }
            } else {
                None
            };

            // First occurrence wins; the archive should not contain
            // duplicates in the first place.
            entries
                .entry(hash)
                .or_insert(ArchiveEntry { path, metadata });
        }

        progress.report("index", total, total, "Archive index complete");
        Ok(Self { entries, warnings })
    }

    pub fn get(&self, hash: &str) -> Option<&ArchiveEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
