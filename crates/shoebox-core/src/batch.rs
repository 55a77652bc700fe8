use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::error::{IngestError, Result};
use crate::media::MediaItem;

/// An ordered, time-contiguous cluster of media items, presumed to
/// originate from one event. Consumed once naming completes; never
/// persisted.
#[derive(Debug, Clone)]
pub struct TemporalBatch {
    /// First member timestamp; None only for the undated batch.
    pub start_time: Option<DateTime<Utc>>,
    /// Last member timestamp; None only for the undated batch.
    pub end_time: Option<DateTime<Utc>>,
    pub items: Vec<MediaItem>,
}

impl TemporalBatch {
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size).sum()
    }

    pub fn photo_count(&self) -> usize {
        self.items.iter().filter(|i| i.kind.is_photo()).count()
    }

    pub fn video_count(&self) -> usize {
        self.items.iter().filter(|i| i.kind.is_video()).count()
    }

    /// Whether this is the partition of items that carry no timestamp.
    pub fn is_undated(&self) -> bool {
        self.start_time.is_none()
    }
}

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+$").unwrap());

/// A batch name is non-empty, restricted to `[a-z0-9_-]`, and contains at
/// least one letter or digit.
pub fn validate_batch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(IngestError::InvalidBatchName("name is empty".to_string()));
    }

    if !NAME_RE.is_match(name) {
        return Err(IngestError::InvalidBatchName(format!(
            "'{name}' may only contain lowercase letters, digits, '-' and '_'"
        )));
    }

    if !name.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(IngestError::InvalidBatchName(format!(
            "'{name}' needs at least one letter or digit"
        )));
    }

    Ok(())
}

/// Group items into batches by time-gap proximity.
///
/// Items are sorted by timestamp ascending; a gap of `gap_threshold` or
/// more between consecutive items closes the current batch. Items without
/// any timestamp are partitioned into one trailing undated batch, so batch
/// membership never depends on when the tool is invoked.
pub fn group_by_time_gap(items: &[MediaItem], gap_threshold: Duration) -> Vec<TemporalBatch> {
    let mut timed: Vec<MediaItem> = items
        .iter()
        .filter(|i| i.timestamp.is_some())
        .cloned()
        .collect();
    timed.sort_by_key(|i| i.timestamp);

    let mut batches: Vec<TemporalBatch> = Vec::new();
    let mut current: Vec<MediaItem> = Vec::new();

    for item in timed {
        if let Some(last) = current.last() {
            let gap = item.timestamp.unwrap() - last.timestamp.unwrap();
            if gap >= gap_threshold {
                batches.push(close_batch(std::mem::take(&mut current)));
            }
        }
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(close_batch(current));
    }

    let undated: Vec<MediaItem> = items
        .iter()
        .filter(|i| i.timestamp.is_none())
        .cloned()
        .collect();
    if !undated.is_empty() {
        batches.push(TemporalBatch {
            start_time: None,
            end_time: None,
            items: undated,
        });
    }

    batches
}

fn close_batch(items: Vec<MediaItem>) -> TemporalBatch {
    TemporalBatch {
        start_time: items.first().and_then(|i| i.timestamp),
        end_time: items.last().and_then(|i| i.timestamp),
        items,
    }
}

/// Single-name mode: batching is bypassed and every item forms one
/// conceptual batch under the supplied name.
pub fn single_batch(items: &[MediaItem]) -> TemporalBatch {
    let mut timestamps: Vec<DateTime<Utc>> = items.iter().filter_map(|i| i.timestamp).collect();
    timestamps.sort();

    TemporalBatch {
        start_time: timestamps.first().copied(),
        end_time: timestamps.last().copied(),
        items: items.to_vec(),
    }
}
