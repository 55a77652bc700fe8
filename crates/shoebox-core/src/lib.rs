pub mod batch;
pub mod error;
pub mod index;
pub mod media;
pub mod metadata;
pub mod naming;
pub mod scan;
pub mod sidecar;

use std::cell::Cell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use tracing::warn;

use crate::batch::TemporalBatch;
use crate::index::ArchiveIndex;
use crate::media::MediaItem;
use crate::metadata::MetadataRecord;

pub use crate::error::{IngestError, Result};

/// Engine configuration, supplied by the wrapping CLI or service.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub source: PathBuf,
    pub archive: PathBuf,
    /// Halt at the summarized preview with zero side effects.
    pub dry_run: bool,
    /// Maximum time between adjacent items in one batch.
    pub gap_threshold: Duration,
    /// Single-name mode: one name for the whole run, batching bypassed.
    pub batch_name: Option<String>,
    /// Skip the confirmation gate and accept metadata merges.
    pub auto_confirm: bool,
    /// Consult filename date patterns when embedded metadata is absent.
    pub guess_dates: bool,
}

impl IngestOptions {
    pub fn new(source: impl Into<PathBuf>, archive: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            archive: archive.into(),
            dry_run: false,
            gap_threshold: Duration::hours(2),
            batch_name: None,
            auto_confirm: false,
            guess_dates: false,
        }
    }
}

/// Type alias for progress callback: stage, current, total, message.
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str);

/// Throttled progress reporter - emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: Option<&'a ProgressCallback>,
    last_emit: Cell<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: Option<&'a ProgressCallback>) -> Self {
        Self {
            inner,
            last_emit: Cell::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let Some(inner) = self.inner else {
            return;
        };
        let is_done = current + 1 >= total;
        if !is_done {
            if self.last_emit.get().elapsed().as_millis() < 200 {
                return;
            }
            self.last_emit.set(Instant::now());
        }
        inner(stage, current, total, message);
    }
}

/// Cooperative cancellation flag. Checked between per-file operations, so
/// at most one file finishes its current step after the signal.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Session lifecycle. Advances strictly forward; the last four states are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Scanned,
    Grouped,
    Named,
    Summarized,
    AwaitingConfirmation,
    Copying,
    ExtractingMetadata,
    WritingSidecars,
    Verifying,
    Completed,
    Failed,
    Aborted,
    Cancelled,
}

/// Everything shown to a batch-name supplier for one batch.
pub struct BatchNameRequest<'a> {
    /// 1-based position of this batch in the run
    pub index: usize,
    pub total: usize,
    pub batch: &'a TemporalBatch,
    /// Why the previous answer was rejected, when re-asking
    pub rejected: Option<String>,
}

/// Operator interaction seam. Naming and confirmations are injected so the
/// engine runs headless in tests and services.
pub trait Prompter {
    fn name_batch(&mut self, request: &BatchNameRequest<'_>) -> Result<String>;
    /// Gate between the summarized preview and the first copy.
    fn confirm_ingest(&mut self, plan: &SessionPlan) -> Result<bool>;
    /// Duplicate whose metadata differs from the archive: replace the
    /// archived sidecar?
    fn confirm_merge(&mut self, source: &Path, existing: &Path) -> Result<bool>;
}

/// Headless supplier: numbered batch names, every confirmation accepted.
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn name_batch(&mut self, request: &BatchNameRequest<'_>) -> Result<String> {
        Ok(format!("batch-{}", request.index))
    }

    fn confirm_ingest(&mut self, _plan: &SessionPlan) -> Result<bool> {
        Ok(true)
    }

    fn confirm_merge(&mut self, _source: &Path, _existing: &Path) -> Result<bool> {
        Ok(true)
    }
}

/// Dry-run supplier: placeholder names, nothing is ever confirmed.
pub struct PlaceholderNames;

impl Prompter for PlaceholderNames {
    fn name_batch(&mut self, request: &BatchNameRequest<'_>) -> Result<String> {
        Ok(format!("batch-{}", request.index))
    }

    fn confirm_ingest(&mut self, _plan: &SessionPlan) -> Result<bool> {
        Ok(false)
    }

    fn confirm_merge(&mut self, _source: &Path, _existing: &Path) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    /// New content: copy to this archive-relative destination.
    Copy { dest_rel: PathBuf },
    /// Hash already archived (or planned earlier this run); nothing to do.
    SkipDuplicate { existing: PathBuf },
    /// Duplicate whose source metadata differs from the archived sidecar;
    /// on confirmation the record replaces the old sidecar wholesale.
    MergeMetadata {
        existing: PathBuf,
        record: MetadataRecord,
    },
}

#[derive(Debug, Clone)]
pub struct PlannedItem {
    pub item: MediaItem,
    pub batch_name: String,
    pub action: PlannedAction,
}

/// Dry-run-compatible preview of everything a session would do.
#[derive(Debug, Default)]
pub struct SessionPlan {
    pub items: Vec<PlannedItem>,
    pub new_files: u64,
    pub duplicates: u64,
    pub metadata_merges: u64,
    pub bytes_to_copy: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    Completed,
    Failed,
    Aborted,
    Cancelled,
}

/// Terminal summary of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub dry_run: bool,
    pub scanned: u64,
    pub copied: u64,
    pub skipped_duplicates: u64,
    pub metadata_merged: u64,
    pub errored: u64,
    pub bytes_copied: u64,
    pub verified: u64,
    pub elapsed_secs: f64,
    /// Asserted only on a Completed live run whose every copy verified
    /// clean against its source hash.
    pub safe_to_reformat: bool,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct Totals {
    copied: u64,
    bytes_copied: u64,
    skipped: u64,
    merged: u64,
    verified: u64,
    copy_failures: u64,
    hash_mismatches: u64,
    cancelled: bool,
}

/// One ingestion run: an explicitly-constructed state machine, the only
/// component with filesystem side effects.
pub struct IngestSession<'a> {
    options: IngestOptions,
    prompter: &'a mut dyn Prompter,
    progress: ThrottledProgress<'a>,
    cancel: CancellationToken,
    state: SessionState,
    warnings: Vec<String>,
    /// Source files the scanner had to skip. Anything skipped was not
    /// archived, so the safe-to-reformat guarantee is withheld.
    scan_issues: u64,
}

impl<'a> IngestSession<'a> {
    pub fn new(options: IngestOptions, prompter: &'a mut dyn Prompter) -> Self {
        Self {
            options,
            prompter,
            progress: ThrottledProgress::new(None),
            cancel: CancellationToken::new(),
            state: SessionState::Created,
            warnings: Vec::new(),
            scan_issues: 0,
        }
    }

    pub fn with_progress(mut self, callback: &'a ProgressCallback) -> Self {
        self.progress = ThrottledProgress::new(Some(callback));
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the full pipeline: scan, group, name, summarize, confirm,
    /// copy, extract, write sidecars, verify, report.
    pub fn run(&mut self) -> Result<SessionReport> {
        let started = Instant::now();

        // Flag-supplied names fail fast, before any filesystem work.
        if let Some(ref name) = self.options.batch_name {
            batch::validate_batch_name(name)?;
        }

        let scan_outcome = scan::scan_source(
            &self.options.source,
            self.options.guess_dates,
            &self.progress,
        )?;
        self.scan_issues = scan_outcome.warnings.len() as u64;
        self.warnings.extend(scan_outcome.warnings);
        let scanned = scan_outcome.items.len() as u64;
        self.state = SessionState::Scanned;

        if scan_outcome.items.is_empty() {
            return Ok(self.finish(SessionOutcome::Completed, scanned, Totals::default(), started));
        }

        let batches = self.group(&scan_outcome.items);
        self.state = SessionState::Grouped;

        let named = self.name_batches(batches)?;
        self.state = SessionState::Named;

        let mut archive_index = ArchiveIndex::build(&self.options.archive, &self.progress)?;
        self.warnings.append(&mut archive_index.warnings);

        let mut plan = self.summarize(named, &archive_index);
        self.state = SessionState::Summarized;

        if self.options.dry_run {
            let totals = Totals {
                skipped: plan.duplicates + plan.metadata_merges,
                ..Default::default()
            };
            return Ok(self.finish(SessionOutcome::Completed, scanned, totals, started));
        }

        self.state = SessionState::AwaitingConfirmation;
        let confirmed = self.options.auto_confirm || self.prompter.confirm_ingest(&plan)?;
        if !confirmed {
            let totals = Totals {
                skipped: plan.duplicates + plan.metadata_merges,
                ..Default::default()
            };
            return Ok(self.finish(SessionOutcome::Aborted, scanned, totals, started));
        }

        self.resolve_merges(&mut plan)?;

        let totals = self.execute(&plan)?;
        let outcome = if totals.cancelled {
            SessionOutcome::Cancelled
        } else if totals.copy_failures > 0 || totals.hash_mismatches > 0 {
            SessionOutcome::Failed
        } else {
            SessionOutcome::Completed
        };

        Ok(self.finish(outcome, scanned, totals, started))
    }

    fn group(&self, items: &[MediaItem]) -> Vec<TemporalBatch> {
        if self.options.batch_name.is_some() {
            vec![batch::single_batch(items)]
        } else {
            batch::group_by_time_gap(items, self.options.gap_threshold)
        }
    }

    /// Resolve a valid name per batch. Invalid interactive answers are
    /// re-requested with the rejection reason, never fatal.
    fn name_batches(&mut self, batches: Vec<TemporalBatch>) -> Result<Vec<(TemporalBatch, String)>> {
        if let Some(ref fixed) = self.options.batch_name {
            let fixed = fixed.clone();
            return Ok(batches.into_iter().map(|b| (b, fixed.clone())).collect());
        }

        let total = batches.len();
        let mut named = Vec::with_capacity(total);
        for (i, b) in batches.into_iter().enumerate() {
            let mut rejected: Option<String> = None;
            let name = loop {
                let request = BatchNameRequest {
                    index: i + 1,
                    total,
                    batch: &b,
                    rejected: rejected.clone(),
                };
                let answer = self.prompter.name_batch(&request)?;
                let answer = answer.trim();
                match batch::validate_batch_name(answer) {
                    Ok(()) => break answer.to_string(),
                    Err(e) => rejected = Some(e.to_string()),
                }
            };
            named.push((b, name));
        }
        Ok(named)
    }

    /// Classify every item against the archive snapshot and assign
    /// destinations. No side effects; this is the dry-run preview.
    fn summarize(
        &mut self,
        named: Vec<(TemporalBatch, String)>,
        index: &ArchiveIndex,
    ) -> SessionPlan {
        let mut plan = SessionPlan::default();
        let mut planner = naming::PathPlanner::new();
        let mut planned_hashes: HashMap<String, PathBuf> = HashMap::new();

        for (batch, name) in named {
            for item in batch.items {
                let action = if let Some(entry) = index.get(&item.hash) {
                    let fresh = self.source_record(&item);
                    let archived = entry.metadata.clone().unwrap_or_default();
                    match fresh {
                        Some(record) if !record.is_empty() && record.differs(&archived) => {
                            plan.metadata_merges += 1;
                            PlannedAction::MergeMetadata {
                                existing: entry.path.clone(),
                                record,
                            }
                        }
                        _ => {
                            plan.duplicates += 1;
                            PlannedAction::SkipDuplicate {
                                existing: entry.path.clone(),
                            }
                        }
                    }
                } else if let Some(dest) = planned_hashes.get(&item.hash) {
                    // Same content twice within this run.
                    plan.duplicates += 1;
                    PlannedAction::SkipDuplicate {
                        existing: dest.clone(),
                    }
                } else {
                    let dest_rel = planner.assign(&item, &name);
                    planned_hashes.insert(item.hash.clone(), dest_rel.clone());
                    plan.new_files += 1;
                    plan.bytes_to_copy += item.size;
                    PlannedAction::Copy { dest_rel }
                };

                plan.items.push(PlannedItem {
                    item,
                    batch_name: name.clone(),
                    action,
                });
            }
        }

        plan
    }

    /// Ask per differing duplicate; a declined merge downgrades to a plain
    /// skip. Auto-confirm accepts all.
    fn resolve_merges(&mut self, plan: &mut SessionPlan) -> Result<()> {
        if self.options.auto_confirm {
            return Ok(());
        }
        for planned in plan.items.iter_mut() {
            if let PlannedAction::MergeMetadata { existing, .. } = &planned.action {
                if !self.prompter.confirm_merge(&planned.item.path, existing)? {
                    plan.metadata_merges -= 1;
                    plan.duplicates += 1;
                    planned.action = PlannedAction::SkipDuplicate {
                        existing: existing.clone(),
                    };
                }
            }
        }
        Ok(())
    }

    /// Copying through Verifying. Per-item failures are recorded and the
    /// run continues; only the archive root being unwritable is fatal.
    fn execute(&mut self, plan: &SessionPlan) -> Result<Totals> {
        let mut totals = Totals {
            skipped: plan.duplicates,
            ..Default::default()
        };

        // First write of the session; failing here aborts before any copy.
        fs::create_dir_all(&self.options.archive).map_err(|e| IngestError::ArchiveUnwritable {
            path: self.options.archive.clone(),
            source: e,
        })?;

        self.state = SessionState::Copying;
        let mut copied: Vec<(usize, PathBuf)> = Vec::new();
        let copy_total = plan.new_files;
        let mut copy_done = 0u64;

        for (idx, planned) in plan.items.iter().enumerate() {
            let PlannedAction::Copy { dest_rel } = &planned.action else {
                continue;
            };
            if self.cancel.is_cancelled() {
                totals.cancelled = true;
                break;
            }

            let dest = self.options.archive.join(dest_rel);
            match copy_one(&planned.item.path, &dest) {
                Ok(()) => {
                    if let Some(ts) = planned.item.timestamp {
                        let mtime = filetime::FileTime::from_unix_time(ts.timestamp(), 0);
                        filetime::set_file_mtime(&dest, mtime).ok();
                    }
                    totals.copied += 1;
                    totals.bytes_copied += planned.item.size;
                    copied.push((idx, dest));
                }
                Err(e) => {
                    self.warn(format!(
                        "copy failed {} -> {}: {e}",
                        planned.item.path.display(),
                        dest.display()
                    ));
                    totals.copy_failures += 1;
                }
            }

            self.progress.report("copy", copy_done, copy_total, "Copying files");
            copy_done += 1;
        }

        if !totals.cancelled {
            self.write_sidecars(plan, &copied, &mut totals);
        }

        if !totals.cancelled {
            self.verify(plan, &copied, &mut totals);
        }

        Ok(totals)
    }

    /// Extract per copied file, then write its sidecar; both steps are
    /// non-fatal. Confirmed merges replace archived sidecars here too.
    fn write_sidecars(&mut self, plan: &SessionPlan, copied: &[(usize, PathBuf)], totals: &mut Totals) {
        self.state = SessionState::ExtractingMetadata;
        let mut records: Vec<(PathBuf, MetadataRecord)> = Vec::with_capacity(copied.len());
        for (idx, dest) in copied {
            if self.cancel.is_cancelled() {
                totals.cancelled = true;
                return;
            }
            let item = &plan.items[*idx].item;
            let record = self.source_record(item).unwrap_or_else(|| MetadataRecord {
                capture_time: item.timestamp.map(truncate_to_seconds),
                ..Default::default()
            });
            records.push((dest.clone(), record));
        }

        self.state = SessionState::WritingSidecars;
        let total = records.len() as u64;
        for (i, (dest, record)) in records.iter().enumerate() {
            if self.cancel.is_cancelled() {
                totals.cancelled = true;
                return;
            }
            let sidecar_file = sidecar::sidecar_path(dest);
            if let Err(e) = sidecar::write_sidecar(&sidecar_file, record) {
                self.warn(format!(
                    "sidecar write failed {}: {e} (file copied, metadata may be lost)",
                    sidecar_file.display()
                ));
            }
            self.progress.report("sidecar", i as u64, total, "Writing sidecars");
        }

        for planned in &plan.items {
            let PlannedAction::MergeMetadata { existing, record } = &planned.action else {
                continue;
            };
            if self.cancel.is_cancelled() {
                totals.cancelled = true;
                return;
            }
            let sidecar_file = sidecar::sidecar_path(existing);
            match sidecar::write_sidecar(&sidecar_file, record) {
                Ok(()) => totals.merged += 1,
                Err(e) => self.warn(format!(
                    "sidecar merge failed {}: {e}",
                    sidecar_file.display()
                )),
            }
        }
    }

    /// Re-hash every copied destination against its source hash. Any
    /// mismatch withholds the safe-to-reformat guarantee.
    fn verify(&mut self, plan: &SessionPlan, copied: &[(usize, PathBuf)], totals: &mut Totals) {
        self.state = SessionState::Verifying;
        let total = copied.len() as u64;

        for (i, (idx, dest)) in copied.iter().enumerate() {
            if self.cancel.is_cancelled() {
                totals.cancelled = true;
                return;
            }
            let expected = &plan.items[*idx].item.hash;
            match scan::hash_file(dest) {
                Ok(actual) if actual == *expected => totals.verified += 1,
                Ok(_) => {
                    totals.hash_mismatches += 1;
                    self.warn(format!("hash mismatch after copy: {}", dest.display()));
                }
                Err(e) => {
                    totals.hash_mismatches += 1;
                    self.warn(format!(
                        "verification read failed {}: {e}",
                        dest.display()
                    ));
                }
            }
            self.progress.report("verify", i as u64, total, "Verifying copies");
        }
    }

    /// Record the sidecar this source item would get. Extraction failures
    /// degrade to None with a warning.
    fn source_record(&mut self, item: &MediaItem) -> Option<MetadataRecord> {
        match metadata::extract(&item.path) {
            Ok(mut record) => {
                record.capture_time = record
                    .capture_time
                    .or(item.timestamp)
                    .map(truncate_to_seconds);
                Some(record)
            }
            Err(e) => {
                self.warn(format!(
                    "metadata extraction failed for {}: {e}",
                    item.path.display()
                ));
                None
            }
        }
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }

    fn finish(
        &mut self,
        outcome: SessionOutcome,
        scanned: u64,
        totals: Totals,
        started: Instant,
    ) -> SessionReport {
        self.state = match outcome {
            SessionOutcome::Completed => SessionState::Completed,
            SessionOutcome::Failed => SessionState::Failed,
            SessionOutcome::Aborted => SessionState::Aborted,
            SessionOutcome::Cancelled => SessionState::Cancelled,
        };

        let safe_to_reformat = outcome == SessionOutcome::Completed
            && !self.options.dry_run
            && self.scan_issues == 0
            && totals.copy_failures == 0
            && totals.verified == totals.copied;

        SessionReport {
            outcome,
            dry_run: self.options.dry_run,
            scanned,
            copied: totals.copied,
            skipped_duplicates: totals.skipped,
            metadata_merged: totals.merged,
            errored: totals.copy_failures + totals.hash_mismatches,
            bytes_copied: totals.bytes_copied,
            verified: totals.verified,
            elapsed_secs: started.elapsed().as_secs_f64(),
            safe_to_reformat,
            warnings: self.warnings.clone(),
        }
    }
}

fn copy_one(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)?;
    Ok(())
}

fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}
