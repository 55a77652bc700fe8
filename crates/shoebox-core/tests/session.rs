use std::fs;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use shoebox_core::{
    sidecar, AssumeYes, BatchNameRequest, CancellationToken, IngestOptions, IngestSession,
    Prompter, SessionOutcome, SessionPlan,
};

fn write_media(dir: &Path, name: &str, bytes: &[u8], mtime: chrono::DateTime<Utc>) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    let ft = filetime::FileTime::from_unix_time(mtime.timestamp(), 0);
    filetime::set_file_mtime(&path, ft).unwrap();
    path
}

fn ts(h: u32, m: u32, s: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 4, h, m, s).unwrap()
}

fn options(source: &Path, archive: &Path) -> IngestOptions {
    let mut options = IngestOptions::new(source, archive);
    options.batch_name = Some("trip".to_string());
    options.auto_confirm = true;
    options
}

/// Every file under root, relative paths, sorted.
fn tree(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if root.exists() {
        for entry in walkdir::WalkDir::new(root) {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                files.push(entry.path().strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    files.sort();
    files
}

#[test]
fn full_run_copies_into_dated_layout_with_sidecars() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    write_media(source.path(), "IMG_0001.JPG", b"first photo", ts(14, 2, 15));
    write_media(source.path(), "IMG_0002.jpg", b"second photo", ts(14, 30, 0));
    write_media(source.path(), "MVI_0003.mov", b"a video clip", ts(15, 0, 0));

    let mut prompter = AssumeYes;
    let mut session = IngestSession::new(options(source.path(), archive.path()), &mut prompter);
    let report = session.run().unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.scanned, 3);
    assert_eq!(report.copied, 3);
    assert_eq!(report.verified, 3);
    assert_eq!(report.errored, 0);
    assert!(report.safe_to_reformat);

    let files = tree(archive.path());
    assert!(files.contains(&PathBuf::from("2024/11/04/20241104-140215-trip.JPG")));
    assert!(files.contains(&PathBuf::from("2024/11/04/20241104-140215-trip.xmp")));
    assert!(files.contains(&PathBuf::from("2024/11/04/20241104-143000-trip.jpg")));
    assert!(files.contains(&PathBuf::from("2024/11/04/20241104-150000-trip.mov")));
    // One sidecar per copied file, co-located, same stem.
    let sidecars = files.iter().filter(|p| p.extension().unwrap() == "xmp").count();
    assert_eq!(sidecars, 3);
}

#[test]
fn second_run_is_idempotent() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    write_media(source.path(), "a.jpg", b"photo a", ts(10, 0, 0));
    write_media(source.path(), "b.jpg", b"photo b", ts(10, 5, 0));

    let mut prompter = AssumeYes;
    let first = IngestSession::new(options(source.path(), archive.path()), &mut prompter)
        .run()
        .unwrap();
    assert_eq!(first.copied, 2);

    let before = tree(archive.path());
    let second = IngestSession::new(options(source.path(), archive.path()), &mut prompter)
        .run()
        .unwrap();

    assert_eq!(second.outcome, SessionOutcome::Completed);
    assert_eq!(second.copied, 0);
    assert_eq!(second.skipped_duplicates, 2);
    assert_eq!(tree(archive.path()), before);
}

#[test]
fn dry_run_has_zero_side_effects() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    write_media(source.path(), "a.jpg", b"photo a", ts(10, 0, 0));

    let mut opts = options(source.path(), archive.path());
    opts.dry_run = true;

    let mut prompter = AssumeYes;
    let report = IngestSession::new(opts, &mut prompter).run().unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert!(report.dry_run);
    assert_eq!(report.copied, 0);
    assert!(!report.safe_to_reformat);
    assert!(tree(archive.path()).is_empty());
}

struct RefuseIngest;

impl Prompter for RefuseIngest {
    fn name_batch(&mut self, request: &BatchNameRequest<'_>) -> shoebox_core::Result<String> {
        Ok(format!("batch-{}", request.index))
    }

    fn confirm_ingest(&mut self, _plan: &SessionPlan) -> shoebox_core::Result<bool> {
        Ok(false)
    }

    fn confirm_merge(&mut self, _source: &Path, _existing: &Path) -> shoebox_core::Result<bool> {
        Ok(false)
    }
}

#[test]
fn refused_confirmation_aborts_without_changes() {
    let source = tempfile::tempdir().unwrap();
    let archive_parent = tempfile::tempdir().unwrap();
    let archive = archive_parent.path().join("archive");

    write_media(source.path(), "a.jpg", b"photo a", ts(10, 0, 0));

    let mut opts = IngestOptions::new(source.path(), &archive);
    opts.batch_name = Some("trip".to_string());

    let mut prompter = RefuseIngest;
    let report = IngestSession::new(opts, &mut prompter).run().unwrap();

    assert_eq!(report.outcome, SessionOutcome::Aborted);
    assert_eq!(report.copied, 0);
    assert!(!report.safe_to_reformat);
    assert!(!archive.exists());
}

#[test]
fn corruption_after_copy_fails_verification() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    write_media(source.path(), "a.jpg", b"pristine bytes", ts(10, 0, 0));

    // The sidecar stage runs between copy and verify; corrupt the copied
    // file from the progress callback fired there.
    let archive_root = archive.path().to_path_buf();
    let progress = move |stage: &str, _c: u64, _t: u64, _m: &str| {
        if stage == "sidecar" {
            for entry in walkdir::WalkDir::new(&archive_root) {
                let entry = entry.unwrap();
                if entry.path().extension().map(|e| e == "jpg").unwrap_or(false) {
                    fs::write(entry.path(), b"corrupted!").unwrap();
                }
            }
        }
    };

    let mut prompter = AssumeYes;
    let report = IngestSession::new(options(source.path(), archive.path()), &mut prompter)
        .with_progress(&progress)
        .run()
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Failed);
    assert_eq!(report.verified, 0);
    assert_eq!(report.errored, 1);
    assert!(!report.safe_to_reformat);
}

#[test]
fn pre_cancelled_token_stops_before_first_copy() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    write_media(source.path(), "a.jpg", b"photo a", ts(10, 0, 0));

    let token = CancellationToken::new();
    token.cancel();

    let mut prompter = AssumeYes;
    let report = IngestSession::new(options(source.path(), archive.path()), &mut prompter)
        .with_cancel_token(token)
        .run()
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Cancelled);
    assert_eq!(report.copied, 0);
    assert!(!report.safe_to_reformat);
}

#[test]
fn cancellation_mid_run_reports_partial_progress() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    write_media(source.path(), "a.jpg", b"photo a", ts(10, 0, 0));
    write_media(source.path(), "b.jpg", b"photo b", ts(10, 5, 0));

    // Trip the token from the copy-stage progress callback; whichever copy
    // emission lands first, at most the in-flight file completes after it.
    let token = CancellationToken::new();
    let trip = token.clone();
    let progress = move |stage: &str, _c: u64, _t: u64, _m: &str| {
        if stage == "copy" {
            trip.cancel();
        }
    };

    let mut prompter = AssumeYes;
    let report = IngestSession::new(options(source.path(), archive.path()), &mut prompter)
        .with_progress(&progress)
        .with_cancel_token(token)
        .run()
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Cancelled);
    assert!(report.copied >= 1);
    assert_eq!(report.verified, 0);
    assert!(!report.safe_to_reformat);
}

#[test]
fn within_run_duplicates_collapse() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    write_media(source.path(), "a.jpg", b"same bytes", ts(10, 0, 0));
    write_media(source.path(), "copy-of-a.jpg", b"same bytes", ts(10, 1, 0));

    let mut prompter = AssumeYes;
    let report = IngestSession::new(options(source.path(), archive.path()), &mut prompter)
        .run()
        .unwrap();

    assert_eq!(report.copied, 1);
    assert_eq!(report.skipped_duplicates, 1);
    assert_eq!(report.outcome, SessionOutcome::Completed);
}

#[test]
fn differing_metadata_merges_sidecar_wholesale() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    let src = write_media(source.path(), "a.jpg", b"stable bytes", ts(10, 0, 0));

    let mut prompter = AssumeYes;
    let first = IngestSession::new(options(source.path(), archive.path()), &mut prompter)
        .run()
        .unwrap();
    assert_eq!(first.copied, 1);

    // Same content, later capture evidence: the record now differs.
    let ft = filetime::FileTime::from_unix_time(ts(18, 30, 0).timestamp(), 0);
    filetime::set_file_mtime(&src, ft).unwrap();

    let second = IngestSession::new(options(source.path(), archive.path()), &mut prompter)
        .run()
        .unwrap();

    assert_eq!(second.outcome, SessionOutcome::Completed);
    assert_eq!(second.copied, 0);
    assert_eq!(second.metadata_merged, 1);

    let archived = tree(archive.path())
        .into_iter()
        .find(|p| p.extension().map(|e| e == "xmp").unwrap_or(false))
        .map(|p| archive.path().join(p))
        .unwrap();
    let record = sidecar::read_sidecar(&archived).unwrap();
    assert_eq!(record.capture_time, Some(ts(18, 30, 0)));
}

struct DeclineMerge;

impl Prompter for DeclineMerge {
    fn name_batch(&mut self, request: &BatchNameRequest<'_>) -> shoebox_core::Result<String> {
        Ok(format!("batch-{}", request.index))
    }

    fn confirm_ingest(&mut self, _plan: &SessionPlan) -> shoebox_core::Result<bool> {
        Ok(true)
    }

    fn confirm_merge(&mut self, _source: &Path, _existing: &Path) -> shoebox_core::Result<bool> {
        Ok(false)
    }
}

#[test]
fn declined_merge_leaves_sidecar_untouched() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    let src = write_media(source.path(), "a.jpg", b"stable bytes", ts(10, 0, 0));

    let mut yes = AssumeYes;
    IngestSession::new(options(source.path(), archive.path()), &mut yes)
        .run()
        .unwrap();

    let ft = filetime::FileTime::from_unix_time(ts(18, 30, 0).timestamp(), 0);
    filetime::set_file_mtime(&src, ft).unwrap();

    let mut opts = options(source.path(), archive.path());
    opts.auto_confirm = false;

    let mut prompter = DeclineMerge;
    let report = IngestSession::new(opts, &mut prompter).run().unwrap();

    assert_eq!(report.metadata_merged, 0);
    assert_eq!(report.skipped_duplicates, 1);

    let archived = tree(archive.path())
        .into_iter()
        .find(|p| p.extension().map(|e| e == "xmp").unwrap_or(false))
        .map(|p| archive.path().join(p))
        .unwrap();
    let record = sidecar::read_sidecar(&archived).unwrap();
    assert_eq!(record.capture_time, Some(ts(10, 0, 0)));
}

#[test]
fn empty_source_completes_with_nothing_to_do() {
    let source = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    let mut prompter = AssumeYes;
    let report = IngestSession::new(options(source.path(), archive.path()), &mut prompter)
        .run()
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.scanned, 0);
    assert_eq!(report.copied, 0);
}

#[test]
fn missing_source_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    let mut prompter = AssumeYes;
    let result = IngestSession::new(
        options(&dir.path().join("absent"), archive.path()),
        &mut prompter,
    )
    .run();

    assert!(matches!(
        result,
        Err(shoebox_core::IngestError::SourceUnreadable { .. })
    ));
}
