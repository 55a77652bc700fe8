use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use shoebox_core::{
    BatchNameRequest, CancellationToken, IngestError, IngestOptions, IngestSession,
    PlaceholderNames, Prompter, SessionOutcome, SessionPlan, SessionReport,
};

#[derive(Parser)]
#[command(
    name = "shoebox",
    version,
    about = "Merge a photo/video dump into a dated, deduplicated, verified archive"
)]
struct Cli {
    /// Source directory (SD card dump, phone backup)
    #[arg(short, long)]
    source: PathBuf,

    /// Archive root directory
    #[arg(short, long)]
    archive: PathBuf,

    /// Preview the session without copying anything
    #[arg(long)]
    dry_run: bool,

    /// One batch name for the whole run (disables temporal batching)
    #[arg(long)]
    batch_name: Option<String>,

    /// Time gap in hours that separates event batches
    #[arg(long, default_value_t = 2.0)]
    gap_hours: f64,

    /// Skip the confirmation prompt and accept metadata merges
    #[arg(short = 'y', long)]
    yes: bool,

    /// Also guess dates from filename patterns when EXIF is absent
    #[arg(long)]
    guess_dates: bool,

    /// Print the session report as JSON on stdout
    #[arg(long)]
    json: bool,
}

/// Interactive stdin/stderr prompter.
struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line(&self) -> shoebox_core::Result<String> {
        let mut input = String::new();
        io::stdin()
            .read_line(&mut input)
            .map_err(IngestError::Prompt)?;
        Ok(input.trim().to_string())
    }
}

impl Prompter for TerminalPrompter {
    fn name_batch(&mut self, request: &BatchNameRequest<'_>) -> shoebox_core::Result<String> {
        if let Some(ref reason) = request.rejected {
            eprintln!("Invalid batch name: {reason}");
            eprintln!("Use only lowercase letters, digits, '-' and '_'.");
        } else {
            let batch = request.batch;
            eprintln!("\n--- Batch {} of {} ---", request.index, request.total);
            match (batch.start_time, batch.end_time) {
                (Some(start), Some(end)) => eprintln!(
                    "  Date range: {} to {}",
                    start.format("%Y-%m-%d %H:%M:%S"),
                    end.format("%Y-%m-%d %H:%M:%S")
                ),
                _ => eprintln!("  Date range: unknown (no timestamps)"),
            }
            eprintln!(
                "  Files: {} ({} photos, {} videos, {:.1} MiB)",
                batch.items.len(),
                batch.photo_count(),
                batch.video_count(),
                batch.total_bytes() as f64 / (1024.0 * 1024.0)
            );
            eprintln!("  Samples:");
            for (i, item) in batch.items.iter().take(3).enumerate() {
                eprintln!("    {}. {}", i + 1, item.file_name());
            }
            if batch.items.len() > 3 {
                eprintln!("    ... and {} more", batch.items.len() - 3);
            }
        }

        eprint!("Enter batch name: ");
        io::stderr().flush().map_err(IngestError::Prompt)?;
        self.read_line()
    }

    fn confirm_ingest(&mut self, plan: &SessionPlan) -> shoebox_core::Result<bool> {
        eprintln!(
            "\nPlan: {} new files ({:.1} MiB), {} duplicates to skip, {} metadata merges",
            plan.new_files,
            plan.bytes_to_copy as f64 / (1024.0 * 1024.0),
            plan.duplicates,
            plan.metadata_merges
        );
        eprint!("Proceed? [y/N] ");
        io::stderr().flush().map_err(IngestError::Prompt)?;
        let answer = self.read_line()?;
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }

    fn confirm_merge(&mut self, source: &Path, existing: &Path) -> shoebox_core::Result<bool> {
        eprintln!(
            "\nDuplicate with different metadata:\n  source:  {}\n  archive: {}",
            source.display(),
            existing.display()
        );
        eprint!("Replace the archived sidecar? [y/N] ");
        io::stderr().flush().map_err(IngestError::Prompt)?;
        let answer = self.read_line()?;
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }
}

fn print_report(report: &SessionReport) {
    eprintln!(
        "\n{}: {} scanned, {} copied ({:.1} MiB), {} duplicates skipped, {} sidecars merged, {} errors ({:.2}s)",
        match report.outcome {
            SessionOutcome::Completed if report.dry_run => "Dry run complete",
            SessionOutcome::Completed => "Done",
            SessionOutcome::Failed => "FAILED",
            SessionOutcome::Aborted => "Aborted - no changes made",
            SessionOutcome::Cancelled => "Cancelled",
        },
        report.scanned,
        report.copied,
        report.bytes_copied as f64 / (1024.0 * 1024.0),
        report.skipped_duplicates,
        report.metadata_merged,
        report.errored,
        report.elapsed_secs
    );

    for warning in &report.warnings {
        eprintln!("  warning: {warning}");
    }

    if report.safe_to_reformat {
        eprintln!(
            "Verified {}/{} copies - the source is safe to reformat.",
            report.verified, report.copied
        );
    } else if !report.dry_run && report.outcome != SessionOutcome::Aborted {
        eprintln!("Safe-to-reformat guarantee withheld - do NOT erase the source.");
    }
}

fn exit_code(outcome: SessionOutcome) -> ExitCode {
    match outcome {
        SessionOutcome::Completed => ExitCode::SUCCESS,
        SessionOutcome::Failed => ExitCode::from(1),
        SessionOutcome::Aborted => ExitCode::from(2),
        SessionOutcome::Cancelled => ExitCode::from(130),
    }
}

fn run(cli: Cli) -> anyhow::Result<SessionReport> {
    let mut options = IngestOptions::new(&cli.source, &cli.archive);
    options.dry_run = cli.dry_run;
    options.batch_name = cli.batch_name.clone();
    options.gap_threshold = chrono::Duration::seconds((cli.gap_hours * 3600.0) as i64);
    options.auto_confirm = cli.yes;
    options.guess_dates = cli.guess_dates;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("failed to install interrupt handler")?;

    let progress = |stage: &str, current: u64, total: u64, message: &str| {
        eprintln!("[{stage}] {}/{total} {message}", current + 1);
    };

    let mut interactive = TerminalPrompter;
    let mut placeholder = PlaceholderNames;
    let prompter: &mut dyn Prompter = if cli.dry_run {
        &mut placeholder
    } else {
        &mut interactive
    };

    let mut session = IngestSession::new(options, prompter)
        .with_progress(&progress)
        .with_cancel_token(token);

    Ok(session.run()?)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli) {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(out) => println!("{out}"),
                    Err(e) => eprintln!("failed to serialize report: {e}"),
                }
            }
            print_report(&report);
            exit_code(report.outcome)
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
