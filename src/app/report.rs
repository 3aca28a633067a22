// LogBoop - app/report.rs
//
// Rendering of pipeline events and the run summary.
//
// `TracingSink` turns structured events into `tracing` events; the summary
// is rendered as plain text or JSON for stdout.

use crate::core::events::{EventSink, PipelineEvent};
use crate::core::model::{LineageState, RunSummary};
use std::fmt::Write as _;

/// Event sink that logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::LineageStarted { lineage, files } => {
                tracing::debug!(lineage = %lineage, files, "Lineage started");
            }
            PipelineEvent::UnreadableFile {
                lineage,
                path,
                detail,
            } => {
                tracing::error!(lineage = %lineage, file = %path.display(), %detail, "Unreadable input file");
            }
            PipelineEvent::AmbiguousLineage {
                lineage,
                position,
                paths,
            } => {
                let files: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                tracing::error!(
                    lineage = %lineage,
                    %position,
                    files = ?files,
                    "Ambiguous rotation lineage; rename or remove the conflicting files"
                );
            }
            PipelineEvent::RotationGap { lineage, missing } => {
                tracing::warn!(lineage = %lineage, missing = ?missing, "Rotation numbers missing");
            }
            PipelineEvent::ParseErrors {
                lineage,
                path,
                count,
                first_offset,
            } => {
                tracing::warn!(
                    lineage = %lineage,
                    file = %path.display(),
                    count,
                    first_offset = ?first_offset,
                    "Lines without a timestamp skipped"
                );
            }
            PipelineEvent::OutOfOrderRecord {
                lineage,
                destination,
                source,
                offset,
                timestamp,
                watermark,
            } => {
                tracing::warn!(
                    lineage = %lineage,
                    destination = %destination.display(),
                    source = %source.display(),
                    offset,
                    %timestamp,
                    %watermark,
                    "Record written out of order"
                );
            }
            PipelineEvent::DeletionFailed {
                lineage,
                path,
                detail,
            } => {
                tracing::error!(lineage = %lineage, file = %path.display(), %detail, "Input file could not be deleted");
            }
            PipelineEvent::LineageFinished { report } => match report.state {
                LineageState::Committed => tracing::info!(
                    lineage = %report.lineage,
                    records = report.records_read,
                    written = report.records_written(),
                    duplicates = report.duplicates_dropped,
                    already_present = report.already_present(),
                    streams = report.streams.len(),
                    deleted = report.deleted.len(),
                    "Lineage committed"
                ),
                LineageState::Skipped => tracing::info!(
                    lineage = %report.lineage,
                    reason = ?report.skip_reason,
                    "Lineage skipped"
                ),
                _ => tracing::error!(
                    lineage = %report.lineage,
                    error = report.failure.as_ref().map(|f| f.detail.as_str()).unwrap_or(""),
                    "Lineage failed; inputs left in place"
                ),
            },
        }
    }
}

/// Human-readable run summary.
pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} lineage(s): {} committed, {} failed, {} skipped",
        summary.lineages.len(),
        summary.committed,
        summary.failed,
        summary.skipped
    );
    let _ = writeln!(
        out,
        "{} record(s) written, {} input file(s) deleted in {:.2}s",
        summary.records_written,
        summary.files_deleted,
        summary.duration.as_secs_f64()
    );

    if !summary.error_counts.is_empty() {
        let _ = writeln!(out, "\nErrors by kind:");
        for (kind, count) in &summary.error_counts {
            let _ = writeln!(out, "  {:<22} {count}", kind.label());
        }
    }

    let failed: Vec<_> = summary
        .lineages
        .iter()
        .filter(|r| r.state == LineageState::Failed)
        .collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "\nFailed lineages (inputs untouched):");
        for report in failed {
            let detail = report
                .failure
                .as_ref()
                .map(|f| format!("[{}] {}", f.kind, f.detail))
                .unwrap_or_default();
            let _ = writeln!(out, "  {}: {detail}", report.lineage);
        }
    }

    let undeleted: Vec<_> = summary
        .lineages
        .iter()
        .flat_map(|r| r.deletion_failures.iter())
        .collect();
    if !undeleted.is_empty() {
        let _ = writeln!(out, "\nCommitted but not deleted:");
        for failure in undeleted {
            let _ = writeln!(out, "  {}", failure.detail);
        }
    }

    out
}

/// Run summary as pretty-printed JSON.
pub fn render_json(summary: &RunSummary) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(summary)
}
