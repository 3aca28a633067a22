// LogBoop - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no platform
// dependencies.
//
// These types are the shared vocabulary across all layers.

use crate::util::error::ErrorKind;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// Input files
// =============================================================================

/// How an input file is compressed, derived from its extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    /// Recognised as compressed but not decodable (e.g. `bz2`).
    Other(String),
}

/// The rotation suffix a file name carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationSuffix {
    /// No suffix: the file currently being written to.
    Active,
    /// Numbered rotation (`app.log.3`); larger is older.
    Numbered(u32),
    /// Date-stamped rotation (`app.log-20240101`); earlier is older.
    Dated(NaiveDate),
}

/// Identifies one rotation lineage: a directory plus the shared base name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LineageId {
    pub directory: PathBuf,
    pub base: String,
}

impl std::fmt::Display for LineageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.directory.join(&self.base).display())
    }
}

/// A discovered input file. Immutable once discovered.
#[derive(Debug, Clone, Serialize)]
pub struct InputFile {
    /// Full path to the file.
    pub path: PathBuf,

    /// Lineage this file belongs to.
    pub lineage: LineageId,

    /// Parsed rotation suffix.
    pub suffix: RotationSuffix,

    /// Position in the lineage, 0 = active/newest. Assigned by the grouper;
    /// numbered files carry their number from discovery onward.
    pub rotation_index: u32,

    /// Compression derived from the file extension.
    pub compression: Compression,

    /// File size in bytes at discovery time.
    pub size: u64,
}

/// A set of files believed to be successive rotations of one log,
/// stored oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct Lineage {
    pub id: LineageId,
    pub files: Vec<InputFile>,
}

impl Lineage {
    /// Paths of the member files, oldest first.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

// =============================================================================
// Records
// =============================================================================

/// Where a record came from, for error reporting and boundary detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOrigin {
    /// Path of the source file.
    pub path: Arc<Path>,

    /// Position of the source file within its lineage (0 = oldest).
    pub file_position: usize,

    /// Byte offset of the record start in the decoded stream.
    pub offset: u64,
}

/// A single parsed log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Parsed timestamp in UTC.
    pub timestamp: DateTime<Utc>,

    /// Calendar date as written on the line, in the line's own offset.
    pub local_date: NaiveDate,

    /// Raw record bytes without the trailing line terminator. Spans several
    /// physical lines when continuation lines were folded in.
    pub payload: Vec<u8>,

    /// Originating file and offset.
    pub origin: RecordOrigin,
}

impl Record {
    /// Lossy UTF-8 view of the payload for pattern matching.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// =============================================================================
// Parsing options
// =============================================================================

/// How the reader handles lines that carry no parsable timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MultilineMode {
    /// Skip the line and count it as a parse error.
    #[default]
    Skip,

    /// Append the line to the previous record's payload.
    Continuation,
}

// =============================================================================
// Lineage lifecycle
// =============================================================================

/// Commit state machine for one lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageState {
    Discovered,
    Reading,
    Writing,
    Verifying,
    Committed,
    Failed,
    /// Benign: nothing was written and nothing was deleted.
    Skipped,
}

impl LineageState {
    /// Whether the transition `self -> next` is allowed.
    pub fn can_advance_to(self, next: LineageState) -> bool {
        use LineageState::*;
        matches!(
            (self, next),
            (Discovered, Reading)
                | (Discovered, Failed)
                | (Discovered, Skipped)
                | (Reading, Writing)
                | (Reading, Failed)
                | (Reading, Skipped)
                | (Writing, Verifying)
                | (Writing, Failed)
                | (Verifying, Committed)
                | (Verifying, Failed)
        )
    }

    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LineageState::Committed | LineageState::Failed | LineageState::Skipped
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            LineageState::Discovered => "discovered",
            LineageState::Reading => "reading",
            LineageState::Writing => "writing",
            LineageState::Verifying => "verifying",
            LineageState::Committed => "committed",
            LineageState::Failed => "failed",
            LineageState::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for LineageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a lineage was skipped without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No configured format matched one of the member files.
    FormatUnrecognised,
    /// Cancellation was requested before the lineage started.
    Cancelled,
}

// =============================================================================
// Reports
// =============================================================================

/// Per-destination statistics for one lineage.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    /// Classification key routed to this destination.
    pub key: String,

    /// Destination file path.
    pub destination: PathBuf,

    /// Records appended by this lineage.
    pub records_written: u64,

    /// Bytes appended by this lineage, before any output compression.
    pub bytes_written: u64,

    /// Records skipped because the destination already contained them.
    pub already_present: u64,

    /// Records written behind the stream's watermark.
    pub out_of_order: u64,

    /// Destination length on disk when this lineage first touched it.
    pub initial_len: u64,

    /// Destination length on disk once this lineage's bytes were flushed
    /// and synced. Verification requires at least this much.
    pub committed_len: u64,
}

/// A lineage-level failure summarised for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub path: Option<PathBuf>,
    pub detail: String,
}

/// A per-file deletion failure.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionFailure {
    pub path: PathBuf,
    pub detail: String,
}

/// Result of processing one lineage. Returned by the commit controller and
/// aggregated by the caller; there are no process-wide counters.
#[derive(Debug, Clone, Serialize)]
pub struct LineageReport {
    pub lineage: LineageId,

    /// Member files, oldest first.
    pub files: Vec<PathBuf>,

    /// Final state.
    pub state: LineageState,

    pub skip_reason: Option<SkipReason>,
    pub failure: Option<FailureInfo>,

    pub records_read: u64,
    pub parse_errors: u64,
    pub duplicates_dropped: u64,
    pub unclassified: u64,

    pub streams: Vec<StreamReport>,

    /// Input files removed after commit, oldest first.
    pub deleted: Vec<PathBuf>,
    pub deletion_failures: Vec<DeletionFailure>,
}

impl LineageReport {
    /// A fresh report in `Discovered` state.
    pub fn new(lineage: LineageId, files: Vec<PathBuf>) -> Self {
        Self {
            lineage,
            files,
            state: LineageState::Discovered,
            skip_reason: None,
            failure: None,
            records_read: 0,
            parse_errors: 0,
            duplicates_dropped: 0,
            unclassified: 0,
            streams: Vec::new(),
            deleted: Vec::new(),
            deletion_failures: Vec::new(),
        }
    }

    pub fn records_written(&self) -> u64 {
        self.streams.iter().map(|s| s.records_written).sum()
    }

    pub fn out_of_order(&self) -> u64 {
        self.streams.iter().map(|s| s.out_of_order).sum()
    }

    pub fn already_present(&self) -> u64 {
        self.streams.iter().map(|s| s.already_present).sum()
    }
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Per-lineage reports in discovery order.
    pub lineages: Vec<LineageReport>,

    /// Counts of each error kind across all lineages.
    pub error_counts: BTreeMap<ErrorKind, u64>,

    pub committed: usize,
    pub failed: usize,
    pub skipped: usize,

    pub files_deleted: usize,
    pub records_written: u64,

    /// Wall-clock run duration.
    pub duration: std::time::Duration,
}

impl RunSummary {
    /// Aggregate per-lineage reports.
    pub fn from_reports(lineages: Vec<LineageReport>, duration: std::time::Duration) -> Self {
        let mut summary = RunSummary {
            duration,
            ..Default::default()
        };
        for report in &lineages {
            match report.state {
                LineageState::Committed => summary.committed += 1,
                LineageState::Failed => summary.failed += 1,
                LineageState::Skipped => summary.skipped += 1,
                _ => {}
            }
            summary.files_deleted += report.deleted.len();
            summary.records_written += report.records_written();

            let mut bump = |kind: ErrorKind, n: u64| {
                if n > 0 {
                    *summary.error_counts.entry(kind).or_insert(0) += n;
                }
            };
            if let Some(failure) = &report.failure {
                bump(failure.kind, 1);
            }
            if report.skip_reason == Some(SkipReason::FormatUnrecognised) {
                bump(ErrorKind::FormatUnrecognised, 1);
            }
            bump(ErrorKind::ParseError, report.parse_errors);
            bump(ErrorKind::OutOfOrderRecord, report.out_of_order());
            bump(ErrorKind::DeletionError, report.deletion_failures.len() as u64);
        }
        summary.lineages = lineages;
        summary
    }

    /// Process exit code: 0 when every lineage committed or was skipped,
    /// 1 when any lineage failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }

    /// Count for one error kind (0 when absent).
    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.error_counts.get(&kind).copied().unwrap_or(0)
    }
}
