// LogBoop - app/commit.rs
//
// Commit controller: drives one lineage through
//   Discovered -> Reading -> Writing -> Verifying -> Committed | Failed
// with Skipped reachable from Discovered and Reading.
//
// Input files are deleted only from Committed, i.e. after every stream the
// lineage touched has been flushed, synced, closed and re-examined. Every
// read and write handle is scoped to its stage and released on all exit
// paths before the next stage starts.

use crate::app::pipeline::PipelineSettings;
use crate::core::events::{EventSink, PipelineEvent};
use crate::core::model::{
    DeletionFailure, FailureInfo, Lineage, LineageId, LineageReport, LineageState, SkipReason,
};
use crate::core::reader::RecordReader;
use crate::core::rotation;
use crate::core::splitter::{destination_path, Splitter};
use crate::core::writer::{self, AppendOutcome, DestinationRegistry, OutputWriter};
use crate::platform::fs::FileSystem;
use crate::util::error::{ErrorKind, PipelineError};
use std::path::{Path, PathBuf};

/// Shared collaborators for every lineage of a run.
#[derive(Clone, Copy)]
pub struct CommitContext<'a> {
    pub fs: &'a dyn FileSystem,
    pub registry: &'a DestinationRegistry,
    pub sink: &'a dyn EventSink,
    pub settings: &'a PipelineSettings,
}

/// Report for a lineage the grouper rejected. No file is touched.
pub fn reject_lineage(ctx: &CommitContext<'_>, error: &PipelineError) -> LineageReport {
    let (id, files, position) = match error {
        PipelineError::AmbiguousLineage {
            directory,
            base,
            position,
            paths,
        } => (
            LineageId {
                directory: directory.clone(),
                base: base.clone(),
            },
            paths.clone(),
            position.clone(),
        ),
        other => {
            let path = other.path().cloned().unwrap_or_default();
            let id = LineageId {
                directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
                base: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };
            (id, vec![path], String::new())
        }
    };

    if error.kind() == ErrorKind::AmbiguousLineage {
        ctx.sink.emit(PipelineEvent::AmbiguousLineage {
            lineage: id.clone(),
            position,
            paths: files.clone(),
        });
    }

    let mut commit = Commit::new(ctx, id, files);
    commit.fail(error);
    commit.finish()
}

/// Report for a lineage never started because cancellation was requested.
pub fn cancelled_lineage(ctx: &CommitContext<'_>, lineage: &Lineage) -> LineageReport {
    let mut commit = Commit::new(ctx, lineage.id.clone(), lineage.paths());
    commit.skip(SkipReason::Cancelled);
    commit.finish()
}

/// Process one lineage end to end and return its report.
///
/// Never panics and never returns an error: every failure is folded into the
/// report, scoped to this lineage.
pub fn process_lineage(
    ctx: &CommitContext<'_>,
    lineage: &Lineage,
    output_dir: &Path,
) -> LineageReport {
    let mut commit = Commit::new(ctx, lineage.id.clone(), lineage.paths());

    ctx.sink.emit(PipelineEvent::LineageStarted {
        lineage: lineage.id.clone(),
        files: lineage.files.len(),
    });

    let missing = rotation::rotation_gaps(lineage);
    if !missing.is_empty() {
        ctx.sink.emit(PipelineEvent::RotationGap {
            lineage: lineage.id.clone(),
            missing,
        });
    }

    // -------------------------------------------------------------------------
    // Reading: open and resolve every file before any output is written
    // -------------------------------------------------------------------------
    commit.advance(LineageState::Reading);
    let reader_options = ctx.settings.reader_options();
    for (position, file) in lineage.files.iter().enumerate() {
        match RecordReader::open(
            ctx.fs,
            &file.path,
            &file.compression,
            position,
            &reader_options,
        ) {
            Ok(reader) => {
                tracing::trace!(
                    file = %file.path.display(),
                    format = reader.format_name().unwrap_or("<empty>"),
                    "File readable"
                );
            }
            Err(PipelineError::FormatUnrecognised { path, sampled_lines }) => {
                tracing::info!(
                    lineage = %lineage.id,
                    file = %path.display(),
                    sampled_lines,
                    "No configured format matches; lineage left untouched"
                );
                commit.skip(SkipReason::FormatUnrecognised);
                return commit.finish();
            }
            Err(e) => {
                commit.fail(&e);
                return commit.finish();
            }
        }
    }

    // -------------------------------------------------------------------------
    // Writing: reader -> splitter -> writer, oldest file first
    // -------------------------------------------------------------------------
    commit.advance(LineageState::Writing);
    let policy = &ctx.settings.policy;
    let mut splitter = Splitter::new(policy, ctx.settings.dedup_window);
    let mut out = OutputWriter::new(ctx.fs, ctx.registry, ctx.settings.writer_options());

    for (position, file) in lineage.files.iter().enumerate() {
        let result = copy_file(
            &mut commit,
            &mut splitter,
            &mut out,
            lineage,
            position,
            output_dir,
        );
        if let Err(e) = result {
            // Dropping the writer releases every output handle.
            drop(out);
            commit.record_split(&splitter);
            commit.fail(&e);
            return commit.finish();
        }
        tracing::trace!(file = %file.path.display(), "File copied");
    }
    commit.record_split(&splitter);

    // -------------------------------------------------------------------------
    // Verifying: flush, sync, close, re-examine
    // -------------------------------------------------------------------------
    commit.advance(LineageState::Verifying);
    let streams = match out.finish() {
        Ok(streams) => streams,
        Err(e) => {
            commit.fail(&e);
            return commit.finish();
        }
    };
    commit.report.streams = streams;
    if let Err(e) = writer::verify(ctx.fs, &commit.report.streams) {
        commit.fail(&e);
        return commit.finish();
    }
    commit.advance(LineageState::Committed);

    // -------------------------------------------------------------------------
    // Committed: delete inputs oldest first, each checked individually
    // -------------------------------------------------------------------------
    if ctx.settings.delete_input {
        for file in &lineage.files {
            match ctx.fs.remove_file(&file.path) {
                Ok(()) => {
                    tracing::debug!(file = %file.path.display(), "Input deleted");
                    commit.report.deleted.push(file.path.clone());
                }
                Err(source) => {
                    let error = PipelineError::Deletion {
                        path: file.path.clone(),
                        source,
                    };
                    ctx.sink.emit(PipelineEvent::DeletionFailed {
                        lineage: lineage.id.clone(),
                        path: file.path.clone(),
                        detail: error.to_string(),
                    });
                    commit.report.deletion_failures.push(DeletionFailure {
                        path: file.path.clone(),
                        detail: error.to_string(),
                    });
                }
            }
        }
    }

    commit.finish()
}

/// Stream one file through the splitter into the writer.
///
/// The reader (and its handle) lives only for the duration of this call.
fn copy_file(
    commit: &mut Commit<'_>,
    splitter: &mut Splitter<'_>,
    out: &mut OutputWriter<'_>,
    lineage: &Lineage,
    position: usize,
    output_dir: &Path,
) -> Result<(), PipelineError> {
    let ctx = commit.ctx;
    let file = &lineage.files[position];
    let reader_options = ctx.settings.reader_options();
    let mut reader = RecordReader::open(
        ctx.fs,
        &file.path,
        &file.compression,
        position,
        &reader_options,
    )?;

    let policy = &ctx.settings.policy;
    let base = lineage.id.base.as_str();
    let destination = |key: &str| -> PathBuf { destination_path(output_dir, base, key, policy) };

    let mut result = Ok(());
    for item in &mut reader {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                result = Err(e);
                break;
            }
        };
        commit.report.records_read += 1;

        let Some((key, record)) = splitter.accept(record) else {
            continue;
        };
        match out.append(&key, &record, || destination(&key)) {
            Ok(AppendOutcome::OutOfOrder { watermark }) => {
                ctx.sink.emit(PipelineEvent::OutOfOrderRecord {
                    lineage: lineage.id.clone(),
                    destination: destination(&key),
                    source: file.path.clone(),
                    offset: record.origin.offset,
                    timestamp: record.timestamp,
                    watermark,
                });
            }
            Ok(AppendOutcome::Written | AppendOutcome::AlreadyPresent) => {}
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    // Parse errors are reported even when the file failed part-way.
    let stats = reader.stats();
    commit.report.parse_errors += stats.parse_errors;
    if stats.parse_errors > 0 {
        ctx.sink.emit(PipelineEvent::ParseErrors {
            lineage: lineage.id.clone(),
            path: file.path.clone(),
            count: stats.parse_errors,
            first_offset: stats.errors.first().map(|e| e.offset()),
        });
    }
    result
}

// =============================================================================
// State machine bookkeeping
// =============================================================================

struct Commit<'a> {
    ctx: CommitContext<'a>,
    report: LineageReport,
}

impl<'a> Commit<'a> {
    fn new(ctx: &CommitContext<'a>, id: LineageId, files: Vec<PathBuf>) -> Self {
        Self {
            ctx: *ctx,
            report: LineageReport::new(id, files),
        }
    }

    fn advance(&mut self, next: LineageState) {
        let current = self.report.state;
        debug_assert!(
            current.can_advance_to(next),
            "illegal lineage transition {current} -> {next}"
        );
        tracing::trace!(lineage = %self.report.lineage, from = %current, to = %next, "State change");
        self.report.state = next;
    }

    fn skip(&mut self, reason: SkipReason) {
        self.report.skip_reason = Some(reason);
        self.advance(LineageState::Skipped);
    }

    fn fail(&mut self, error: &PipelineError) {
        if error.kind() == ErrorKind::UnreadableFile {
            if let Some(path) = error.path() {
                self.ctx.sink.emit(PipelineEvent::UnreadableFile {
                    lineage: self.report.lineage.clone(),
                    path: path.clone(),
                    detail: error.to_string(),
                });
            }
        }
        tracing::debug!(lineage = %self.report.lineage, state = %self.report.state, error = %error, "Lineage failed");
        self.report.failure = Some(FailureInfo {
            kind: error.kind(),
            path: error.path().cloned(),
            detail: error.to_string(),
        });
        self.advance(LineageState::Failed);
    }

    fn record_split(&mut self, splitter: &Splitter<'_>) {
        let stats = splitter.stats();
        self.report.duplicates_dropped = stats.duplicates_dropped;
        self.report.unclassified = stats.unclassified;
    }

    fn finish(self) -> LineageReport {
        debug_assert!(self.report.state.is_terminal());
        self.ctx.sink.emit(PipelineEvent::LineageFinished {
            report: Box::new(self.report.clone()),
        });
        self.report
    }
}
