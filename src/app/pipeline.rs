// LogBoop - app/pipeline.rs
//
// Run lifecycle: discovery, grouping, worker pool, cancellation and result
// aggregation.
//
// Architecture:
//   - Lineages are independent work units run on a `rayon` pool, one worker
//     per lineage, strictly sequential inside a lineage.
//   - An `AtomicBool` cancel flag (set from Ctrl+C) is checked before each
//     lineage starts; in-flight lineages always run to a terminal state.
//   - The only shared mutable state is the destination registry and the
//     event sink. Each lineage returns its own report; the summary is built
//     after all workers finish.

use crate::app::commit::{self, CommitContext};
use crate::core::discovery::{self, DiscoveryConfig};
use crate::core::events::EventSink;
use crate::core::model::{InputFile, Lineage, LineageReport, MultilineMode, RunSummary};
use crate::core::parser::LogFormat;
use crate::core::reader::ReaderOptions;
use crate::core::rotation::{self, RotationConfig};
use crate::core::splitter::ClassifyPolicy;
use crate::core::writer::{DestinationRegistry, WriterOptions};
use crate::platform::config::AppConfig;
use crate::platform::fs::FileSystem;
use crate::util::error::{LogBoopError, PipelineError};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Everything a run needs, resolved from config and CLI.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub input_root: PathBuf,
    pub output_root: PathBuf,

    pub discovery: DiscoveryConfig,
    pub rotation: RotationConfig,

    pub formats: Vec<LogFormat>,
    pub multiline: MultilineMode,
    pub detection_lines: usize,

    pub policy: ClassifyPolicy,
    pub dedup_window: usize,

    /// Backwards step allowed before a record counts as out of order.
    pub out_of_order_tolerance: chrono::Duration,

    /// Write destinations as gzip members (`<destination>.gz`).
    pub compress_output: bool,

    /// Delete inputs of committed lineages.
    pub delete_input: bool,

    /// Worker threads (0 = one per CPU).
    pub workers: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig, input_root: PathBuf, output_root: PathBuf) -> Self {
        Self {
            input_root,
            output_root,
            discovery: config.discovery.clone(),
            rotation: config.rotation.clone(),
            formats: config.formats.clone(),
            multiline: config.multiline,
            detection_lines: config.content_detection_lines,
            policy: config.policy.clone(),
            dedup_window: config.dedup_window,
            out_of_order_tolerance: chrono::Duration::seconds(config.out_of_order_tolerance_secs),
            compress_output: config.compress_output,
            delete_input: config.delete_input,
            workers: config.worker_threads,
        }
    }

    pub fn reader_options(&self) -> ReaderOptions<'_> {
        ReaderOptions {
            formats: &self.formats,
            multiline: self.multiline,
            detection_lines: self.detection_lines,
        }
    }

    pub fn writer_options(&self) -> WriterOptions<'_> {
        WriterOptions {
            index: self.reader_options(),
            tolerance: self.out_of_order_tolerance,
            // Inputs that get deleted may legitimately repeat lines already
            // in the output; only kept inputs make re-reading a re-run.
            dedup_existing: !self.delete_input,
            compress: self.compress_output,
        }
    }

    /// Output directory mirroring `input_dir` under the output root.
    fn output_dir_for(&self, input_dir: &Path) -> PathBuf {
        match input_dir.strip_prefix(&self.input_root) {
            Ok(rel) => self.output_root.join(rel),
            Err(_) => self.output_root.clone(),
        }
    }
}

/// One unit of work: a grouped lineage (or the reason it was rejected)
/// plus its output directory.
struct WorkItem {
    lineage: Result<Lineage, PipelineError>,
    output_dir: PathBuf,
}

/// Run the whole pipeline.
///
/// # Errors
/// Only run-level problems (an invalid input root) are returned as `Err`.
/// Every lineage-level failure is reported in the summary instead.
pub fn run(
    settings: &PipelineSettings,
    fs: &dyn FileSystem,
    sink: &dyn EventSink,
    cancel: &AtomicBool,
) -> Result<RunSummary, LogBoopError> {
    let started = Instant::now();

    // -------------------------------------------------------------------------
    // Phase 1: Discovery
    // -------------------------------------------------------------------------
    let discovery_config = DiscoveryConfig {
        skip_dir: Some(settings.output_root.clone()),
        ..settings.discovery.clone()
    };
    let (files, warnings) = discovery::discover_files(&settings.input_root, &discovery_config)?;
    for warning in &warnings {
        tracing::warn!(warning = %warning, "Discovery warning");
    }
    tracing::info!(
        root = %settings.input_root.display(),
        files = files.len(),
        "Discovery complete"
    );

    // -------------------------------------------------------------------------
    // Phase 2: Rotation grouping, per directory
    // -------------------------------------------------------------------------
    let mut by_dir: BTreeMap<PathBuf, Vec<InputFile>> = BTreeMap::new();
    for found in files {
        if let Some(input) = rotation::classify(&found.path, found.size, &settings.rotation) {
            by_dir
                .entry(input.lineage.directory.clone())
                .or_default()
                .push(input);
        }
    }

    let work: Vec<WorkItem> = by_dir
        .into_iter()
        .flat_map(|(dir, inputs)| {
            let output_dir = settings.output_dir_for(&dir);
            rotation::group_lineages(inputs)
                .into_iter()
                .map(move |lineage| WorkItem {
                    lineage,
                    output_dir: output_dir.clone(),
                })
        })
        .collect();

    tracing::info!(lineages = work.len(), "Lineages grouped");

    // -------------------------------------------------------------------------
    // Phase 3: Process lineages on the worker pool
    // -------------------------------------------------------------------------
    let registry = DestinationRegistry::new();
    let ctx = CommitContext {
        fs,
        registry: &registry,
        sink,
        settings,
    };

    let process_all = || -> Vec<LineageReport> {
        work.par_iter()
            .map(|item| process_item(&ctx, item, cancel))
            .collect()
    };

    let reports = match rayon::ThreadPoolBuilder::new()
        .num_threads(settings.workers)
        .thread_name(|i| format!("logboop-worker-{i}"))
        .build()
    {
        Ok(pool) => pool.install(process_all),
        Err(e) => {
            tracing::warn!(error = %e, "Could not build worker pool; using the global pool");
            process_all()
        }
    };

    // -------------------------------------------------------------------------
    // Phase 4: Aggregate
    // -------------------------------------------------------------------------
    let summary = RunSummary::from_reports(reports, started.elapsed());
    tracing::info!(
        committed = summary.committed,
        failed = summary.failed,
        skipped = summary.skipped,
        files_deleted = summary.files_deleted,
        records_written = summary.records_written,
        elapsed_ms = summary.duration.as_millis() as u64,
        "Run complete"
    );
    Ok(summary)
}

fn process_item(ctx: &CommitContext<'_>, item: &WorkItem, cancel: &AtomicBool) -> LineageReport {
    match &item.lineage {
        // Ambiguity is known before any worker starts and is reported even
        // when the run is cancelled.
        Err(e) => commit::reject_lineage(ctx, e),
        Ok(lineage) if cancel.load(Ordering::SeqCst) => {
            tracing::debug!(lineage = %lineage.id, "Cancelled before start");
            commit::cancelled_lineage(ctx, lineage)
        }
        Ok(lineage) => commit::process_lineage(ctx, lineage, &item.output_dir),
    }
}
