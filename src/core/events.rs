// LogBoop - core/events.rs
//
// Structured pipeline events and the sink they are delivered to.
// The core emits events; it never formats human-readable text itself.
// Rendering is the job of the sink (see app::report::TracingSink).

use crate::core::model::{LineageId, LineageReport};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Mutex;

/// Events emitted while lineages are processed.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A worker picked up a lineage.
    LineageStarted { lineage: LineageId, files: usize },

    /// A file could not be opened or decompressed.
    UnreadableFile {
        lineage: LineageId,
        path: PathBuf,
        detail: String,
    },

    /// Two or more files claim the same rotation position.
    AmbiguousLineage {
        lineage: LineageId,
        position: String,
        paths: Vec<PathBuf>,
    },

    /// A numbered lineage skips one or more rotation numbers.
    RotationGap {
        lineage: LineageId,
        missing: Vec<u32>,
    },

    /// Parse errors found in one file (emitted once per file, when non-zero).
    ParseErrors {
        lineage: LineageId,
        path: PathBuf,
        count: u64,
        first_offset: Option<u64>,
    },

    /// A record was written behind its stream's watermark.
    OutOfOrderRecord {
        lineage: LineageId,
        destination: PathBuf,
        source: PathBuf,
        offset: u64,
        timestamp: DateTime<Utc>,
        watermark: DateTime<Utc>,
    },

    /// An input file survived commit because deleting it failed.
    DeletionFailed {
        lineage: LineageId,
        path: PathBuf,
        detail: String,
    },

    /// A lineage reached a terminal state.
    LineageFinished { report: Box<LineageReport> },
}

/// Receiver of pipeline events.
///
/// Called from worker threads; implementations must be cheap and must not
/// block on anything the pipeline itself holds.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Sink that records events in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}
