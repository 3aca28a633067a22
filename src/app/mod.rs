// LogBoop - app/mod.rs
//
// Application layer: run orchestration, the per-lineage commit controller,
// and rendering of events and summaries.
// Dependencies: core layer, platform (config, filesystem).

pub mod commit;
pub mod pipeline;
pub mod report;
