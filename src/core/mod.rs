// LogBoop - core/mod.rs
//
// Core pipeline logic: naming, grouping, reading, splitting, writing.
// Dependencies: util, and platform::fs for the filesystem trait only.
// Must NOT depend on: app, or any concrete filesystem beyond the trait.

pub mod discovery;
pub mod events;
pub mod model;
pub mod parser;
pub mod reader;
pub mod rotation;
pub mod splitter;
pub mod writer;
