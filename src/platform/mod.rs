// LogBoop - platform/mod.rs
//
// Platform abstraction layer.
// Dependencies: standard library, directories, flate2, and core option types
// that config.toml values are validated into.
// Must NOT depend on: app.

pub mod config;
pub mod fs;
