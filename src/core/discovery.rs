// LogBoop - core/discovery.rs
//
// Recursive directory traversal and input file discovery.
//
// Architecture note: this module uses `walkdir` for directory traversal as an
// OS abstraction (similar to using std::path::Path). It reads only file
// *metadata*, never file *contents*; opening files is the reader's job.
//
//   - Per-entry I/O errors are non-fatal and collected as warnings.
//   - Exclude patterns short-circuit directory descent via filter_entry so
//     excluded subtrees (e.g. .git/) are never traversed at all.
//   - The output root is pruned when it lives inside the input root, so a
//     run never consumes its own output.

use crate::util::constants;
use crate::util::error::DiscoveryError;
use std::path::{Path, PathBuf};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a discovery operation.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Maximum directory recursion depth.
    pub max_depth: usize,

    /// Glob patterns (filename-only) that a file MUST match to be included.
    /// An empty list means "include everything that is not excluded".
    pub include_patterns: Vec<String>,

    /// Glob patterns matched against filenames AND directory component names.
    /// Matching files are skipped; matching directories are not descended into.
    pub exclude_patterns: Vec<String>,

    /// Directory never descended into (the output root).
    pub skip_dir: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: constants::DEFAULT_MAX_DEPTH,
            include_patterns: constants::DEFAULT_INCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            exclude_patterns: constants::DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            skip_dir: None,
        }
    }
}

/// A regular file found under the input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
}

// =============================================================================
// Discovery
// =============================================================================

/// Discover candidate input files under `root`, sorted by path.
///
/// # Non-fatal errors
/// Files/directories that cannot be accessed due to permission or I/O errors
/// are recorded as human-readable strings in the returned warnings vector and
/// do NOT cause the function to return `Err`.
///
/// # Fatal errors
/// Returns `Err` only if the root path is invalid (`RootNotFound`,
/// `NotADirectory`, `PermissionDenied`).
pub fn discover_files(
    root: &Path,
    config: &DiscoveryConfig,
) -> Result<(Vec<DiscoveredFile>, Vec<String>), DiscoveryError> {
    // `fs::metadata` rather than `Path::is_dir` so that permission problems
    // are distinguishable from a missing path.
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(DiscoveryError::NotADirectory {
                path: root.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DiscoveryError::PermissionDenied {
                path: root.to_path_buf(),
                source: e,
            })
        }
        Err(_) => {
            return Err(DiscoveryError::RootNotFound {
                path: root.to_path_buf(),
            })
        }
    }

    let max_depth = config.max_depth.min(constants::ABSOLUTE_MAX_DEPTH);

    tracing::debug!(
        root = %root.display(),
        max_depth,
        include = ?config.include_patterns,
        exclude = ?config.exclude_patterns,
        "Discovery starting"
    );

    let include_pats = compile_patterns(&config.include_patterns, "include");
    let exclude_pats = compile_patterns(&config.exclude_patterns, "exclude");
    let skip_dir = config
        .skip_dir
        .as_ref()
        .and_then(|p| p.canonicalize().ok());

    let mut files: Vec<DiscoveredFile> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let walker = walkdir::WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if !e.file_type().is_dir() || e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_str().unwrap_or("");
            if is_excluded_component(name, &exclude_pats) {
                return false;
            }
            match &skip_dir {
                Some(skip) => e.path().canonicalize().map_or(true, |c| &c != skip),
                None => true,
            }
        });

    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                let path_str = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let msg = format!("Cannot access '{path_str}': {e}");
                tracing::debug!(warning = %msg, "Discovery warning");
                warnings.push(msg);
                continue;
            }
        };

        // Directories are handled by filter_entry; symlinks are not followed.
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();

        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => {
                warnings.push(format!("Skipping '{}': non-UTF-8 filename", path.display()));
                continue;
            }
        };

        if is_excluded_filename(file_name, &exclude_pats) {
            tracing::trace!(file = file_name, "Excluded by pattern");
            continue;
        }

        if !is_included(file_name, &include_pats) {
            tracing::trace!(file = file_name, "Not matched by include patterns");
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                let msg = format!("Cannot read metadata for '{}': {e}", path.display());
                tracing::debug!(warning = %msg, "Discovery warning");
                warnings.push(msg);
                continue;
            }
        };

        files.push(DiscoveredFile {
            path: path.to_path_buf(),
            size,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));

    tracing::debug!(
        files = files.len(),
        warnings = warnings.len(),
        "Discovery complete"
    );

    Ok((files, warnings))
}

// =============================================================================
// Glob helpers
// =============================================================================

/// Compile a list of glob pattern strings into `glob::Pattern` objects.
/// Patterns that fail to compile are logged as warnings and skipped.
fn compile_patterns(patterns: &[String], kind: &str) -> Vec<glob::Pattern> {
    patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                tracing::warn!(pattern = p, kind, error = %e, "Invalid glob pattern, skipping");
                None
            }
        })
        .collect()
}

/// Returns true if `dir_name` matches any exclude pattern that contains no
/// wildcard characters. These are treated as directory component exclusions
/// (e.g. ".git") rather than filename glob patterns.
fn is_excluded_component(dir_name: &str, exclude_pats: &[glob::Pattern]) -> bool {
    exclude_pats.iter().any(|p| {
        let s = p.as_str();
        !s.contains('*') && !s.contains('?') && !s.contains('[') && p.matches(dir_name)
    })
}

/// Returns true if `file_name` matches any exclude pattern (wildcard or literal).
fn is_excluded_filename(file_name: &str, exclude_pats: &[glob::Pattern]) -> bool {
    exclude_pats.iter().any(|p| p.matches(file_name))
}

/// Returns true if `file_name` matches at least one include pattern.
/// An empty include list means "include all" (returns true).
fn is_included(file_name: &str, include_pats: &[glob::Pattern]) -> bool {
    if include_pats.is_empty() {
        return true;
    }
    include_pats.iter().any(|p| p.matches(file_name))
}

// =============================================================================
// Tests
// =============================================================================
