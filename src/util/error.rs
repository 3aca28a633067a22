// LogBoop - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation. All errors preserve the causal chain
// for diagnostic logging.

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all LogBoop operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum LogBoopError {
    /// Input discovery failed before any lineage started.
    Discovery(DiscoveryError),

    /// A lineage-level failure surfaced outside the commit controller.
    Pipeline(PipelineError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for LogBoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery(e) => write!(f, "Discovery error: {e}"),
            Self::Pipeline(e) => write!(f, "Pipeline error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LogBoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Discovery(e) => Some(e),
            Self::Pipeline(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Stable, serialisable classification of pipeline failures.
///
/// Used for per-kind counters in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnreadableFile,
    AmbiguousLineage,
    FormatUnrecognised,
    ParseError,
    OutOfOrderRecord,
    Write,
    VerificationFailed,
    DeletionError,
}

impl ErrorKind {
    /// Short machine-friendly label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnreadableFile => "unreadable_file",
            Self::AmbiguousLineage => "ambiguous_lineage",
            Self::FormatUnrecognised => "format_unrecognised",
            Self::ParseError => "parse_error",
            Self::OutOfOrderRecord => "out_of_order_record",
            Self::Write => "write",
            Self::VerificationFailed => "verification_failed",
            Self::DeletionError => "deletion_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors scoped to a single lineage (or a single file inside it).
///
/// None of these ever escalate beyond the lineage that produced them.
#[derive(Debug)]
pub enum PipelineError {
    /// The file could not be opened or decompressed.
    UnreadableFile { path: PathBuf, source: io::Error },

    /// Two or more files claim the same rotation position, or the lineage
    /// mixes incompatible suffix kinds.
    AmbiguousLineage {
        directory: PathBuf,
        base: String,
        position: String,
        paths: Vec<PathBuf>,
    },

    /// None of the configured formats matched the sampled lines.
    FormatUnrecognised { path: PathBuf, sampled_lines: usize },

    /// Creating, appending to, or syncing an output file failed.
    Write {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },

    /// A closed output stream is shorter than what was written to it.
    VerificationFailed {
        path: PathBuf,
        expected_min: u64,
        actual: u64,
    },

    /// An input file could not be deleted after commit.
    Deletion { path: PathBuf, source: io::Error },
}

impl PipelineError {
    /// Classification used by counters and structured events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnreadableFile { .. } => ErrorKind::UnreadableFile,
            Self::AmbiguousLineage { .. } => ErrorKind::AmbiguousLineage,
            Self::FormatUnrecognised { .. } => ErrorKind::FormatUnrecognised,
            Self::Write { .. } => ErrorKind::Write,
            Self::VerificationFailed { .. } => ErrorKind::VerificationFailed,
            Self::Deletion { .. } => ErrorKind::DeletionError,
        }
    }

    /// The file most closely associated with the failure, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::UnreadableFile { path, .. }
            | Self::FormatUnrecognised { path, .. }
            | Self::Write { path, .. }
            | Self::VerificationFailed { path, .. }
            | Self::Deletion { path, .. } => Some(path),
            Self::AmbiguousLineage { paths, .. } => paths.first(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnreadableFile { path, source } => {
                write!(f, "'{}' is unreadable: {source}", path.display())
            }
            Self::AmbiguousLineage {
                directory,
                base,
                position,
                paths,
            } => {
                let names: Vec<String> = paths
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect();
                write!(
                    f,
                    "lineage '{base}' in '{}' is ambiguous at {position}: {}",
                    directory.display(),
                    names.join(", ")
                )
            }
            Self::FormatUnrecognised {
                path,
                sampled_lines,
            } => write!(
                f,
                "'{}': no configured format matched the first {sampled_lines} lines",
                path.display()
            ),
            Self::Write {
                path,
                operation,
                source,
            } => write!(
                f,
                "output error during {operation} on '{}': {source}",
                path.display()
            ),
            Self::VerificationFailed {
                path,
                expected_min,
                actual,
            } => write!(
                f,
                "'{}' is {actual} bytes after close, expected at least {expected_min}",
                path.display()
            ),
            Self::Deletion { path, source } => {
                write!(f, "cannot delete '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnreadableFile { source, .. } => Some(source),
            Self::Write { source, .. } => Some(source),
            Self::Deletion { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<PipelineError> for LogBoopError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// A single record-level parse failure. Always recovered by skipping.
#[derive(Debug, Clone, Serialize)]
pub enum ParseError {
    /// The line carries no timestamp recognised by the file's format.
    NoTimestamp {
        file: PathBuf,
        offset: u64,
        preview: String,
    },

    /// A continuation line appeared before the first record of the file.
    OrphanContinuation { file: PathBuf, offset: u64 },
}

impl ParseError {
    /// Byte offset of the offending line in the decoded stream.
    pub fn offset(&self) -> u64 {
        match self {
            Self::NoTimestamp { offset, .. } | Self::OrphanContinuation { offset, .. } => *offset,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTimestamp {
                file,
                offset,
                preview,
            } => write!(
                f,
                "'{}' offset {offset}: no timestamp in '{preview}'",
                file.display()
            ),
            Self::OrphanContinuation { file, offset } => write!(
                f,
                "'{}' offset {offset}: continuation line before first record",
                file.display()
            ),
        }
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Errors related to input discovery.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The input root does not exist or is not accessible.
    RootNotFound { path: PathBuf },

    /// The input root is not a directory.
    NotADirectory { path: PathBuf },

    /// Permission denied accessing the input root.
    PermissionDenied { path: PathBuf, source: io::Error },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootNotFound { path } => {
                write!(f, "Input path '{}' does not exist", path.display())
            }
            Self::NotADirectory { path } => {
                write!(f, "Input path '{}' is not a directory", path.display())
            }
            Self::PermissionDenied { path, source } => {
                write!(
                    f,
                    "Permission denied accessing '{}': {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PermissionDenied { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DiscoveryError> for LogBoopError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// A regex in the config is invalid or too long.
    InvalidRegex {
        field: String,
        pattern: String,
        reason: String,
    },

    /// A regex lacks a required named capture group.
    MissingCaptureGroup {
        field: String,
        pattern: String,
        group: &'static str,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::InvalidRegex {
                field,
                pattern,
                reason,
            } => write!(f, "Config '{field}': invalid regex '{pattern}': {reason}"),
            Self::MissingCaptureGroup {
                field,
                pattern,
                group,
            } => write!(
                f,
                "Config '{field}': regex '{pattern}' has no named group '{group}'"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for LogBoopError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for LogBoop results.
pub type Result<T> = std::result::Result<T, LogBoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_kind_and_path() {
        let err = PipelineError::UnreadableFile {
            path: PathBuf::from("/var/log/app.log.1"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(err.kind(), ErrorKind::UnreadableFile);
        assert_eq!(err.path(), Some(&PathBuf::from("/var/log/app.log.1")));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_ambiguous_lineage_display_lists_file_names() {
        let err = PipelineError::AmbiguousLineage {
            directory: PathBuf::from("/logs"),
            base: "svc.log".to_string(),
            position: "rotation index 1".to_string(),
            paths: vec![
                PathBuf::from("/logs/svc.log.1"),
                PathBuf::from("/logs/svc.log.01"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("svc.log.1"), "got: {text}");
        assert!(text.contains("svc.log.01"), "got: {text}");
        assert!(text.contains("rotation index 1"), "got: {text}");
    }

    #[test]
    fn test_top_level_wraps_source_chain() {
        let inner = DiscoveryError::RootNotFound {
            path: PathBuf::from("/missing"),
        };
        let outer: LogBoopError = inner.into();
        assert!(outer.to_string().starts_with("Discovery error"));
        assert!(std::error::Error::source(&outer).is_some());
    }
}
