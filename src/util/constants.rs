// LogBoop - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LogBoop";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "LogBoop";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Output root used when the CLI is given only an input directory.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

// =============================================================================
// Discovery limits
// =============================================================================

/// Maximum directory recursion depth during discovery.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Hard upper bound on max depth (prevents infinite traversal).
pub const ABSOLUTE_MAX_DEPTH: usize = 50;

/// Default include glob patterns. Empty means every file is a candidate.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[];

/// Default exclude glob patterns for input discovery.
///
/// Literal patterns also prune directories with that name.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[".git", "*.tmp", "*.swp", "*.lock"];

// =============================================================================
// Rotation
// =============================================================================

/// File extensions recognised as gzip-compressed rotations.
pub const DEFAULT_GZIP_EXTENSIONS: &[&str] = &["gz"];

/// Compressed extensions that are recognised but cannot be decoded.
/// Files carrying them join their lineage and make it fail as unreadable.
pub const DEFAULT_OPAQUE_COMPRESSED_EXTENSIONS: &[&str] = &["bz2", "xz", "zst", "lz4", "zip"];

// =============================================================================
// Parsing limits
// =============================================================================

/// Number of lines sampled from the start of a file to resolve its format.
pub const DEFAULT_CONTENT_DETECTION_LINES: usize = 20;

/// Hard upper bound on the detection sample.
pub const MAX_CONTENT_DETECTION_LINES: usize = 1_000;

/// Maximum number of parse-error details retained per file.
/// The error *count* is always exact; only the detail list is capped.
pub const MAX_PARSE_ERRORS_PER_FILE: usize = 100;

/// Maximum regex pattern length to prevent ReDoS.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4_096;

/// Records more than this far in the future (after year injection for
/// year-less syslog timestamps) are moved back one year.
pub const SYSLOG_FUTURE_SLACK_HOURS: i64 = 24;

// =============================================================================
// Splitting
// =============================================================================

/// Key used when a record's classification key cannot be extracted.
pub const UNCLASSIFIED_KEY: &str = "unclassified";

/// Default number of records compared on each side of a rotation boundary.
pub const DEFAULT_DEDUP_WINDOW: usize = 64;

/// Hard upper bound on the de-duplication window.
pub const MAX_DEDUP_WINDOW: usize = 10_000;

// =============================================================================
// Output
// =============================================================================

/// Default allowed backwards step (seconds) before a record is reported as
/// out of order. Zero means strictly non-decreasing.
pub const DEFAULT_OUT_OF_ORDER_TOLERANCE_SECS: i64 = 0;

/// Maximum configurable out-of-order tolerance (one day).
pub const MAX_OUT_OF_ORDER_TOLERANCE_SECS: i64 = 86_400;

/// Buffer capacity of each output stream.
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// Whether destinations are written as gzip members by default.
pub const DEFAULT_COMPRESS_OUTPUT: bool = false;

/// Extension appended to destination names when output is compressed.
pub const OUTPUT_GZIP_EXTENSION: &str = "gz";

// =============================================================================
// Workers
// =============================================================================

/// Default number of worker threads. 0 means one per CPU core.
pub const DEFAULT_WORKER_THREADS: usize = 0;

/// Hard upper bound on worker threads.
pub const MAX_WORKER_THREADS: usize = 256;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a log line included in debug output.
/// Prevents accidental exposure of sensitive data in long lines.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";
