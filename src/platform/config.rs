// LogBoop - platform/config.rs
//
// Platform-specific configuration, config directory resolution, and
// config.toml loading with startup validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::core::discovery::DiscoveryConfig;
use crate::core::model::MultilineMode;
use crate::core::parser::{LogFormat, BUILTIN_FORMAT_NAMES};
use crate::core::rotation::{RotationConfig, SuffixGrammar};
use crate::core::splitter::ClassifyPolicy;
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Resolved platform paths for LogBoop configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/logboop/ or %APPDATA%\LogBoop\)
    pub config_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            tracing::debug!(config = %config_dir.display(), "Platform paths resolved");
            Self { config_dir }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self {
                config_dir: PathBuf::from("."),
            }
        }
    }

    /// Default location of config.toml.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// config.toml shape
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored for forward compatibility -- a newer
/// config file can be used with an older binary without crashing.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub discovery: DiscoverySection,
    pub rotation: RotationSection,
    pub parsing: ParsingSection,
    pub split: SplitSection,
    pub output: OutputSection,
    pub commit: CommitSection,
    pub workers: WorkersSection,
    pub logging: LoggingSection,
}

/// `[discovery]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Maximum directory recursion depth.
    pub max_depth: Option<usize>,
    /// Include glob patterns.
    pub include_patterns: Option<Vec<String>>,
    /// Exclude glob patterns.
    pub exclude_patterns: Option<Vec<String>>,
}

/// `[rotation]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RotationSection {
    /// "numeric", "dated" or "mixed".
    pub suffix_grammar: Option<String>,
    /// Whether unsuffixed files are processed too.
    pub include_active: Option<bool>,
    /// Extensions read through the gzip decoder.
    pub gzip_extensions: Option<Vec<String>>,
    /// Compressed extensions that cannot be decoded.
    pub opaque_extensions: Option<Vec<String>>,
}

/// `[parsing]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ParsingSection {
    /// Format names in detection order.
    pub formats: Option<Vec<String>>,
    /// "skip" or "continuation".
    pub multiline: Option<String>,
    /// Lines sampled for format detection.
    pub content_detection_lines: Option<usize>,
    /// `[[parsing.custom_formats]]` tables.
    pub custom_formats: Vec<CustomFormatSection>,
}

/// One `[[parsing.custom_formats]]` entry.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct CustomFormatSection {
    pub name: String,
    /// Regex with a named `timestamp` group.
    pub pattern: String,
    /// chrono format string for the captured text.
    pub timestamp_format: String,
}

/// `[split]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SplitSection {
    /// "date", "fixed" or "pattern".
    pub policy: Option<String>,
    /// Regex for the "pattern" policy.
    pub key_pattern: Option<String>,
    /// Records compared at each rotation boundary.
    pub dedup_window: Option<usize>,
}

/// `[output]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub out_of_order_tolerance_secs: Option<i64>,
    /// Append gzip members to `<destination>.gz`.
    pub compress: Option<bool>,
}

/// `[commit]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct CommitSection {
    /// Delete input files after a lineage commits.
    pub delete_input: Option<bool>,
}

/// `[workers]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    /// Worker threads (0 = auto).
    pub threads: Option<usize>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
    /// Log file path (empty = stderr only).
    pub file: Option<String>,
}

// =============================================================================
// Validated configuration
// =============================================================================

/// Validated application configuration derived from `config.toml`.
///
/// All values are validated against named constants at load time.
/// Invalid values produce actionable warnings and fall back to defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub discovery: DiscoveryConfig,
    pub rotation: RotationConfig,

    // -- Parsing --
    /// Candidate formats in detection order.
    pub formats: Vec<LogFormat>,
    pub multiline: MultilineMode,
    pub content_detection_lines: usize,

    // -- Split --
    pub policy: ClassifyPolicy,
    pub dedup_window: usize,

    // -- Output / commit --
    pub out_of_order_tolerance_secs: i64,
    pub compress_output: bool,
    pub delete_input: bool,

    /// Worker threads (0 = one per CPU).
    pub worker_threads: usize,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
    /// Log file path.
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            rotation: RotationConfig::default(),
            formats: LogFormat::builtins(),
            multiline: MultilineMode::default(),
            content_detection_lines: constants::DEFAULT_CONTENT_DETECTION_LINES,
            policy: ClassifyPolicy::default(),
            dedup_window: constants::DEFAULT_DEDUP_WINDOW,
            out_of_order_tolerance_secs: constants::DEFAULT_OUT_OF_ORDER_TOLERANCE_SECS,
            compress_output: constants::DEFAULT_COMPRESS_OUTPUT,
            delete_input: true,
            worker_threads: constants::DEFAULT_WORKER_THREADS,
            log_level: None,
            log_file: None,
        }
    }
}

/// Read and parse `path`. `Ok(None)` when the file does not exist.
pub fn read_raw_config(path: &Path) -> Result<Option<RawConfig>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
}

/// Load and validate the config file at `path`.
///
/// Returns `AppConfig` with validated values and a list of non-fatal warnings.
/// If the file does not exist, returns defaults with no warnings (first-run).
/// If the file is unreadable or unparseable, returns defaults with a warning:
/// the run still proceeds but the user is informed.
pub fn load_config(path: &Path) -> (AppConfig, Vec<String>) {
    match read_raw_config(path) {
        Ok(Some(raw)) => {
            tracing::info!(path = %path.display(), "Loaded config.toml");
            validate(raw)
        }
        Ok(None) => {
            tracing::debug!(path = %path.display(), "No config.toml found; using defaults");
            (AppConfig::default(), Vec::new())
        }
        Err(e) => {
            let msg = format!("{e}. Using defaults.");
            tracing::warn!("{}", msg);
            (AppConfig::default(), vec![msg])
        }
    }
}

/// Validate each field against named constants, accumulating all warnings.
pub fn validate(raw: RawConfig) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();
    let mut config = AppConfig::default();

    // -- Discovery --
    if let Some(depth) = raw.discovery.max_depth {
        if (1..=constants::ABSOLUTE_MAX_DEPTH).contains(&depth) {
            config.discovery.max_depth = depth;
        } else {
            warnings.push(format!(
                "[discovery] max_depth = {depth} is out of range (1-{}). Using default ({}).",
                constants::ABSOLUTE_MAX_DEPTH,
                constants::DEFAULT_MAX_DEPTH,
            ));
        }
    }
    if let Some(patterns) = raw.discovery.include_patterns {
        config.discovery.include_patterns =
            valid_globs("[discovery] include_patterns", patterns, &mut warnings);
    }
    if let Some(patterns) = raw.discovery.exclude_patterns {
        config.discovery.exclude_patterns =
            valid_globs("[discovery] exclude_patterns", patterns, &mut warnings);
    }

    // -- Rotation --
    if let Some(ref grammar) = raw.rotation.suffix_grammar {
        match grammar.to_lowercase().as_str() {
            "numeric" => config.rotation.grammar = SuffixGrammar::Numeric,
            "dated" => config.rotation.grammar = SuffixGrammar::Dated,
            "mixed" => config.rotation.grammar = SuffixGrammar::Mixed,
            other => warnings.push(format!(
                "[rotation] suffix_grammar = \"{other}\" is not recognised. \
                 Expected \"numeric\", \"dated\" or \"mixed\". Using default (numeric).",
            )),
        }
    }
    if let Some(active) = raw.rotation.include_active {
        config.rotation.include_active = active;
    }
    if let Some(exts) = raw.rotation.gzip_extensions {
        config.rotation.gzip_extensions = normalise_extensions(exts);
    }
    if let Some(exts) = raw.rotation.opaque_extensions {
        config.rotation.opaque_extensions = normalise_extensions(exts);
    }

    // -- Parsing: custom formats, then detection order --
    let mut custom: Vec<LogFormat> = Vec::new();
    for entry in &raw.parsing.custom_formats {
        if entry.name.trim().is_empty() {
            warnings.push("[[parsing.custom_formats]] entry without a name ignored.".to_string());
            continue;
        }
        if BUILTIN_FORMAT_NAMES.contains(&entry.name.as_str())
            || custom.iter().any(|f| f.name() == entry.name)
        {
            warnings.push(format!(
                "[[parsing.custom_formats]] name \"{}\" is already taken. Entry ignored.",
                entry.name
            ));
            continue;
        }
        match LogFormat::custom(&entry.name, &entry.pattern, &entry.timestamp_format) {
            Ok(format) => custom.push(format),
            Err(e) => warnings.push(format!("{e}. Entry ignored.")),
        }
    }

    config.formats = match raw.parsing.formats {
        Some(names) => {
            let mut chosen: Vec<LogFormat> = Vec::new();
            for name in &names {
                let found = custom
                    .iter()
                    .find(|f| f.name() == name)
                    .cloned()
                    .or_else(|| LogFormat::builtin(name));
                match found {
                    Some(f) if !chosen.iter().any(|c| c.name() == f.name()) => chosen.push(f),
                    Some(_) => {}
                    None => warnings.push(format!(
                        "[parsing] formats: \"{name}\" is not a built-in or custom format. Ignored.",
                    )),
                }
            }
            if chosen.is_empty() {
                warnings.push(
                    "[parsing] formats lists no usable format. Using all known formats."
                        .to_string(),
                );
                LogFormat::builtins().into_iter().chain(custom).collect()
            } else {
                chosen
            }
        }
        None => LogFormat::builtins().into_iter().chain(custom).collect(),
    };

    if let Some(ref mode) = raw.parsing.multiline {
        match mode.to_lowercase().as_str() {
            "skip" => config.multiline = MultilineMode::Skip,
            "continuation" => config.multiline = MultilineMode::Continuation,
            other => warnings.push(format!(
                "[parsing] multiline = \"{other}\" is not recognised. \
                 Expected \"skip\" or \"continuation\". Using default (skip).",
            )),
        }
    }

    if let Some(lines) = raw.parsing.content_detection_lines {
        if (1..=constants::MAX_CONTENT_DETECTION_LINES).contains(&lines) {
            config.content_detection_lines = lines;
        } else {
            warnings.push(format!(
                "[parsing] content_detection_lines = {lines} is out of range (1-{}). Using default ({}).",
                constants::MAX_CONTENT_DETECTION_LINES,
                constants::DEFAULT_CONTENT_DETECTION_LINES,
            ));
        }
    }

    // -- Split --
    if let Some(ref policy) = raw.split.policy {
        match policy.to_lowercase().as_str() {
            "date" => config.policy = ClassifyPolicy::Date,
            "fixed" => config.policy = ClassifyPolicy::Fixed,
            "pattern" => match raw.split.key_pattern.as_deref() {
                Some(pattern) => match ClassifyPolicy::pattern(pattern) {
                    Ok(p) => config.policy = p,
                    Err(e) => warnings.push(format!("{e}. Using default policy (date).")),
                },
                None => warnings.push(
                    "[split] policy = \"pattern\" requires key_pattern. Using default policy (date)."
                        .to_string(),
                ),
            },
            other => warnings.push(format!(
                "[split] policy = \"{other}\" is not recognised. \
                 Expected \"date\", \"fixed\" or \"pattern\". Using default (date).",
            )),
        }
    }

    if let Some(window) = raw.split.dedup_window {
        if window <= constants::MAX_DEDUP_WINDOW {
            config.dedup_window = window;
        } else {
            warnings.push(format!(
                "[split] dedup_window = {window} is out of range (0-{}). Using default ({}).",
                constants::MAX_DEDUP_WINDOW,
                constants::DEFAULT_DEDUP_WINDOW,
            ));
        }
    }

    // -- Output / commit --
    if let Some(secs) = raw.output.out_of_order_tolerance_secs {
        if (0..=constants::MAX_OUT_OF_ORDER_TOLERANCE_SECS).contains(&secs) {
            config.out_of_order_tolerance_secs = secs;
        } else {
            warnings.push(format!(
                "[output] out_of_order_tolerance_secs = {secs} is out of range (0-{}). Using default ({}).",
                constants::MAX_OUT_OF_ORDER_TOLERANCE_SECS,
                constants::DEFAULT_OUT_OF_ORDER_TOLERANCE_SECS,
            ));
        }
    }

    if let Some(compress) = raw.output.compress {
        config.compress_output = compress;
    }

    if let Some(delete) = raw.commit.delete_input {
        config.delete_input = delete;
    }

    // -- Workers --
    if let Some(threads) = raw.workers.threads {
        if threads <= constants::MAX_WORKER_THREADS {
            config.worker_threads = threads;
        } else {
            warnings.push(format!(
                "[workers] threads = {threads} is out of range (0-{}). Using default (0 = auto).",
                constants::MAX_WORKER_THREADS,
            ));
        }
    }

    // -- Logging --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }
    if let Some(ref file) = raw.logging.file {
        if !file.is_empty() {
            config.log_file = Some(file.clone());
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(
            count = warnings.len(),
            "Config validation produced warnings"
        );
    }

    (config, warnings)
}

fn valid_globs(field: &str, patterns: Vec<String>, warnings: &mut Vec<String>) -> Vec<String> {
    patterns
        .into_iter()
        .filter(|p| match glob::Pattern::new(p) {
            Ok(_) => true,
            Err(e) => {
                warnings.push(format!("{field}: \"{p}\" is not a valid glob ({e}). Ignored."));
                false
            }
        })
        .collect()
}

fn normalise_extensions(exts: Vec<String>) -> Vec<String> {
    exts.into_iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn parse(text: &str) -> (AppConfig, Vec<String>) {
        validate(toml::from_str(text).expect("valid toml"))
    }

    #[test]
    fn test_empty_config_gives_defaults() {
        let (config, warnings) = parse("");
        assert!(warnings.is_empty());
        assert_eq!(config.formats.len(), BUILTIN_FORMAT_NAMES.len());
        assert_eq!(config.dedup_window, constants::DEFAULT_DEDUP_WINDOW);
        assert!(config.delete_input);
        assert!(!config.compress_output);
        assert_eq!(config.rotation.grammar, SuffixGrammar::Numeric);
        assert!(matches!(config.policy, ClassifyPolicy::Date));
    }

    #[test]
    fn test_full_config_is_applied() {
        let (config, warnings) = parse(
            r#"
            [discovery]
            max_depth = 3
            exclude_patterns = ["*.bak"]

            [rotation]
            suffix_grammar = "mixed"
            include_active = false
            gzip_extensions = [".GZ"]

            [parsing]
            formats = ["veeam", "iso"]
            multiline = "continuation"
            content_detection_lines = 5

            [[parsing.custom_formats]]
            name = "veeam"
            pattern = '^\[(?P<timestamp>\d{2}\.\d{2}\.\d{4} \d{2}:\d{2}:\d{2})\]'
            timestamp_format = "%d.%m.%Y %H:%M:%S"

            [split]
            policy = "pattern"
            key_pattern = 'host=(?P<key>\S+)'
            dedup_window = 8

            [output]
            out_of_order_tolerance_secs = 30
            compress = true

            [commit]
            delete_input = false

            [workers]
            threads = 4

            [logging]
            level = "DEBUG"
            "#,
        );
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        assert_eq!(config.discovery.max_depth, 3);
        assert_eq!(config.discovery.exclude_patterns, ["*.bak"]);
        assert_eq!(config.rotation.grammar, SuffixGrammar::Mixed);
        assert!(!config.rotation.include_active);
        assert_eq!(config.rotation.gzip_extensions, ["gz"]);
        let names: Vec<&str> = config.formats.iter().map(LogFormat::name).collect();
        assert_eq!(names, ["veeam", "iso"]);
        assert_eq!(config.multiline, MultilineMode::Continuation);
        assert_eq!(config.content_detection_lines, 5);
        assert!(matches!(config.policy, ClassifyPolicy::Pattern(_)));
        assert_eq!(config.dedup_window, 8);
        assert_eq!(config.out_of_order_tolerance_secs, 30);
        assert!(config.compress_output);
        assert!(!config.delete_input);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_invalid_values_warn_and_fall_back() {
        let (config, warnings) = parse(
            r#"
            [discovery]
            max_depth = 0
            [rotation]
            suffix_grammar = "weekly"
            [parsing]
            formats = ["nope"]
            content_detection_lines = 0
            [split]
            policy = "pattern"
            dedup_window = 999999
            [workers]
            threads = 100000
            [logging]
            level = "loud"
            "#,
        );
        assert_eq!(warnings.len(), 9, "got: {warnings:#?}");
        assert_eq!(config.discovery.max_depth, constants::DEFAULT_MAX_DEPTH);
        assert_eq!(config.rotation.grammar, SuffixGrammar::Numeric);
        assert_eq!(config.formats.len(), BUILTIN_FORMAT_NAMES.len());
        assert!(matches!(config.policy, ClassifyPolicy::Date));
        assert_eq!(config.dedup_window, constants::DEFAULT_DEDUP_WINDOW);
        assert_eq!(config.worker_threads, constants::DEFAULT_WORKER_THREADS);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_bad_custom_format_is_ignored_with_warning() {
        let (config, warnings) = parse(
            r#"
            [[parsing.custom_formats]]
            name = "broken"
            pattern = '^(\d+)'
            timestamp_format = "%s"

            [[parsing.custom_formats]]
            name = "iso"
            pattern = '^(?P<timestamp>\d+)'
            timestamp_format = "%s"
            "#,
        );
        assert_eq!(warnings.len(), 2, "got: {warnings:#?}");
        assert_eq!(config.formats.len(), BUILTIN_FORMAT_NAMES.len());
    }

    #[test]
    fn test_load_config_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let (_, warnings) = load_config(&missing);
        assert!(warnings.is_empty());

        let bad = dir.path().join(constants::CONFIG_FILE_NAME);
        fs::write(&bad, "[discovery\nmax_depth = ").unwrap();
        let (config, warnings) = load_config(&bad);
        assert_eq!(warnings.len(), 1);
        assert_eq!(config.discovery.max_depth, constants::DEFAULT_MAX_DEPTH);
        assert!(matches!(
            read_raw_config(&bad),
            Err(ConfigError::TomlParse { .. })
        ));
    }
}
