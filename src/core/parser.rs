// LogBoop - core/parser.rs
//
// Timestamp formats and per-line timestamp extraction.
// Core layer: operates on strings only, never touches the filesystem.
//
// A format is a regex with a named `timestamp` capture group plus a way to
// turn the captured text into an instant that keeps the line's own offset.
// Five formats are built in; more can be declared in config.toml.

use crate::util::constants;
use crate::util::error::ConfigError;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::fmt;

/// Names of the built-in formats, in default detection order.
pub const BUILTIN_FORMAT_NAMES: &[&str] =
    &["syslog", "iso", "apache-access", "apache-error", "grafana"];

const MONTHS: &str = "Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec";
const WEEKDAYS: &str = "Mon|Tue|Wed|Thu|Fri|Sat|Sun";

/// How the captured timestamp text is converted.
#[derive(Clone)]
enum Converter {
    /// Hand-written conversion for a built-in format.
    Builtin(fn(&str) -> Option<DateTime<FixedOffset>>),
    /// chrono format string from a user-defined format.
    Chrono(String),
}

/// A named log line format.
#[derive(Clone)]
pub struct LogFormat {
    name: String,
    pattern: Regex,
    converter: Converter,
}

impl fmt::Debug for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogFormat")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

impl LogFormat {
    /// Look up a built-in format by name.
    pub fn builtin(name: &str) -> Option<LogFormat> {
        let (pattern, convert): (String, fn(&str) -> Option<DateTime<FixedOffset>>) = match name {
            "syslog" => (
                format!(r"^(?P<timestamp>(?:{MONTHS}) +\d{{1,2}} \d{{2}}:\d{{2}}:\d{{2}})\b"),
                parse_syslog,
            ),
            "iso" => (
                r"^(?P<timestamp>\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?)?)"
                    .to_string(),
                parse_iso,
            ),
            "apache-access" => (
                format!(
                    r"\[(?P<timestamp>\d{{2}}/(?:{MONTHS})/\d{{4}}:\d{{2}}:\d{{2}}:\d{{2}} [+-]\d{{4}})\]"
                ),
                parse_apache_access,
            ),
            "apache-error" => (
                format!(
                    r"^\[(?P<timestamp>(?:{WEEKDAYS}) (?:{MONTHS}) +\d{{1,2}} \d{{2}}:\d{{2}}:\d{{2}}(?:\.\d+)? \d{{4}})\]"
                ),
                parse_apache_error,
            ),
            "grafana" => (
                r"^t=(?P<timestamp>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:Z|[+-]\d{2}:?\d{2})) ".to_string(),
                parse_iso,
            ),
            _ => return None,
        };
        // Built-in patterns are covered by unit tests; a failure here is a
        // programming error, surfaced as "unknown format" rather than a panic.
        let pattern = Regex::new(&pattern).ok()?;
        Some(LogFormat {
            name: name.to_string(),
            pattern,
            converter: Converter::Builtin(convert),
        })
    }

    /// All built-in formats in default detection order.
    pub fn builtins() -> Vec<LogFormat> {
        BUILTIN_FORMAT_NAMES
            .iter()
            .filter_map(|n| LogFormat::builtin(n))
            .collect()
    }

    /// Compile a user-defined format.
    ///
    /// `pattern` must contain a named `timestamp` group; `timestamp_format` is
    /// a chrono format string applied to the captured text.
    pub fn custom(
        name: &str,
        pattern: &str,
        timestamp_format: &str,
    ) -> Result<LogFormat, ConfigError> {
        let field = format!("parsing.custom_formats.{name}.pattern");
        if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
            return Err(ConfigError::InvalidRegex {
                field,
                pattern: pattern.to_string(),
                reason: format!(
                    "pattern is {} chars, maximum is {}",
                    pattern.len(),
                    constants::MAX_REGEX_PATTERN_LENGTH
                ),
            });
        }
        let compiled = Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            field: field.clone(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        if !compiled.capture_names().any(|n| n == Some("timestamp")) {
            return Err(ConfigError::MissingCaptureGroup {
                field,
                pattern: pattern.to_string(),
                group: "timestamp",
            });
        }
        if timestamp_format.trim().is_empty() {
            return Err(ConfigError::ValueOutOfRange {
                field: format!("parsing.custom_formats.{name}.timestamp_format"),
                value: timestamp_format.to_string(),
                expected: "a non-empty chrono format string".to_string(),
            });
        }
        Ok(LogFormat {
            name: name.to_string(),
            pattern: compiled,
            converter: Converter::Chrono(timestamp_format.to_string()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extract the timestamp of `line` as written, keeping its UTC offset
    /// (`+00:00` when the line carries none). `None` when the line does not
    /// carry a timestamp in this format.
    pub fn parse(&self, line: &str) -> Option<DateTime<FixedOffset>> {
        let caps = self.pattern.captures(line)?;
        let raw = caps.name("timestamp")?.as_str();
        match &self.converter {
            Converter::Builtin(convert) => convert(raw),
            Converter::Chrono(format) => parse_timestamp(raw, format).ok(),
        }
    }

    /// UTC view of [`LogFormat::parse`].
    pub fn timestamp(&self, line: &str) -> Option<DateTime<Utc>> {
        self.parse(line).map(|t| t.with_timezone(&Utc))
    }
}

/// Pick the first format (in the given order) that parses any sampled line.
pub fn detect_format<'a, S: AsRef<str>>(
    sample: &[S],
    formats: &'a [LogFormat],
) -> Option<&'a LogFormat> {
    formats
        .iter()
        .find(|f| sample.iter().any(|line| f.timestamp(line.as_ref()).is_some()))
}

// =============================================================================
// Built-in converters
// =============================================================================

fn parse_syslog(raw: &str) -> Option<DateTime<FixedOffset>> {
    // "May  6 02:07:16" -> "May 6 02:07:16"
    let normalised = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    resolve_yearless(&normalised, Utc::now()).map(|t| t.fixed_offset())
}

/// Resolve a year-less `"%b %d %H:%M:%S"` timestamp against `now`.
///
/// The current year is assumed. When that places the record more than
/// `SYSLOG_FUTURE_SLACK_HOURS` in the future (December logs read in January),
/// the previous year is used instead. Feb 29 falls back to the previous year
/// when the current one is not a leap year.
pub fn resolve_yearless(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parse_in = |year: i32| {
        NaiveDateTime::parse_from_str(&format!("{year} {raw}"), "%Y %b %d %H:%M:%S")
            .ok()
            .map(|ndt| ndt.and_utc())
    };
    let year = now.year();
    match parse_in(year) {
        Some(ts) if ts > now + Duration::hours(constants::SYSLOG_FUTURE_SLACK_HOURS) => {
            parse_in(year - 1)
        }
        Some(ts) => Some(ts),
        None => parse_in(year - 1),
    }
}

fn parse_iso(raw: &str) -> Option<DateTime<FixedOffset>> {
    // Comma milliseconds (log4j) and the `T` separator are normalised so a
    // single set of chrono formats covers every variant.
    let s = raw.replace(',', ".").replacen('T', " ", 1);

    if let Some(naive) = s.strip_suffix('Z') {
        return parse_naive(naive);
    }

    let has_offset = s.len() > 10 && s[10..].contains(['+', '-']);
    if has_offset {
        for format in ["%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%z"] {
            if let Ok(dt) = DateTime::parse_from_str(&s, format) {
                return Some(dt);
            }
        }
        return None;
    }

    parse_naive(&s)
}

fn parse_naive(s: &str) -> Option<DateTime<FixedOffset>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|ndt| ndt.and_utc().fixed_offset())
}

fn parse_apache_access(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(raw, "%d/%b/%Y:%H:%M:%S %z").ok()
}

fn parse_apache_error(raw: &str) -> Option<DateTime<FixedOffset>> {
    let normalised = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalised, "%a %b %d %H:%M:%S%.f %Y")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalised, "%a %b %d %H:%M:%S %Y"))
        .ok()
        .map(|ndt| ndt.and_utc().fixed_offset())
}

// =============================================================================
// User-defined formats
// =============================================================================

/// Parse `raw` with a chrono format string.
///
/// Tries, in order: full date-time, date only (midnight UTC), date-time with
/// offset, RFC 3339, and current-year injection for formats without a year.
fn parse_timestamp(raw: &str, format: &str) -> Result<DateTime<FixedOffset>, String> {
    let trimmed = raw.trim();

    if let Ok(ndt) = NaiveDateTime::parse_from_str(trimmed, format) {
        return Ok(ndt.and_utc().fixed_offset());
    }

    if let Ok(nd) = NaiveDate::parse_from_str(trimmed, format) {
        if let Some(ndt) = nd.and_hms_opt(0, 0, 0) {
            return Ok(ndt.and_utc().fixed_offset());
        }
    }

    if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
        return Ok(dt);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt);
    }

    // Year-less formats (BSD syslog style): inject the current UTC year.
    if !format.contains("%Y") && !format.contains("%y") && !format.contains("%C") {
        let year = Utc::now().year();
        let with_year = format!("{year} {trimmed}");
        let year_format = format!("%Y {format}");
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&with_year, &year_format) {
            return Ok(ndt.and_utc().fixed_offset());
        }
    }

    Err(format!("cannot parse '{trimmed}' with format '{format}'"))
}
