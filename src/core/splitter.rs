// LogBoop - core/splitter.rs
//
// Stream splitting: boundary de-duplication and record classification.
//
// The splitter sees the records of one lineage in order (oldest file first)
// and is push-driven: the commit controller feeds it one record at a time so
// only one read handle is ever open. A rotation boundary is recognised by a
// change of `origin.file_position`.

use crate::core::model::Record;
use crate::util::constants;
use crate::util::error::ConfigError;
use regex::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Key used by the `fixed` policy.
const FIXED_KEY: &str = "all";

/// How records are routed to output streams.
#[derive(Debug, Clone, Default)]
pub enum ClassifyPolicy {
    /// One stream per calendar day, as written on the record's own line.
    #[default]
    Date,
    /// A single stream per lineage.
    Fixed,
    /// Key extracted from the payload by a regex.
    Pattern(Regex),
}

impl ClassifyPolicy {
    /// Compile a `pattern` policy.
    ///
    /// The regex must have a named `key` group or at least one positional
    /// group; the named group wins when both exist.
    pub fn pattern(pattern: &str) -> Result<Self, ConfigError> {
        let field = "split.key_pattern".to_string();
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
        let re = Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            field: field.clone(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        if re.captures_len() < 2 {
            return Err(ConfigError::MissingCaptureGroup {
                field,
                pattern: pattern.to_string(),
                group: "key",
            });
        }
        Ok(ClassifyPolicy::Pattern(re))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClassifyPolicy::Date => "date",
            ClassifyPolicy::Fixed => "fixed",
            ClassifyPolicy::Pattern(_) => "pattern",
        }
    }
}

/// Reduce a raw key to a single safe path component.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`. Empty, `.` and `..`
/// map to the unclassified key.
pub fn sanitize_key(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => constants::UNCLASSIFIED_KEY.to_string(),
        _ => cleaned,
    }
}

/// Destination path of `key` for a lineage with base name `base`.
pub fn destination_path(dir: &Path, base: &str, key: &str, policy: &ClassifyPolicy) -> PathBuf {
    match policy {
        ClassifyPolicy::Fixed => dir.join(base),
        _ => dir.join(format!("{base}-{key}")),
    }
}

/// Counters kept by the splitter for one lineage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitStats {
    /// Records passed on to the writer.
    pub records: u64,
    /// Boundary duplicates dropped.
    pub duplicates_dropped: u64,
    /// Records routed to the unclassified key.
    pub unclassified: u64,
}

/// Per-lineage splitter.
pub struct Splitter<'p> {
    policy: &'p ClassifyPolicy,
    window: usize,
    /// Last `window` records of the previous non-empty file, each with an
    /// "already absorbed a duplicate" flag.
    previous_tail: Vec<(Record, bool)>,
    /// Last `window` records of the current file so far.
    current_tail: VecDeque<Record>,
    current_file: Option<usize>,
    seen_in_current: usize,
    stats: SplitStats,
}

impl<'p> Splitter<'p> {
    /// `window` is the number of records compared on each side of a
    /// boundary; 0 disables boundary de-duplication.
    pub fn new(policy: &'p ClassifyPolicy, window: usize) -> Self {
        Self {
            policy,
            window,
            previous_tail: Vec::new(),
            current_tail: VecDeque::new(),
            current_file: None,
            seen_in_current: 0,
            stats: SplitStats::default(),
        }
    }

    /// Accept the next record of the lineage.
    ///
    /// Returns the classified record, or `None` when it duplicates a record
    /// at the end of the previous file.
    pub fn accept(&mut self, record: Record) -> Option<(String, Record)> {
        if self.current_file != Some(record.origin.file_position) {
            self.start_file(record.origin.file_position);
        }

        if self.window == 0 {
            return Some(self.classify(record));
        }

        let in_head = self.seen_in_current < self.window;
        self.seen_in_current += 1;

        self.current_tail.push_back(record.clone());
        if self.current_tail.len() > self.window {
            self.current_tail.pop_front();
        }

        if in_head {
            let hit = self.previous_tail.iter_mut().find(|(prev, absorbed)| {
                !*absorbed && prev.timestamp == record.timestamp && prev.payload == record.payload
            });
            if let Some((_, absorbed)) = hit {
                *absorbed = true;
                self.stats.duplicates_dropped += 1;
                tracing::trace!(
                    file = %record.origin.path.display(),
                    offset = record.origin.offset,
                    "Boundary duplicate dropped"
                );
                return None;
            }
        }

        Some(self.classify(record))
    }

    pub fn stats(&self) -> SplitStats {
        self.stats
    }

    fn start_file(&mut self, position: usize) {
        // An empty file leaves the previous tail in place.
        if !self.current_tail.is_empty() {
            self.previous_tail = self.current_tail.drain(..).map(|r| (r, false)).collect();
        }
        self.current_file = Some(position);
        self.seen_in_current = 0;
    }

    fn classify(&mut self, record: Record) -> (String, Record) {
        self.stats.records += 1;
        let policy = self.policy;
        let key = match policy {
            ClassifyPolicy::Date => record.local_date.format("%Y-%m-%d").to_string(),
            ClassifyPolicy::Fixed => FIXED_KEY.to_string(),
            ClassifyPolicy::Pattern(re) => {
                let text = record.text();
                let extracted = re.captures(&text).and_then(|caps| {
                    caps.name("key")
                        .or_else(|| caps.get(1))
                        .map(|m| m.as_str().to_string())
                });
                match extracted {
                    Some(raw) if !raw.is_empty() => sanitize_key(&raw),
                    _ => {
                        self.stats.unclassified += 1;
                        constants::UNCLASSIFIED_KEY.to_string()
                    }
                }
            }
        };
        (key, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::RecordOrigin;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn rec(file_position: usize, secs: u32, payload: &str) -> Record {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap();
        Record {
            timestamp,
            local_date: timestamp.date_naive(),
            payload: payload.as_bytes().to_vec(),
            origin: RecordOrigin {
                path: Arc::from(Path::new("/in/app.log")),
                file_position,
                offset: 0,
            },
        }
    }

    fn run(splitter: &mut Splitter<'_>, records: Vec<Record>) -> Vec<String> {
        records
            .into_iter()
            .filter_map(|r| splitter.accept(r))
            .map(|(_, r)| r.text().into_owned())
            .collect()
    }

    #[test]
    fn test_boundary_duplicates_are_dropped_once() {
        let policy = ClassifyPolicy::Date;
        let mut s = Splitter::new(&policy, 4);
        let out = run(
            &mut s,
            vec![
                rec(0, 1, "a"),
                rec(0, 2, "b"),
                rec(1, 2, "b"),
                rec(1, 3, "c"),
                rec(2, 3, "c"),
                rec(2, 4, "d"),
            ],
        );
        assert_eq!(out, ["a", "b", "c", "d"]);
        assert_eq!(s.stats().duplicates_dropped, 2);
        assert_eq!(s.stats().records, 4);
    }

    #[test]
    fn test_each_previous_record_absorbs_one_copy() {
        let policy = ClassifyPolicy::Date;
        let mut s = Splitter::new(&policy, 4);
        let out = run(
            &mut s,
            vec![rec(0, 1, "x"), rec(1, 1, "x"), rec(1, 1, "x")],
        );
        assert_eq!(out, ["x", "x"]);
    }

    #[test]
    fn test_repeats_inside_one_file_are_kept() {
        let policy = ClassifyPolicy::Date;
        let mut s = Splitter::new(&policy, 4);
        let out = run(&mut s, vec![rec(0, 1, "x"), rec(0, 1, "x")]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_same_payload_other_timestamp_is_not_a_duplicate() {
        let policy = ClassifyPolicy::Date;
        let mut s = Splitter::new(&policy, 4);
        let out = run(&mut s, vec![rec(0, 1, "x"), rec(1, 2, "x")]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_window_limits_comparison() {
        let policy = ClassifyPolicy::Date;
        let mut s = Splitter::new(&policy, 1);
        // "a" is outside the previous file's last-1 tail.
        let out = run(
            &mut s,
            vec![rec(0, 1, "a"), rec(0, 2, "b"), rec(1, 1, "a")],
        );
        assert_eq!(out, ["a", "b", "a"]);

        let mut off = Splitter::new(&policy, 0);
        let out = run(&mut off, vec![rec(0, 1, "a"), rec(1, 1, "a")]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_date_and_fixed_keys() {
        let date = ClassifyPolicy::Date;
        let mut s = Splitter::new(&date, 0);
        let (key, _) = s.accept(rec(0, 1, "a")).unwrap();
        assert_eq!(key, "2024-01-01");
        assert_eq!(
            destination_path(Path::new("/out"), "app.log", &key, &date),
            PathBuf::from("/out/app.log-2024-01-01")
        );

        let fixed = ClassifyPolicy::Fixed;
        let mut s = Splitter::new(&fixed, 0);
        let (key, _) = s.accept(rec(0, 1, "a")).unwrap();
        assert_eq!(
            destination_path(Path::new("/out"), "app.log", &key, &fixed),
            PathBuf::from("/out/app.log")
        );
    }

    #[test]
    fn test_date_key_follows_the_line_not_utc() {
        let date = ClassifyPolicy::Date;
        let mut s = Splitter::new(&date, 0);
        // 2020-05-13T01:00:00+02:00 is still May 12th in UTC.
        let mut r = rec(0, 0, "t=2020-05-13T01:00:00+0200 lvl=info");
        r.timestamp = Utc.with_ymd_and_hms(2020, 5, 12, 23, 0, 0).unwrap();
        r.local_date = chrono::NaiveDate::from_ymd_opt(2020, 5, 13).unwrap();
        let (key, _) = s.accept(r).unwrap();
        assert_eq!(key, "2020-05-13");
    }

    #[test]
    fn test_pattern_keys_and_unclassified() {
        let policy = ClassifyPolicy::pattern(r"\[(?P<key>[^\]]*)\]").unwrap();
        let mut s = Splitter::new(&policy, 0);
        let (k1, _) = s.accept(rec(0, 1, "2024 [web/1] hi")).unwrap();
        let (k2, _) = s.accept(rec(0, 2, "2024 no brackets")).unwrap();
        let (k3, _) = s.accept(rec(0, 3, "2024 [] empty")).unwrap();
        assert_eq!(k1, "web_1");
        assert_eq!(k2, constants::UNCLASSIFIED_KEY);
        assert_eq!(k3, constants::UNCLASSIFIED_KEY);
        assert_eq!(s.stats().unclassified, 2);
        assert_eq!(s.stats().records, 3, "unclassified records are still routed");
    }

    #[test]
    fn test_pattern_policy_validation() {
        assert!(ClassifyPolicy::pattern(r"(\w+)").is_ok());
        assert!(matches!(
            ClassifyPolicy::pattern(r"\w+"),
            Err(ConfigError::MissingCaptureGroup { .. })
        ));
        assert!(matches!(
            ClassifyPolicy::pattern(r"(\w+"),
            Err(ConfigError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("web-01.eu"), "web-01.eu");
        assert_eq!(sanitize_key("a/b\\c d"), "a_b_c_d");
        assert_eq!(sanitize_key(".."), constants::UNCLASSIFIED_KEY);
        assert_eq!(sanitize_key(""), constants::UNCLASSIFIED_KEY);
    }
}
