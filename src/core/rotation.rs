// LogBoop - core/rotation.rs
//
// Rotation lineage detection.
//
// Turns file names into (base, suffix, compression) triples and groups the
// files of one directory into lineages ordered oldest first. Pure name
// analysis: no file is opened here.
//
// Suffix grammar (configurable):
//   numeric   <base>.<N>                   larger N is older
//   dated     <base>-YYYYMMDD              earlier date is older
//             <base>-YYYY-MM-DD            (`-`, `_` or `.` as separators)
//   mixed     both of the above
// A compression extension (`.gz`, ...) is stripped before the suffix is
// parsed. A name with no recognised suffix is the active file.

use crate::core::model::{Compression, InputFile, Lineage, LineageId, RotationSuffix};
use crate::util::constants;
use crate::util::error::PipelineError;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Which rotation suffixes are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuffixGrammar {
    /// `<base>.<N>` only (logrotate default).
    #[default]
    Numeric,
    /// `<base>-<date>` only (logrotate `dateext`).
    Dated,
    /// Both; a lineage must still use a single kind.
    Mixed,
}

impl SuffixGrammar {
    fn numeric(self) -> bool {
        matches!(self, SuffixGrammar::Numeric | SuffixGrammar::Mixed)
    }

    fn dated(self) -> bool {
        matches!(self, SuffixGrammar::Dated | SuffixGrammar::Mixed)
    }
}

/// Rotation detection settings.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub grammar: SuffixGrammar,

    /// Whether unsuffixed (active) files join their lineage.
    pub include_active: bool,

    /// Extensions read through the gzip decoder.
    pub gzip_extensions: Vec<String>,

    /// Extensions recognised as compressed but not decodable.
    pub opaque_extensions: Vec<String>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            grammar: SuffixGrammar::default(),
            include_active: true,
            gzip_extensions: constants::DEFAULT_GZIP_EXTENSIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            opaque_extensions: constants::DEFAULT_OPAQUE_COMPRESSED_EXTENSIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

// =============================================================================
// File name analysis
// =============================================================================

/// Result of analysing one file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub base: String,
    pub suffix: RotationSuffix,
    pub compression: Compression,
}

fn dated_suffix_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    // A compile failure here shows up in the unit tests, not as a panic.
    RE.get_or_init(|| {
        Regex::new(r"^(?P<base>.+?)[-_.](?P<date>\d{8}|\d{4}[-_.]\d{2}[-_.]\d{2})$").ok()
    })
    .as_ref()
}

/// Split a file name into base, rotation suffix and compression.
pub fn parse_name(file_name: &str, config: &RotationConfig) -> ParsedName {
    let (stem, compression) = strip_compression(file_name, config);

    if config.grammar.dated() {
        if let Some((base, date)) = parse_dated(stem) {
            return ParsedName {
                base: base.to_string(),
                suffix: RotationSuffix::Dated(date),
                compression,
            };
        }
    }

    if config.grammar.numeric() {
        if let Some((base, n)) = parse_numbered(stem) {
            return ParsedName {
                base: base.to_string(),
                suffix: RotationSuffix::Numbered(n),
                compression,
            };
        }
    }

    ParsedName {
        base: stem.to_string(),
        suffix: RotationSuffix::Active,
        compression,
    }
}

fn strip_compression<'a>(file_name: &'a str, config: &RotationConfig) -> (&'a str, Compression) {
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return (file_name, Compression::None);
    };
    if stem.is_empty() {
        return (file_name, Compression::None);
    }
    let lower = ext.to_ascii_lowercase();
    if config.gzip_extensions.iter().any(|e| e.eq_ignore_ascii_case(&lower)) {
        (stem, Compression::Gzip)
    } else if config
        .opaque_extensions
        .iter()
        .any(|e| e.eq_ignore_ascii_case(&lower))
    {
        (stem, Compression::Other(lower))
    } else {
        (file_name, Compression::None)
    }
}

fn parse_numbered(stem: &str) -> Option<(&str, u32)> {
    let (base, digits) = stem.rsplit_once('.')?;
    if base.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Overlong numbers are not rotation suffixes.
    let n = digits.parse::<u32>().ok()?;
    Some((base, n))
}

fn parse_dated(stem: &str) -> Option<(&str, NaiveDate)> {
    let caps = dated_suffix_regex()?.captures(stem)?;
    let base = caps.name("base")?.as_str();
    let digits: String = caps
        .name("date")?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let date = NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()?;
    Some((base, date))
}

/// Build an [`InputFile`] for `path`, or `None` when the file does not take
/// part in processing (non-UTF-8 name, or an active file while
/// `include_active` is off).
pub fn classify(path: &Path, size: u64, config: &RotationConfig) -> Option<InputFile> {
    let file_name = path.file_name()?.to_str()?;
    let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let parsed = parse_name(file_name, config);

    if parsed.suffix == RotationSuffix::Active && !config.include_active {
        tracing::trace!(file = %path.display(), "Active file excluded");
        return None;
    }

    let rotation_index = match parsed.suffix {
        RotationSuffix::Numbered(n) => n,
        // Dated files are ranked by the grouper.
        RotationSuffix::Active | RotationSuffix::Dated(_) => 0,
    };

    Some(InputFile {
        path: path.to_path_buf(),
        lineage: LineageId {
            directory,
            base: parsed.base,
        },
        suffix: parsed.suffix,
        rotation_index,
        compression: parsed.compression,
        size,
    })
}

// =============================================================================
// Grouping
// =============================================================================

fn position_label(suffix: &RotationSuffix) -> String {
    match suffix {
        RotationSuffix::Active => "the active file".to_string(),
        RotationSuffix::Numbered(n) => format!("rotation index {n}"),
        RotationSuffix::Dated(d) => format!("rotation date {d}"),
    }
}

/// Oldest first: numbered descending, dated ascending, active last.
fn age_order(a: &RotationSuffix, b: &RotationSuffix) -> Ordering {
    use RotationSuffix::*;
    match (a, b) {
        (Active, Active) => Ordering::Equal,
        (Active, _) => Ordering::Greater,
        (_, Active) => Ordering::Less,
        (Numbered(x), Numbered(y)) => y.cmp(x),
        (Dated(x), Dated(y)) => x.cmp(y),
        // Mixed lineages are rejected before sorting.
        (Numbered(_), Dated(_)) => Ordering::Less,
        (Dated(_), Numbered(_)) => Ordering::Greater,
    }
}

/// Group classified files into lineages.
///
/// Returns one entry per lineage, ordered by lineage id. A lineage whose
/// members collide on a rotation position, or that mixes numbered and dated
/// suffixes, is returned as `Err(AmbiguousLineage)`; its siblings are not
/// affected.
pub fn group_lineages(files: Vec<InputFile>) -> Vec<Result<Lineage, PipelineError>> {
    let mut groups: BTreeMap<LineageId, Vec<InputFile>> = BTreeMap::new();
    for file in files {
        groups.entry(file.lineage.clone()).or_default().push(file);
    }

    groups
        .into_iter()
        .map(|(id, members)| build_lineage(id, members))
        .collect()
}

fn build_lineage(id: LineageId, mut files: Vec<InputFile>) -> Result<Lineage, PipelineError> {
    let ambiguous = |position: String, mut paths: Vec<PathBuf>| {
        paths.sort();
        PipelineError::AmbiguousLineage {
            directory: id.directory.clone(),
            base: id.base.clone(),
            position,
            paths,
        }
    };

    let has_numbered = files
        .iter()
        .any(|f| matches!(f.suffix, RotationSuffix::Numbered(_)));
    let has_dated = files
        .iter()
        .any(|f| matches!(f.suffix, RotationSuffix::Dated(_)));
    if has_numbered && has_dated {
        return Err(ambiguous(
            "mixed numbered and dated suffixes".to_string(),
            files.iter().map(|f| f.path.clone()).collect(),
        ));
    }

    let mut by_position: HashMap<RotationSuffix, Vec<PathBuf>> = HashMap::new();
    for file in &files {
        by_position
            .entry(file.suffix)
            .or_default()
            .push(file.path.clone());
    }
    let mut collisions: Vec<(RotationSuffix, Vec<PathBuf>)> = by_position
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .collect();
    if !collisions.is_empty() {
        collisions.sort_by(|a, b| age_order(&b.0, &a.0));
        let position = collisions
            .iter()
            .map(|(suffix, _)| position_label(suffix))
            .collect::<Vec<_>>()
            .join("; ");
        let paths = collisions.into_iter().flat_map(|(_, p)| p).collect();
        return Err(ambiguous(position, paths));
    }

    files.sort_by(|a, b| age_order(&a.suffix, &b.suffix));

    let dated = files
        .iter()
        .filter(|f| matches!(f.suffix, RotationSuffix::Dated(_)))
        .count();
    for (i, file) in files.iter_mut().enumerate() {
        if matches!(file.suffix, RotationSuffix::Dated(_)) {
            // Dated files sort before the active file, so `i < dated`.
            file.rotation_index = (dated - i) as u32;
        }
    }

    tracing::trace!(lineage = %id, files = files.len(), "Lineage grouped");
    Ok(Lineage { id, files })
}

/// Rotation numbers missing between the lowest and highest numbered member.
pub fn rotation_gaps(lineage: &Lineage) -> Vec<u32> {
    let mut present: Vec<u32> = lineage
        .files
        .iter()
        .filter_map(|f| match f.suffix {
            RotationSuffix::Numbered(n) => Some(n),
            _ => None,
        })
        .collect();
    present.sort_unstable();
    present
        .windows(2)
        .flat_map(|w| (w[0] + 1)..w[1])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(grammar: SuffixGrammar) -> RotationConfig {
        RotationConfig {
            grammar,
            ..Default::default()
        }
    }

    fn files(names: &[&str], config: &RotationConfig) -> Vec<InputFile> {
        names
            .iter()
            .filter_map(|n| classify(&Path::new("/logs").join(n), 1, config))
            .collect()
    }

    fn names(lineage: &Lineage) -> Vec<String> {
        lineage
            .files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_parse_name_numeric_and_compression() {
        let c = cfg(SuffixGrammar::Numeric);
        let p = parse_name("app.log.3.gz", &c);
        assert_eq!(p.base, "app.log");
        assert_eq!(p.suffix, RotationSuffix::Numbered(3));
        assert_eq!(p.compression, Compression::Gzip);

        let p = parse_name("svc.log.01", &c);
        assert_eq!(p.suffix, RotationSuffix::Numbered(1));

        let p = parse_name("app.log", &c);
        assert_eq!(p.suffix, RotationSuffix::Active);
        assert_eq!(p.base, "app.log");

        let p = parse_name("app.log.2.bz2", &c);
        assert_eq!(p.compression, Compression::Other("bz2".to_string()));
        assert_eq!(p.suffix, RotationSuffix::Numbered(2));
    }

    #[test]
    fn test_parse_name_dated_variants() {
        let c = cfg(SuffixGrammar::Dated);
        let d = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        for name in ["app.log-20240115", "app.log-2024-01-15", "app.log_2024.01.15.gz"] {
            let p = parse_name(name, &c);
            assert_eq!(p.base, "app.log", "{name}");
            assert_eq!(p.suffix, RotationSuffix::Dated(d), "{name}");
        }
        // Not a real date: the whole name is the base of an active file.
        let p = parse_name("app.log-20241399", &c);
        assert_eq!(p.suffix, RotationSuffix::Active);
        // Numbered suffixes are not recognised under the dated grammar.
        assert_eq!(parse_name("app.log.1", &c).suffix, RotationSuffix::Active);
    }

    #[test]
    fn test_numeric_lineage_is_ordered_oldest_first() {
        let c = cfg(SuffixGrammar::Numeric);
        let lineages = group_lineages(files(&["app.log", "app.log.1", "app.log.2.gz"], &c));
        assert_eq!(lineages.len(), 1);
        let lineage = lineages.into_iter().next().unwrap().unwrap();
        assert_eq!(names(&lineage), ["app.log.2.gz", "app.log.1", "app.log"]);
        let indices: Vec<u32> = lineage.files.iter().map(|f| f.rotation_index).collect();
        assert_eq!(indices, [2, 1, 0]);
    }

    #[test]
    fn test_dated_lineage_ranks_from_newest() {
        let c = cfg(SuffixGrammar::Dated);
        let lineage = group_lineages(files(
            &["app.log", "app.log-20240102", "app.log-20240101"],
            &c,
        ))
        .remove(0)
        .unwrap();
        assert_eq!(
            names(&lineage),
            ["app.log-20240101", "app.log-20240102", "app.log"]
        );
        let indices: Vec<u32> = lineage.files.iter().map(|f| f.rotation_index).collect();
        assert_eq!(indices, [2, 1, 0]);
    }

    #[test]
    fn test_duplicate_position_is_ambiguous_and_isolated() {
        let c = cfg(SuffixGrammar::Numeric);
        let result = group_lineages(files(
            &["svc.log.1", "svc.log.01", "svc.log", "other.log.1", "other.log"],
            &c,
        ));
        assert_eq!(result.len(), 2);
        let other = result[0].as_ref().expect("sibling lineage unaffected");
        assert_eq!(other.id.base, "other.log");
        match &result[1] {
            Err(PipelineError::AmbiguousLineage { base, paths, position, .. }) => {
                assert_eq!(base, "svc.log");
                assert_eq!(paths.len(), 2);
                assert!(position.contains("rotation index 1"));
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_and_compressed_copy_collide() {
        let c = cfg(SuffixGrammar::Numeric);
        let result = group_lineages(files(&["app.log.1", "app.log.1.gz"], &c));
        assert!(matches!(result[0], Err(PipelineError::AmbiguousLineage { .. })));
    }

    #[test]
    fn test_mixed_suffix_kinds_are_ambiguous() {
        let c = cfg(SuffixGrammar::Mixed);
        let result = group_lineages(files(&["app.log.1", "app.log-20240101"], &c));
        assert!(matches!(
            &result[0],
            Err(PipelineError::AmbiguousLineage { position, .. }) if position.contains("mixed")
        ));
    }

    #[test]
    fn test_unrelated_files_are_singletons() {
        let c = cfg(SuffixGrammar::Numeric);
        let result = group_lineages(files(&["a.log", "b.log", "c.txt"], &c));
        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|r| r.as_ref().unwrap().files.len() == 1));
    }

    #[test]
    fn test_include_active_false_drops_unsuffixed() {
        let c = RotationConfig {
            include_active: false,
            ..cfg(SuffixGrammar::Numeric)
        };
        let result = group_lineages(files(&["app.log", "app.log.1", "notes.txt"], &c));
        assert_eq!(result.len(), 1);
        assert_eq!(names(result[0].as_ref().unwrap()), ["app.log.1"]);
    }

    #[test]
    fn test_rotation_gaps() {
        let c = cfg(SuffixGrammar::Numeric);
        let lineage = group_lineages(files(&["app.log", "app.log.1", "app.log.4"], &c))
            .remove(0)
            .unwrap();
        assert_eq!(rotation_gaps(&lineage), vec![2, 3]);
        let complete = group_lineages(files(&["app.log", "app.log.1", "app.log.2"], &c))
            .remove(0)
            .unwrap();
        assert!(rotation_gaps(&complete).is_empty());
    }
}
