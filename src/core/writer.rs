// LogBoop - core/writer.rs
//
// Output writer: appends classified records to their destination files.
//
// Destinations are opened through a `DestinationRegistry` shared by all
// workers, so two lineages that resolve to the same path share one handle
// and serialise on its lock. A worker holds at most one lock at a time
// (registry map or a single destination), which rules out lock-order
// deadlocks.
//
// When a destination already has content, that content is indexed on first
// open: its newest timestamp seeds the ordering watermark and, when inputs
// are kept between runs, its payload fingerprints make re-runs idempotent.
//
// With compression on, each lineage's records form one gzip member appended
// to `<destination>.gz`; members are closed when the lineage finishes, so a
// multi-member reader sees the concatenated plain text.

use crate::core::model::{Compression, Record, StreamReport};
use crate::core::reader::{ReaderOptions, RecordReader};
use crate::platform::fs::{AppendHandle, FileSystem};
use crate::util::constants;
use crate::util::error::PipelineError;
use chrono::{DateTime, Duration, Utc};
use flate2::write::GzEncoder;
use std::collections::btree_map::Entry;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// 64-bit fingerprint of a record payload.
fn fingerprint(payload: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

fn write_error(path: &Path, operation: &'static str) -> impl FnOnce(io::Error) -> PipelineError {
    let path = path.to_path_buf();
    move |source| PipelineError::Write {
        path,
        operation,
        source,
    }
}

/// `<path>.gz`
pub fn compressed_path(path: PathBuf) -> PathBuf {
    let mut name = path.into_os_string();
    name.push(".");
    name.push(constants::OUTPUT_GZIP_EXTENSION);
    PathBuf::from(name)
}

// =============================================================================
// Output sinks
// =============================================================================

/// File handle that counts the bytes handed to it.
struct Counted {
    handle: Box<dyn AppendHandle>,
    written: u64,
}

impl Write for Counted {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.handle.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle.flush()
    }
}

enum Sink {
    Plain(BufWriter<Counted>),
    /// A gzip member in progress.
    Gzip(GzEncoder<BufWriter<Counted>>),
}

impl Sink {
    fn file(&self) -> &BufWriter<Counted> {
        match self {
            Sink::Plain(file) => file,
            Sink::Gzip(encoder) => encoder.get_ref(),
        }
    }

    fn file_mut(&mut self) -> &mut BufWriter<Counted> {
        match self {
            Sink::Plain(file) => file,
            Sink::Gzip(encoder) => encoder.get_mut(),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(file) => file.write(buf),
            Sink::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(file) => file.flush(),
            Sink::Gzip(encoder) => encoder.flush(),
        }
    }
}

// =============================================================================
// Destinations
// =============================================================================

/// One output file, possibly shared by several lineages.
struct Destination {
    path: PathBuf,
    /// `None` until the first user opens it.
    out: Option<Sink>,
    /// Length on disk before this run appended anything.
    base_len: u64,
    /// Records are written as gzip members.
    gzip: bool,
    watermark: Option<DateTime<Utc>>,
    /// Fingerprints of content present before this run, with multiplicity.
    existing: HashMap<u64, u32>,
}

impl Destination {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            out: None,
            base_len: 0,
            gzip: false,
            watermark: None,
            existing: HashMap::new(),
        }
    }

    /// Length on disk, excluding bytes still buffered.
    fn len(&self) -> u64 {
        self.base_len + self.out.as_ref().map_or(0, |sink| sink.file().get_ref().written)
    }

    fn ensure_open(
        &mut self,
        fs: &dyn FileSystem,
        options: &WriterOptions<'_>,
    ) -> Result<(), PipelineError> {
        if self.out.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs.create_dir_all(parent)
                .map_err(write_error(parent, "create directory"))?;
        }
        let len = fs
            .file_len(&self.path)
            .map_err(write_error(&self.path, "stat"))?
            .unwrap_or(0);
        self.gzip = options.compress;
        if len > 0 {
            self.index_existing(fs, options)?;
        }
        let handle = fs
            .open_append(&self.path)
            .map_err(write_error(&self.path, "open for append"))?;
        let file = BufWriter::with_capacity(
            constants::WRITE_BUFFER_SIZE,
            Counted { handle, written: 0 },
        );
        self.out = Some(Sink::Plain(file));
        self.base_len = len;
        tracing::debug!(
            destination = %self.path.display(),
            existing_bytes = len,
            gzip = self.gzip,
            indexed = self.existing.values().map(|n| u64::from(*n)).sum::<u64>(),
            "Destination opened"
        );
        Ok(())
    }

    /// Read the destination's current content. Nothing is kept unless the
    /// whole file was read.
    fn index_existing(
        &mut self,
        fs: &dyn FileSystem,
        options: &WriterOptions<'_>,
    ) -> Result<(), PipelineError> {
        let compression = if self.gzip {
            Compression::Gzip
        } else {
            Compression::None
        };
        let reader = match RecordReader::open(fs, &self.path, &compression, 0, &options.index) {
            Ok(reader) => reader,
            Err(PipelineError::FormatUnrecognised { .. }) => {
                tracing::warn!(
                    destination = %self.path.display(),
                    "Existing output has no recognised format; appending without de-duplication"
                );
                return Ok(());
            }
            Err(PipelineError::UnreadableFile { source, .. }) => {
                return Err(write_error(&self.path, "index existing output")(source))
            }
            Err(other) => return Err(other),
        };

        let mut existing: HashMap<u64, u32> = HashMap::new();
        let mut watermark: Option<DateTime<Utc>> = None;
        for item in reader {
            match item {
                Ok(record) => {
                    if options.dedup_existing {
                        *existing.entry(fingerprint(&record.payload)).or_insert(0) += 1;
                    }
                    watermark =
                        Some(watermark.map_or(record.timestamp, |w| w.max(record.timestamp)));
                }
                Err(PipelineError::UnreadableFile { source, .. }) => {
                    return Err(write_error(&self.path, "index existing output")(source))
                }
                Err(other) => return Err(other),
            }
        }
        self.existing = existing;
        self.watermark = watermark;
        Ok(())
    }

    /// Consume one pre-existing copy of `payload`, if any is left.
    fn take_existing(&mut self, payload: &[u8]) -> bool {
        match self.existing.get_mut(&fingerprint(payload)) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn write_record(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut out = match self.out.take() {
            Some(Sink::Plain(file)) if self.gzip => {
                Sink::Gzip(GzEncoder::new(file, flate2::Compression::default()))
            }
            Some(sink) => sink,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "destination is not open",
                ))
            }
        };
        let result = out.write_all(payload).and_then(|()| out.write_all(b"\n"));
        self.out = Some(out);
        result
    }

    /// Close the open gzip member (if any), flush, and sync.
    /// Returns the length on disk afterwards.
    fn commit(&mut self) -> io::Result<u64> {
        self.out = match self.out.take() {
            Some(Sink::Gzip(encoder)) => Some(Sink::Plain(encoder.finish()?)),
            other => other,
        };
        if let Some(sink) = self.out.as_mut() {
            let file = sink.file_mut();
            file.flush()?;
            file.get_mut().handle.sync()?;
        }
        Ok(self.len())
    }
}

/// Registry of open destinations, shared by every worker of a run.
#[derive(Default)]
pub struct DestinationRegistry {
    open: Mutex<HashMap<PathBuf, Weak<Mutex<Destination>>>>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle for `path`. Opening happens later, under the
    /// destination's own lock, so the registry lock is never held for I/O.
    fn acquire(&self, path: &Path) -> Arc<Mutex<Destination>> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = open.get(path).and_then(Weak::upgrade) {
            return existing;
        }
        open.retain(|_, weak| weak.strong_count() > 0);
        let dest = Arc::new(Mutex::new(Destination::new(path.to_path_buf())));
        open.insert(path.to_path_buf(), Arc::downgrade(&dest));
        dest
    }

    /// Number of destinations currently held open by some writer.
    pub fn open_count(&self) -> usize {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

fn lock(dest: &Mutex<Destination>) -> MutexGuard<'_, Destination> {
    dest.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Per-lineage writer
// =============================================================================

/// Settings for the output writer.
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions<'f> {
    /// Record rules used to index existing destination content.
    pub index: ReaderOptions<'f>,
    /// Backwards step allowed before a record counts as out of order.
    pub tolerance: Duration,
    /// Skip records whose payload the destination already holds. Only safe
    /// when the inputs survive the run: with deletion on, a byte-identical
    /// line in a fresh input is new data.
    pub dedup_existing: bool,
    /// Append gzip members to `<destination>.gz` instead of plain text.
    pub compress: bool,
}

/// Outcome of a single append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    /// Written behind the watermark.
    OutOfOrder { watermark: DateTime<Utc> },
    /// Skipped: the destination already held this record.
    AlreadyPresent,
}

struct Stream {
    dest: Arc<Mutex<Destination>>,
    report: StreamReport,
}

/// Writer for one lineage. Streams are created on first use of a key and
/// released by [`OutputWriter::finish`] (or on drop).
pub struct OutputWriter<'a> {
    fs: &'a dyn FileSystem,
    registry: &'a DestinationRegistry,
    options: WriterOptions<'a>,
    streams: BTreeMap<String, Stream>,
}

impl<'a> OutputWriter<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        registry: &'a DestinationRegistry,
        options: WriterOptions<'a>,
    ) -> Self {
        Self {
            fs,
            registry,
            options,
            streams: BTreeMap::new(),
        }
    }

    /// Append `record` to the stream of `key`.
    ///
    /// `destination` is only called the first time `key` is seen.
    pub fn append(
        &mut self,
        key: &str,
        record: &Record,
        destination: impl FnOnce() -> PathBuf,
    ) -> Result<AppendOutcome, PipelineError> {
        let stream = match self.streams.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let opened =
                    open_stream(self.fs, self.registry, &self.options, key, destination())?;
                entry.insert(opened)
            }
        };

        let mut dest = lock(&stream.dest);

        if dest.take_existing(&record.payload) {
            stream.report.already_present += 1;
            return Ok(AppendOutcome::AlreadyPresent);
        }

        let mut outcome = AppendOutcome::Written;
        if let Some(watermark) = dest.watermark {
            if record.timestamp < watermark - self.options.tolerance {
                stream.report.out_of_order += 1;
                outcome = AppendOutcome::OutOfOrder { watermark };
            }
        }

        dest.write_record(&record.payload)
            .map_err(write_error(&dest.path, "append"))?;

        dest.watermark = Some(dest.watermark.map_or(record.timestamp, |w| w.max(record.timestamp)));
        stream.report.records_written += 1;
        stream.report.bytes_written += record.payload.len() as u64 + 1;
        Ok(outcome)
    }

    /// Number of streams touched so far.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Close, flush and sync every stream, then release the handles.
    ///
    /// Returns per-stream reports in key order. The first error aborts and
    /// is returned; every handle is released either way.
    pub fn finish(self) -> Result<Vec<StreamReport>, PipelineError> {
        let mut reports = Vec::with_capacity(self.streams.len());
        for (_, mut stream) in self.streams {
            {
                let mut dest = lock(&stream.dest);
                stream.report.committed_len = dest
                    .commit()
                    .map_err(write_error(&stream.report.destination, "sync"))?;
            }
            reports.push(stream.report);
        }
        Ok(reports)
    }
}

fn open_stream(
    fs: &dyn FileSystem,
    registry: &DestinationRegistry,
    options: &WriterOptions<'_>,
    key: &str,
    path: PathBuf,
) -> Result<Stream, PipelineError> {
    let path = if options.compress {
        compressed_path(path)
    } else {
        path
    };
    let dest = registry.acquire(&path);
    let initial_len = {
        let mut guard = lock(&dest);
        guard.ensure_open(fs, options)?;
        guard.len()
    };
    tracing::trace!(key, destination = %path.display(), initial_len, "Stream opened");
    Ok(Stream {
        dest,
        report: StreamReport {
            key: key.to_string(),
            destination: path,
            records_written: 0,
            bytes_written: 0,
            already_present: 0,
            out_of_order: 0,
            initial_len,
            committed_len: initial_len,
        },
    })
}

/// Re-examine closed destinations.
///
/// Each must still hold at least the length it had once the lineage's bytes
/// were synced, and be non-empty if anything was written.
pub fn verify(fs: &dyn FileSystem, reports: &[StreamReport]) -> Result<(), PipelineError> {
    for report in reports {
        let actual = fs
            .file_len(&report.destination)
            .map_err(write_error(&report.destination, "stat"))?
            .unwrap_or(0);
        let expected_min = report.committed_len;
        if actual < expected_min || (report.records_written > 0 && actual == 0) {
            return Err(PipelineError::VerificationFailed {
                path: report.destination.clone(),
                expected_min,
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{MultilineMode, RecordOrigin};
    use crate::core::parser::LogFormat;
    use crate::platform::fs::RealFs;
    use chrono::TimeZone;
    use std::fs;
    use std::io::Read;

    fn rec(secs: u32, payload: &str) -> Record {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, secs).unwrap();
        Record {
            timestamp,
            local_date: timestamp.date_naive(),
            payload: payload.as_bytes().to_vec(),
            origin: RecordOrigin {
                path: Arc::from(Path::new("/in/app.log")),
                file_position: 0,
                offset: 0,
            },
        }
    }

    fn options(formats: &[LogFormat]) -> WriterOptions<'_> {
        WriterOptions {
            index: ReaderOptions {
                formats,
                multiline: MultilineMode::Skip,
                detection_lines: 5,
            },
            tolerance: Duration::zero(),
            dedup_existing: false,
            compress: false,
        }
    }

    fn gunzip(path: &Path) -> String {
        let mut text = String::new();
        flate2::read::MultiGzDecoder::new(fs::File::open(path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    #[test]
    fn test_append_creates_parents_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/out/app.log-2024-01-01");
        let formats = LogFormat::builtins();
        let registry = DestinationRegistry::new();
        let mut writer = OutputWriter::new(&RealFs, &registry, options(&formats));

        let a = rec(0, "2024-01-01 10:00:00 a");
        let b = rec(1, "2024-01-01 10:00:01 b");
        assert_eq!(writer.append("k", &a, || dest.clone()).unwrap(), AppendOutcome::Written);
        assert_eq!(writer.append("k", &b, || unreachable!()).unwrap(), AppendOutcome::Written);
        assert_eq!(writer.stream_count(), 1);

        let reports = writer.finish().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].records_written, 2);
        assert_eq!(reports[0].initial_len, 0);
        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            "2024-01-01 10:00:00 a\n2024-01-01 10:00:01 b\n"
        );
        assert_eq!(reports[0].bytes_written, fs::metadata(&dest).unwrap().len());
        assert_eq!(reports[0].committed_len, reports[0].bytes_written);
        verify(&RealFs, &reports).unwrap();
        assert_eq!(registry.open_count(), 0, "handles released after finish");
    }

    #[test]
    fn test_out_of_order_is_written_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let formats = LogFormat::builtins();
        let registry = DestinationRegistry::new();
        let mut writer = OutputWriter::new(&RealFs, &registry, options(&formats));

        writer.append("k", &rec(5, "2024-01-01 10:00:05 late"), || dest.clone()).unwrap();
        let outcome = writer
            .append("k", &rec(1, "2024-01-01 10:00:01 early"), || dest.clone())
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::OutOfOrder { .. }));
        let reports = writer.finish().unwrap();
        assert_eq!(reports[0].out_of_order, 1);
        assert_eq!(reports[0].records_written, 2);
    }

    #[test]
    fn test_tolerance_absorbs_small_steps_back() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let formats = LogFormat::builtins();
        let registry = DestinationRegistry::new();
        let opts = WriterOptions {
            tolerance: Duration::seconds(10),
            ..options(&formats)
        };
        let mut writer = OutputWriter::new(&RealFs, &registry, opts);
        writer.append("k", &rec(5, "2024-01-01 10:00:05 a"), || dest.clone()).unwrap();
        let outcome = writer
            .append("k", &rec(1, "2024-01-01 10:00:01 b"), || dest.clone())
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Written);
    }

    #[test]
    fn test_existing_content_is_not_written_twice() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        fs::write(&dest, "2024-01-01 10:00:00 a\n2024-01-01 10:00:01 b\n").unwrap();
        let formats = LogFormat::builtins();
        let registry = DestinationRegistry::new();
        let opts = WriterOptions {
            dedup_existing: true,
            ..options(&formats)
        };
        let mut writer = OutputWriter::new(&RealFs, &registry, opts);

        for (secs, text) in [(0, "a"), (1, "b"), (2, "c")] {
            let r = rec(secs, &format!("2024-01-01 10:00:0{secs} {text}"));
            writer.append("k", &r, || dest.clone()).unwrap();
        }
        let reports = writer.finish().unwrap();
        assert_eq!(reports[0].already_present, 2);
        assert_eq!(reports[0].records_written, 1);
        assert_eq!(reports[0].out_of_order, 0);
        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            "2024-01-01 10:00:00 a\n2024-01-01 10:00:01 b\n2024-01-01 10:00:02 c\n"
        );
        verify(&RealFs, &reports).unwrap();
    }

    #[test]
    fn test_identical_lines_are_appended_when_not_deduplicating() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        fs::write(&dest, "2024-01-01 10:00:00 job ok\n").unwrap();
        let formats = LogFormat::builtins();
        let registry = DestinationRegistry::new();
        let mut writer = OutputWriter::new(&RealFs, &registry, options(&formats));

        let outcome = writer
            .append("k", &rec(0, "2024-01-01 10:00:00 job ok"), || dest.clone())
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Written);
        let reports = writer.finish().unwrap();
        assert_eq!(reports[0].already_present, 0);
        assert_eq!(reports[0].records_written, 1);
        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            "2024-01-01 10:00:00 job ok\n2024-01-01 10:00:00 job ok\n"
        );
        verify(&RealFs, &reports).unwrap();
    }

    #[test]
    fn test_failed_index_keeps_no_partial_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gz");
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        for secs in 0..30 {
            writeln!(encoder, "2024-01-01 10:00:{secs:02} line {secs}").unwrap();
        }
        let mut bytes = encoder.finish().unwrap();
        bytes.extend_from_slice(b"this is not a gzip member\n");
        fs::write(&path, bytes).unwrap();

        let formats = LogFormat::builtins();
        let opts = WriterOptions {
            dedup_existing: true,
            compress: true,
            ..options(&formats)
        };
        let mut dest = Destination::new(path);
        dest.gzip = true;
        assert!(matches!(
            dest.index_existing(&RealFs, &opts),
            Err(PipelineError::Write { .. })
        ));
        assert!(dest.existing.is_empty());
        assert!(dest.watermark.is_none());
    }

    #[test]
    fn test_compressed_output_appends_one_member_per_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("app.log-2024-01-01");
        let formats = LogFormat::builtins();
        let opts = WriterOptions {
            dedup_existing: true,
            compress: true,
            ..options(&formats)
        };

        let registry = DestinationRegistry::new();
        let mut writer = OutputWriter::new(&RealFs, &registry, opts);
        writer.append("k", &rec(0, "2024-01-01 10:00:00 a"), || dest.clone()).unwrap();
        writer.append("k", &rec(1, "2024-01-01 10:00:01 b"), || dest.clone()).unwrap();
        let first = writer.finish().unwrap();
        let gz = dir.path().join("app.log-2024-01-01.gz");
        assert_eq!(first[0].destination, gz);
        assert!(!dest.exists());
        assert_eq!(first[0].committed_len, fs::metadata(&gz).unwrap().len());
        verify(&RealFs, &first).unwrap();
        assert_eq!(gunzip(&gz), "2024-01-01 10:00:00 a\n2024-01-01 10:00:01 b\n");

        // A later run indexes the compressed content and adds a member.
        let registry = DestinationRegistry::new();
        let mut writer = OutputWriter::new(&RealFs, &registry, opts);
        writer.append("k", &rec(1, "2024-01-01 10:00:01 b"), || dest.clone()).unwrap();
        writer.append("k", &rec(2, "2024-01-01 10:00:02 c"), || dest.clone()).unwrap();
        let second = writer.finish().unwrap();
        assert_eq!(second[0].already_present, 1);
        assert_eq!(second[0].records_written, 1);
        assert_eq!(second[0].initial_len, first[0].committed_len);
        verify(&RealFs, &second).unwrap();
        assert_eq!(
            gunzip(&gz),
            "2024-01-01 10:00:00 a\n2024-01-01 10:00:01 b\n2024-01-01 10:00:02 c\n"
        );
    }

    #[test]
    fn test_existing_watermark_flags_older_records() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        fs::write(&dest, "2024-01-01 10:00:09 newest\n").unwrap();
        let formats = LogFormat::builtins();
        let registry = DestinationRegistry::new();
        let mut writer = OutputWriter::new(&RealFs, &registry, options(&formats));
        let outcome = writer
            .append("k", &rec(1, "2024-01-01 10:00:01 old"), || dest.clone())
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::OutOfOrder { .. }));
    }

    #[test]
    fn test_two_writers_share_one_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("shared");
        let formats = LogFormat::builtins();
        let registry = DestinationRegistry::new();
        let mut first = OutputWriter::new(&RealFs, &registry, options(&formats));
        let mut second = OutputWriter::new(&RealFs, &registry, options(&formats));

        first.append("k", &rec(0, "2024-01-01 10:00:00 one"), || dest.clone()).unwrap();
        second.append("k", &rec(1, "2024-01-01 10:00:01 two"), || dest.clone()).unwrap();
        assert_eq!(registry.open_count(), 1);

        let r1 = first.finish().unwrap();
        let r2 = second.finish().unwrap();
        verify(&RealFs, &r1).unwrap();
        verify(&RealFs, &r2).unwrap();
        let text = fs::read_to_string(&dest).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_verify_detects_truncated_output() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        fs::write(&dest, "short\n").unwrap();
        let report = StreamReport {
            key: "k".to_string(),
            destination: dest,
            records_written: 3,
            bytes_written: 60,
            already_present: 0,
            out_of_order: 0,
            initial_len: 0,
            committed_len: 60,
        };
        assert!(matches!(
            verify(&RealFs, &[report]),
            Err(PipelineError::VerificationFailed { actual: 6, expected_min: 60, .. })
        ));
    }
}
