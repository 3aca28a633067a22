// LogBoop - core/reader.rs
//
// Lazy, single-pass record reader over one input file.
//
// The reader owns exactly one read handle (obtained from the filesystem
// collaborator, already decompressed) and releases it when dropped. The first
// lines are sampled to resolve the file's format, then replayed, so every
// byte is read once.
//
// Record-level problems never abort the file: a line without a timestamp is
// either folded into the previous record (continuation mode) or skipped and
// counted. Only I/O or decompression failures end the sequence, as
// `UnreadableFile`.

use crate::core::model::{Compression, MultilineMode, Record, RecordOrigin};
use crate::core::parser::{detect_format, LogFormat};
use crate::platform::fs::{FileSystem, ReadHandle};
use crate::util::constants;
use crate::util::error::{ParseError, PipelineError};
use chrono::Utc;
use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;

/// Options shared by every reader in a run.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions<'f> {
    /// Candidate formats, in detection order.
    pub formats: &'f [LogFormat],
    pub multiline: MultilineMode,
    /// Number of leading lines sampled for format detection.
    pub detection_lines: usize,
}

/// Per-file reading statistics.
#[derive(Debug, Clone, Default)]
pub struct ReadStats {
    /// Records yielded.
    pub records: u64,
    /// Exact number of parse errors.
    pub parse_errors: u64,
    /// First parse errors in detail (capped at MAX_PARSE_ERRORS_PER_FILE).
    pub errors: Vec<ParseError>,
}

/// Iterator over the records of one file.
pub struct RecordReader<'f> {
    path: Arc<Path>,
    file_position: usize,
    input: ReadHandle,
    /// `None` when the file holds no non-blank line at all.
    format: Option<&'f LogFormat>,
    multiline: MultilineMode,
    /// Offset of the next unread byte in the decoded stream.
    offset: u64,
    /// Sampled lines waiting to be replayed: (offset, bytes).
    replay: VecDeque<(u64, Vec<u8>)>,
    pending: Option<Record>,
    stats: ReadStats,
    done: bool,
}

impl<'f> RecordReader<'f> {
    /// Open the file at `path` and resolve its format.
    ///
    /// `file_position` is the file's place in its lineage (0 = oldest); it is
    /// stamped on every record so the splitter can see rotation boundaries.
    ///
    /// # Errors
    /// - `UnreadableFile` if the file cannot be opened or the sample cannot
    ///   be read (including decompression failures).
    /// - `FormatUnrecognised` if the sample has content but no configured
    ///   format parses any of it.
    pub fn open(
        fs: &dyn FileSystem,
        path: &Path,
        compression: &Compression,
        file_position: usize,
        options: &ReaderOptions<'f>,
    ) -> Result<Self, PipelineError> {
        let unreadable = |source: io::Error| PipelineError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        };

        let input = fs.open_read(path, compression).map_err(unreadable)?;

        let mut reader = RecordReader {
            path: Arc::from(path),
            file_position,
            input,
            format: None,
            multiline: options.multiline,
            offset: 0,
            replay: VecDeque::new(),
            pending: None,
            stats: ReadStats::default(),
            done: false,
        };

        let wanted = options.detection_lines.max(1);
        while reader.replay.len() < wanted {
            match reader.read_raw_line().map_err(unreadable)? {
                Some(line) => reader.replay.push_back(line),
                None => break,
            }
        }

        let sample: Vec<String> = reader
            .replay
            .iter()
            .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
            .filter(|s| !s.trim().is_empty())
            .collect();

        if !sample.is_empty() {
            match detect_format(&sample, options.formats) {
                Some(format) => reader.format = Some(format),
                None => {
                    return Err(PipelineError::FormatUnrecognised {
                        path: path.to_path_buf(),
                        sampled_lines: reader.replay.len(),
                    })
                }
            }
        }

        tracing::debug!(
            file = %path.display(),
            format = reader.format.map(LogFormat::name).unwrap_or("<empty>"),
            sampled = reader.replay.len(),
            "Reader opened"
        );

        Ok(reader)
    }

    /// Name of the resolved format, `None` for a file with no content.
    pub fn format_name(&self) -> Option<&str> {
        self.format.map(LogFormat::name)
    }

    /// Statistics so far. Complete once the iterator is exhausted.
    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }

    /// Read one physical line from the underlying stream, without its
    /// terminator.
    fn read_raw_line(&mut self) -> io::Result<Option<(u64, Vec<u8>)>> {
        let mut buf = Vec::new();
        let n = self.input.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        let start = self.offset;
        self.offset += n as u64;
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(Some((start, buf)))
    }

    fn next_line(&mut self) -> io::Result<Option<(u64, Vec<u8>)>> {
        match self.replay.pop_front() {
            Some(line) => Ok(Some(line)),
            None => self.read_raw_line(),
        }
    }

    fn record_parse_error(&mut self, error: ParseError) {
        self.stats.parse_errors += 1;
        if self.stats.errors.len() < constants::MAX_PARSE_ERRORS_PER_FILE {
            self.stats.errors.push(error);
        }
    }

    fn emit(&mut self, record: Record) -> Option<Result<Record, PipelineError>> {
        self.stats.records += 1;
        Some(Ok(record))
    }
}

impl Iterator for RecordReader<'_> {
    type Item = Result<Record, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let (offset, line) = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    let last = self.pending.take()?;
                    return self.emit(last);
                }
                Err(source) => {
                    // The lineage fails on this error, so a half-built
                    // pending record is dropped rather than emitted.
                    self.done = true;
                    self.pending = None;
                    return Some(Err(PipelineError::UnreadableFile {
                        path: self.path.to_path_buf(),
                        source,
                    }));
                }
            };

            let text = String::from_utf8_lossy(&line);

            if text.trim().is_empty() {
                if self.multiline == MultilineMode::Continuation {
                    if let Some(pending) = self.pending.as_mut() {
                        pending.payload.push(b'\n');
                        pending.payload.extend_from_slice(&line);
                    }
                }
                continue;
            }

            match self.format.and_then(|f| f.parse(&text)) {
                Some(stamped) => {
                    let record = Record {
                        timestamp: stamped.with_timezone(&Utc),
                        local_date: stamped.date_naive(),
                        payload: line,
                        origin: RecordOrigin {
                            path: Arc::clone(&self.path),
                            file_position: self.file_position,
                            offset,
                        },
                    };
                    if let Some(previous) = self.pending.replace(record) {
                        return self.emit(previous);
                    }
                }
                None => {
                    let fold = self.multiline == MultilineMode::Continuation;
                    match self.pending.as_mut() {
                        Some(pending) if fold => {
                            pending.payload.push(b'\n');
                            pending.payload.extend_from_slice(&line);
                        }
                        None if fold => {
                            let error = ParseError::OrphanContinuation {
                                file: self.path.to_path_buf(),
                                offset,
                            };
                            self.record_parse_error(error);
                        }
                        _ => {
                            let preview: String = text
                                .chars()
                                .take(constants::DEBUG_MAX_LINE_PREVIEW)
                                .collect();
                            tracing::trace!(
                                file = %self.path.display(),
                                offset,
                                "Line without timestamp skipped"
                            );
                            let error = ParseError::NoTimestamp {
                                file: self.path.to_path_buf(),
                                offset,
                                preview,
                            };
                            self.record_parse_error(error);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{InputFile, LineageId, RotationSuffix};
    use crate::platform::fs::RealFs;
    use flate2::write::GzEncoder;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn input(path: PathBuf, compression: Compression) -> InputFile {
        InputFile {
            lineage: LineageId {
                directory: path.parent().unwrap().to_path_buf(),
                base: "app.log".to_string(),
            },
            path,
            suffix: RotationSuffix::Active,
            rotation_index: 0,
            compression,
            size: 0,
        }
    }

    fn read_all(file: &InputFile, multiline: MultilineMode) -> (Vec<Record>, ReadStats) {
        let formats = LogFormat::builtins();
        let options = ReaderOptions {
            formats: &formats,
            multiline,
            detection_lines: constants::DEFAULT_CONTENT_DETECTION_LINES,
        };
        let mut reader = RecordReader::open(&RealFs, &file.path, &file.compression, 0, &options)
            .expect("open");
        let records: Vec<Record> = (&mut reader).map(|r| r.expect("record")).collect();
        (records, reader.stats().clone())
    }

    #[test]
    fn test_reads_records_in_file_order_with_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("app.log");
        fs::write(&p, "2024-01-01 10:00:00 a\n2024-01-01 10:00:01 b\r\n").unwrap();
        let (records, stats) = read_all(&input(p, Compression::None), MultilineMode::Skip);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, b"2024-01-01 10:00:00 a");
        assert_eq!(records[1].payload, b"2024-01-01 10:00:01 b");
        assert_eq!(records[0].origin.offset, 0);
        assert_eq!(records[1].origin.offset, 22);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.parse_errors, 0);
    }

    #[test]
    fn test_malformed_line_is_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("app.log");
        fs::write(
            &p,
            "2024-01-01 10:00:00 a\nGARBAGE without time\n2024-01-01 10:00:02 c\n",
        )
        .unwrap();
        let (records, stats) = read_all(&input(p, Compression::None), MultilineMode::Skip);
        assert_eq!(records.len(), 2);
        assert_eq!(stats.parse_errors, 1);
        assert!(matches!(
            stats.errors[0],
            ParseError::NoTimestamp { offset: 22, .. }
        ));
    }

    #[test]
    fn test_continuation_folds_stack_traces() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("app.log");
        fs::write(
            &p,
            "  orphan\n2024-01-01 10:00:00 boom\n  at a.b(c)\n\n  at d.e(f)\n2024-01-01 10:00:01 ok\n",
        )
        .unwrap();
        let (records, stats) =
            read_all(&input(p, Compression::None), MultilineMode::Continuation);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].payload,
            b"2024-01-01 10:00:00 boom\n  at a.b(c)\n\n  at d.e(f)"
        );
        assert_eq!(stats.parse_errors, 1, "only the orphan line is an error");
    }

    #[test]
    fn test_gzip_input_is_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("app.log.1.gz");
        let mut enc = GzEncoder::new(fs::File::create(&p).unwrap(), flate2::Compression::fast());
        enc.write_all(b"2024-01-01 10:00:00 zipped\n").unwrap();
        enc.finish().unwrap();
        let (records, _) = read_all(&input(p, Compression::Gzip), MultilineMode::Skip);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"2024-01-01 10:00:00 zipped");
    }

    #[test]
    fn test_corrupt_gzip_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("app.log.1.gz");
        fs::write(&p, b"this is not gzip at all").unwrap();
        let formats = LogFormat::builtins();
        let options = ReaderOptions {
            formats: &formats,
            multiline: MultilineMode::Skip,
            detection_lines: 5,
        };
        let result = RecordReader::open(&RealFs, &p, &Compression::Gzip, 0, &options);
        assert!(matches!(result, Err(PipelineError::UnreadableFile { .. })));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let formats = LogFormat::builtins();
        let options = ReaderOptions {
            formats: &formats,
            multiline: MultilineMode::Skip,
            detection_lines: 5,
        };
        let gone = dir.path().join("gone.log");
        let result = RecordReader::open(&RealFs, &gone, &Compression::None, 0, &options);
        assert!(matches!(result, Err(PipelineError::UnreadableFile { .. })));
    }

    #[test]
    fn test_unknown_format_and_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let formats = LogFormat::builtins();
        let options = ReaderOptions {
            formats: &formats,
            multiline: MultilineMode::Skip,
            detection_lines: 5,
        };

        let notes = dir.path().join("notes.txt");
        fs::write(&notes, "just some prose\nwith no dates\n").unwrap();
        let result = RecordReader::open(&RealFs, &notes, &Compression::None, 0, &options);
        assert!(matches!(
            result,
            Err(PipelineError::FormatUnrecognised { sampled_lines: 2, .. })
        ));

        let empty = dir.path().join("empty.log");
        fs::write(&empty, "").unwrap();
        let mut reader =
            RecordReader::open(&RealFs, &empty, &Compression::None, 0, &options).unwrap();
        assert!(reader.format_name().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_non_utf8_payload_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("app.log");
        let mut bytes = b"2024-01-01 10:00:00 caf".to_vec();
        bytes.push(0xE9);
        bytes.push(b'\n');
        fs::write(&p, &bytes).unwrap();
        let (records, _) = read_all(&input(p, Compression::None), MultilineMode::Skip);
        assert_eq!(records[0].payload, bytes[..bytes.len() - 1].to_vec());
    }
}
