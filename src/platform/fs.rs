// LogBoop - platform/fs.rs
//
// Filesystem abstraction trait.
// Enables testing core logic without real filesystem access, and fault
// injection (e.g. a deletion that fails) in end-to-end tests.
//
// Every operation reports its own success or failure; nothing is silent.

use crate::core::model::Compression;
use flate2::read::MultiGzDecoder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// Read handle produced by [`FileSystem::open_read`].
pub type ReadHandle = Box<dyn BufRead + Send>;

/// Append handle with an explicit durability barrier.
pub trait AppendHandle: Write + Send {
    /// Flush OS buffers to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendHandle for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Filesystem operations used by the pipeline.
pub trait FileSystem: Send + Sync {
    /// Open `path` for reading, undoing `compression` on the fly.
    ///
    /// `Compression::Other` is never decodable and always fails with
    /// `io::ErrorKind::Unsupported`.
    fn open_read(&self, path: &Path, compression: &Compression) -> io::Result<ReadHandle>;

    /// Length of `path` in bytes, or `None` if it does not exist.
    fn file_len(&self, path: &Path) -> io::Result<Option<u64>>;

    /// Create `path` and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Open `path` for appending, creating it if absent.
    fn open_append(&self, path: &Path) -> io::Result<Box<dyn AppendHandle>>;

    /// Delete a single file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl FileSystem for RealFs {
    fn open_read(&self, path: &Path, compression: &Compression) -> io::Result<ReadHandle> {
        match compression {
            Compression::None => {
                let file = File::open(path)?;
                Ok(Box::new(BufReader::new(file)))
            }
            Compression::Gzip => {
                let file = File::open(path)?;
                // MultiGzDecoder so that concatenated gzip members (appended
                // by some rotation tools) are read in full.
                Ok(Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(
                    file,
                )))))
            }
            Compression::Other(ext) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no decoder for '.{ext}' compression"),
            )),
        }
    }

    fn file_len(&self, path: &Path) -> io::Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn AppendHandle>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(file))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
