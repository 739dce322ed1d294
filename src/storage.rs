use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::StorageError;

const IMAGE_NAME: &str = "firmware.bin";
const STAGING_NAME: &str = "firmware.bin.part";

/// Persistent image storage. One write session at a time: `begin`, any
/// number of `write`s, then exactly one of `end` or `abort`.
pub trait FlashWriter {
    /// Reserves room for an image of `size` bytes and opens a write session.
    fn begin(&mut self, size: u64) -> Result<(), StorageError>;

    /// Writes as much of `chunk` as the session accepts and returns that count.
    fn write(&mut self, chunk: &[u8]) -> Result<usize, StorageError>;

    /// Closes the session. Fails unless exactly the reserved size was written.
    fn end(&mut self) -> Result<(), StorageError>;

    fn is_finalized(&self) -> bool;

    /// Drops the open session and anything it wrote. Safe to call at any time.
    fn abort(&mut self);
}

struct WriteSession {
    file: File,
    expected: u64,
    written: u64,
}

/// Single image slot backed by a directory. The image is staged next to the
/// slot and only renamed into place on a clean `end`.
pub struct FileFlash {
    dir: PathBuf,
    capacity: u64,
    session: Option<WriteSession>,
    finalized: bool,
}

impl FileFlash {
    pub fn new(dir: impl AsRef<Path>, capacity: u64) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            capacity,
            session: None,
            finalized: false,
        }
    }

    pub fn image_path(&self) -> PathBuf {
        self.dir.join(IMAGE_NAME)
    }

    fn staging_path(&self) -> PathBuf {
        self.dir.join(STAGING_NAME)
    }

    fn discard_staging(&self) {
        if let Err(e) = fs::remove_file(self.staging_path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove staged image");
            }
        }
    }
}

impl FlashWriter for FileFlash {
    fn begin(&mut self, size: u64) -> Result<(), StorageError> {
        if size > self.capacity {
            return Err(StorageError::InsufficientSpace {
                required: size,
                available: self.capacity,
            });
        }
        if self.session.take().is_some() {
            warn!("Discarding unfinished write session");
            self.discard_staging();
        }

        fs::create_dir_all(&self.dir)?;
        let file = File::create(self.staging_path())?;
        self.finalized = false;
        self.session = Some(WriteSession {
            file,
            expected: size,
            written: 0,
        });
        info!(size, dir = %self.dir.display(), "Image write session opened");
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize, StorageError> {
        let session = self.session.as_mut().ok_or(StorageError::NoSession)?;
        let room = session.expected - session.written;
        let take = chunk.len().min(usize::try_from(room).unwrap_or(usize::MAX));

        session.file.write_all(&chunk[..take])?;
        session.written += take as u64;
        Ok(take)
    }

    fn end(&mut self) -> Result<(), StorageError> {
        let session = self.session.take().ok_or(StorageError::NoSession)?;
        if session.written != session.expected {
            drop(session.file);
            self.discard_staging();
            return Err(StorageError::Incomplete {
                written: session.written,
                expected: session.expected,
            });
        }

        session.file.sync_all()?;
        drop(session.file);
        fs::rename(self.staging_path(), self.image_path())?;
        self.finalized = true;
        info!(bytes = session.written, path = %self.image_path().display(), "Image finalized");
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn abort(&mut self) {
        if self.session.take().is_some() {
            info!("Image write session aborted");
        }
        self.finalized = false;
        self.discard_staging();
    }
}
