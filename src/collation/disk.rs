use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use super::store::{BackingStore, Payload, StagingBuffer};

/// Staged bytes are spilled to the file once they reach this size
pub const SPILL_THRESHOLD: usize = 64 * 1024;

const FILE_PREFIX: &str = "guardia-collation-";
const FILE_SUFFIX: &str = ".frame";

/// Stages writes in memory and spills them into a temporary file
///
/// Resident memory stays bounded by [`SPILL_THRESHOLD`] no matter how many
/// results are collected. The file is removed when the store (or the payload
/// it finishes into) is dropped. A process that aborts or is killed leaves
/// it behind; [`sweep_stale`] clears such leftovers from a collation
/// directory at startup.
pub struct DiskStore<B> {
    staging: B,
    file: NamedTempFile,

    /// Bytes already written to the file
    spilled: u64,

    spill_threshold: usize,

    /// Finish into a payload that streams the file into the transport
    streaming: bool,
}

impl<B: StagingBuffer> DiskStore<B> {
    pub fn create(dir: Option<&Path>, streaming: bool) -> io::Result<Self> {
        Self::with_threshold(dir, streaming, SPILL_THRESHOLD)
    }

    pub fn with_threshold(dir: Option<&Path>, streaming: bool, threshold: usize) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(FILE_PREFIX).suffix(FILE_SUFFIX);
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        trace!("collating into {}", file.path().display());

        Ok(Self {
            staging: B::with_capacity(threshold.min(B::initial_capacity())),
            file,
            spilled: 0,
            spill_threshold: threshold.max(1),
            streaming,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn spill(&mut self) -> io::Result<()> {
        if self.staging.len() == 0 {
            return Ok(());
        }
        self.file.as_file_mut().write_all(self.staging.as_slice())?;
        self.spilled += self.staging.len() as u64;
        self.staging.clear();
        Ok(())
    }
}

impl<B: StagingBuffer> BackingStore for DiskStore<B> {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.staging.extend(bytes);
        if self.staging.len() >= self.spill_threshold {
            self.spill()?;
        }
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if len > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "truncate length out of range",
            ));
        }

        if len >= self.spilled {
            self.staging.truncate((len - self.spilled) as usize);
            return Ok(());
        }

        self.staging.clear();
        let file = self.file.as_file_mut();
        file.set_len(len)?;
        file.seek(SeekFrom::End(0))?;
        self.spilled = len;
        Ok(())
    }

    fn overwrite(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let end = offset + bytes.len() as u64;
        if end > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "overwrite out of range",
            ));
        }

        // Part of the range that already lives in the file
        if offset < self.spilled {
            let in_file = (self.spilled.min(end) - offset) as usize;
            let file = self.file.as_file_mut();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&bytes[..in_file])?;
            file.seek(SeekFrom::End(0))?;
        }

        // Part still staged in memory
        if end > self.spilled {
            let skip = self.spilled.saturating_sub(offset) as usize;
            let start = (offset.max(self.spilled) - self.spilled) as usize;
            let staged = &mut self.staging.as_mut_slice()[start..start + bytes.len() - skip];
            staged.copy_from_slice(&bytes[skip..]);
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        self.spilled + self.staging.len() as u64
    }

    fn finish(self: Box<Self>) -> io::Result<Payload> {
        let mut store = *self;
        store.spill()?;
        store.file.as_file_mut().flush()?;

        Ok(Payload::File {
            file: store.file,
            len: store.spilled,
            streaming: store.streaming,
        })
    }
}

/// Remove collation files left in `dir` by a previous process
///
/// Only safe while no other agent shares `dir`. Returns how many files were
/// removed.
pub fn sweep_stale(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
            continue;
        }
        if !entry.file_type()?.is_file() {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("removed stale collation file {name}");
                removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove stale collation file {name}: {e}"),
        }
    }
    Ok(removed)
}
