//! Collection streams
//!
//! A [`CollectionStream`] owns the framing (header, reserved length field,
//! JSON opener/closer, separator trimming, length back-patching) and delegates
//! storage to a [`BackingStore`] chosen by [`CollationMode`]:
//!
//! | mode           | store                         | transfer                |
//! |----------------|-------------------------------|-------------------------|
//! | `memory`       | `MemoryStore<Vec<u8>>`        | buffer write            |
//! | `directmemory` | `MemoryStore<BytesMut>`       | frozen buffer write     |
//! | `disk`         | `DiskStore<Vec<u8>>`          | read file, then write   |
//! | `directdisk`   | `DiskStore<BytesMut>`         | buffered file stream    |
//!
//! The mode is a configuration decision; streams never switch on their own.

pub mod disk;
pub mod memory;
pub mod store;
pub mod stream;

use std::path::Path;

use bytes::BytesMut;

pub use disk::DiskStore;
pub use memory::MemoryStore;
pub use store::{BackingStore, Payload, StagingBuffer};
pub use stream::CollectionStream;

use crate::config::CollationMode;
use crate::error::{AgentError, AgentResult};

/// Create an empty stream backed according to `mode`
///
/// `dir` is where disk variants place their temp file; the system temp dir is
/// used when it is `None`.
pub fn open_stream(mode: CollationMode, dir: Option<&Path>) -> AgentResult<CollectionStream> {
    let store: Box<dyn BackingStore> = match mode {
        CollationMode::Memory => Box::new(MemoryStore::<Vec<u8>>::new()),
        CollationMode::DirectMemory => Box::new(MemoryStore::<BytesMut>::new()),
        CollationMode::Disk => {
            Box::new(DiskStore::<Vec<u8>>::create(dir, false).map_err(AgentError::Collation)?)
        }
        CollationMode::DirectDisk => {
            Box::new(DiskStore::<BytesMut>::create(dir, true).map_err(AgentError::Collation)?)
        }
    };

    Ok(CollectionStream::new(mode, store))
}
