use std::fmt;

use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tracing::{debug, trace};

use super::store::{BackingStore, Payload};
use crate::config::CollationMode;
use crate::error::{AgentError, AgentResult};
use crate::protocol::frame::{self, AGENT_DATA_OPENER, LENGTH_FIELD_LEN};

/// Buffered, framed accumulator for one submission batch
///
/// All mutating calls take `&self`; every append happens inside one critical
/// section together with the counter updates, so concurrent units of work can
/// share a stream without interleaving records.
pub struct CollectionStream {
    mode: CollationMode,
    state: Mutex<StreamState>,
}

struct StreamState {
    /// `None` once the stream has been flushed or closed
    store: Option<Box<dyn BackingStore>>,
    byte_count: u64,
    result_count: u64,
    length_offset: Option<u64>,
    trimmed: bool,
}

impl StreamState {
    fn store(&mut self) -> AgentResult<&mut Box<dyn BackingStore>> {
        self.store.as_mut().ok_or(AgentError::StreamClosed)
    }

    fn append(&mut self, bytes: &[u8]) -> AgentResult<()> {
        self.store()?
            .append(bytes)
            .map_err(AgentError::Collation)?;
        self.byte_count += bytes.len() as u64;
        Ok(())
    }
}

impl CollectionStream {
    pub fn new(mode: CollationMode, store: Box<dyn BackingStore>) -> Self {
        Self {
            mode,
            state: Mutex::new(StreamState {
                store: Some(store),
                byte_count: 0,
                result_count: 0,
                length_offset: None,
                trimmed: false,
            }),
        }
    }

    pub fn mode(&self) -> CollationMode {
        self.mode
    }

    /// Write magic and version, reserve the length field, open the JSON body
    pub fn write_header(&self) -> AgentResult<()> {
        let mut state = self.state.lock();
        if state.length_offset.is_some() {
            return Err(AgentError::Protocol("frame header already written".into()));
        }

        state.append(&frame::header())?;
        let offset = state.byte_count;
        state.append(&[0u8; LENGTH_FIELD_LEN])?;
        state.length_offset = Some(offset);
        state.append(AGENT_DATA_OPENER)
    }

    /// Append one encoded record (expected to end in a `,` separator)
    pub fn add_result(&self, record: &str) -> AgentResult<()> {
        let mut state = self.state.lock();
        state.append(record.as_bytes())?;
        state.result_count += 1;
        Ok(())
    }

    /// Drop the separator after the last record
    ///
    /// No-op when no record was written, and on repeated calls. Returns whether
    /// a byte was removed.
    pub fn trim_last_character(&self) -> AgentResult<bool> {
        let mut state = self.state.lock();
        if state.result_count == 0 || state.trimmed {
            return Ok(false);
        }

        let len = state.byte_count - 1;
        state
            .store()?
            .truncate(len)
            .map_err(AgentError::Collation)?;
        state.byte_count = len;
        state.trimmed = true;
        Ok(true)
    }

    /// Close the JSON body with the `clock` field
    pub fn write_json_closer(&self, clock: i64) -> AgentResult<()> {
        self.state.lock().append(&frame::agent_data_closer(clock))
    }

    /// Patch the reserved length field with the number of bytes after it
    pub fn rewrite_payload_length(&self) -> AgentResult<u64> {
        let mut state = self.state.lock();
        let offset = state
            .length_offset
            .ok_or_else(|| AgentError::Protocol("frame header was never written".into()))?;

        let payload_len = state.byte_count - offset - LENGTH_FIELD_LEN as u64;
        state
            .store()?
            .overwrite(offset, &payload_len.to_le_bytes())
            .map_err(AgentError::Collation)?;

        trace!(payload_len, results = state.result_count, "patched payload length");
        Ok(payload_len)
    }

    /// Trim, close and patch in one go
    pub fn finalize(&self, clock: i64) -> AgentResult<u64> {
        self.trim_last_character()?;
        self.write_json_closer(clock)?;
        self.rewrite_payload_length()
    }

    /// Take the finished frame out of the stream, closing it
    pub fn take_payload(&self) -> AgentResult<Payload> {
        let store = self
            .state
            .lock()
            .store
            .take()
            .ok_or(AgentError::StreamClosed)?;
        store.finish().map_err(AgentError::Collation)
    }

    /// Flush the finished frame into `writer`
    pub async fn write_to<W>(&self, writer: &mut W) -> AgentResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let payload = self.take_payload()?;
        let len = payload.len();
        payload.write_to(writer).await?;
        debug!(bytes = len, mode = ?self.mode, "flushed collection stream");
        Ok(len)
    }

    /// Release the backing store; disk variants delete their temp file
    pub fn close(&self) {
        if self.state.lock().store.take().is_some() {
            trace!(mode = ?self.mode, "closed collection stream");
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().store.is_some()
    }

    pub fn byte_count(&self) -> u64 {
        self.state.lock().byte_count
    }

    pub fn result_count(&self) -> u64 {
        self.state.lock().result_count
    }
}

impl fmt::Debug for CollectionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CollectionStream")
            .field("mode", &self.mode)
            .field("byte_count", &state.byte_count)
            .field("result_count", &state.result_count)
            .field("open", &state.store.is_some())
            .finish()
    }
}
