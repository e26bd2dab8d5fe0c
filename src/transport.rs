//! TCP exchanges with a monitoring server
//!
//! Every exchange opens a fresh connection, writes one frame, reads one frame
//! and closes. The whole round trip is bounded by the configured timeout.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use crate::collation::CollectionStream;
use crate::error::{AgentError, AgentResult};
use crate::protocol::frame::{read_frame, write_frame};

#[derive(Debug, Clone, Copy)]
pub struct Connector {
    timeout: Duration,
}

impl Connector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn connect(&self, address: &str, port: u16) -> AgentResult<TcpStream> {
        let stream = timeout(self.timeout, TcpStream::connect((address, port)))
            .await
            .map_err(|_| AgentError::Timeout(self.timeout))??;
        stream.set_nodelay(true)?;
        trace!(address, port, "connected");
        Ok(stream)
    }

    /// Send `payload` as one frame and return the body of the reply frame
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn request(&self, address: &str, port: u16, payload: &[u8]) -> AgentResult<Vec<u8>> {
        let exchange = async {
            let mut stream = self.connect(address, port).await?;
            write_frame(&mut stream, payload).await?;
            let reply = read_frame(&mut stream).await?;
            stream.shutdown().await.ok();
            Ok::<_, AgentError>(reply)
        };

        let reply = timeout(self.timeout, exchange)
            .await
            .map_err(|_| AgentError::Timeout(self.timeout))??;
        debug!(reply_bytes = reply.len(), "request completed");
        Ok(reply)
    }

    /// Flush a finalized collection stream and return the body of the reply
    #[instrument(skip(self, stream), fields(results = stream.result_count()))]
    pub async fn submit(
        &self,
        address: &str,
        port: u16,
        stream: &CollectionStream,
    ) -> AgentResult<Vec<u8>> {
        let exchange = async {
            let mut socket = self.connect(address, port).await?;
            stream.write_to(&mut socket).await?;
            socket.flush().await?;
            let reply = read_frame(&mut socket).await?;
            socket.shutdown().await.ok();
            Ok::<_, AgentError>(reply)
        };

        timeout(self.timeout, exchange)
            .await
            .map_err(|_| AgentError::Timeout(self.timeout))?
    }
}
