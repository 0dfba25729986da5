//! Newline-delimited framing for the local transport.
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"ping"}\n
//! ```
//!
//! One JSON message per physical line in both directions. All output goes
//! through a single writer lock, so concurrent responses never interleave.

use crate::error::{BridgeError, Result};
use crate::lifecycle::ConnectionStateMachine;
use crate::protocol::RpcResponse;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::Mutex;
use tracing::{trace, warn};

/// Reads newline-delimited text from the local input stream.
pub struct LineReader<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next line without its terminator, or `None` on end of input.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serializes responses onto the local output stream.
pub struct LineWriter {
    out: Mutex<BoxedWriter>,
    state: Arc<ConnectionStateMachine>,
}

impl LineWriter {
    pub fn new<W>(writer: W, state: Arc<ConnectionStateMachine>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            out: Mutex::new(Box::new(writer)),
            state,
        }
    }

    /// Write one line and flush it.
    ///
    /// Embedded `\r`/`\n` characters are stripped so the payload occupies
    /// exactly one physical line. Rejected once the bridge is disconnected.
    pub async fn write_line(&self, text: &str) -> Result<()> {
        if !self.state.can_write() {
            warn!("Dropping output after disconnect: {}", text);
            return Err(BridgeError::TransportClosed);
        }

        let mut line = single_line(text).into_owned();
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        trace!("Wrote {} bytes", line.len());
        Ok(())
    }

    /// Serialize and write a response.
    pub async fn write_response(&self, response: &RpcResponse) -> Result<()> {
        let text = serde_json::to_string(response)?;
        self.write_line(&text).await
    }
}

/// Remove line terminators from a serialized payload.
pub fn single_line(text: &str) -> Cow<'_, str> {
    if text.contains(['\n', '\r']) {
        Cow::Owned(text.chars().filter(|c| *c != '\n' && *c != '\r').collect())
    } else {
        Cow::Borrowed(text)
    }
}
