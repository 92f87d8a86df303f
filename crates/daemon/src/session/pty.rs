//! Terminal stream capabilities handed to the exec layer.
//!
//! A remote process attached with a terminal needs three things from the
//! browser side: a byte source for its input, sinks for its output streams,
//! and a queue of terminal size changes. These traits describe exactly that,
//! so the exec layer never sees the transport and tests can substitute
//! doubles for either side.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use protocol::{Operation, ProtocolError, TerminalSize};
use thiserror::Error;

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors raised while bridging a transport to a terminal.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Reading the next frame from the transport failed.
    #[error("transport read failed: {0}")]
    TransportRead(String),

    /// The peer closed the transport.
    #[error("transport closed by peer")]
    TransportClosed,

    /// Writing a frame to the transport failed.
    #[error("transport write failed: {0}")]
    TransportWrite(String),

    /// A frame could not be decoded or encoded.
    #[error("invalid terminal message: {0}")]
    Message(#[from] ProtocolError),

    /// A frame carried an operation the input path does not accept.
    #[error("unknown message type '{0}'")]
    UnknownOperation(Operation),
}

/// Source of keyboard input for the remote process.
#[async_trait]
pub trait StdinSource: Send {
    /// Appends the next chunk of input to `buf` and returns its length.
    ///
    /// A return of `Ok(0)` means a control frame was consumed and the caller
    /// should read again. On error `buf` holds the end-of-transmission byte,
    /// which should still be forwarded so the remote process sees EOF.
    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize, BridgeError>;
}

/// Sink for one of the remote process output streams.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Delivers one output chunk and returns the number of bytes accepted.
    async fn write(&self, chunk: &[u8]) -> Result<usize, BridgeError>;
}

/// Blocking queue of terminal size changes.
#[async_trait]
pub trait TerminalSizeQueue: Send {
    /// Waits for the next size change.
    ///
    /// Returns `None` once the session has finished.
    async fn next(&mut self) -> Option<TerminalSize>;
}

/// The set of streams a terminal session lends to a remote process.
pub struct PtyStreams {
    /// Keyboard input.
    pub stdin: Box<dyn StdinSource>,
    /// Standard output of the remote process.
    pub stdout: Arc<dyn OutputSink>,
    /// Standard error of the remote process. Unused when a TTY is attached.
    pub stderr: Arc<dyn OutputSink>,
    /// Terminal size changes.
    pub resize: Box<dyn TerminalSizeQueue>,
}

impl std::fmt::Debug for PtyStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyStreams").finish_non_exhaustive()
    }
}

/// Anything that can hand out terminal streams for a remote process.
pub trait PtyHandler {
    /// Whether the remote process should be attached with a TTY.
    fn tty(&self) -> bool;

    /// Consumes the handler, yielding its streams.
    fn into_streams(self) -> PtyStreams;
}
