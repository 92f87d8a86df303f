//! Bridge between a browser WebSocket and a remote terminal.
//!
//! A [`TerminalSession`] wraps the two halves of a WebSocket and turns them
//! into the [`PtyStreams`] a remote process expects:
//!
//! - inbound `stdin` frames become input bytes
//! - inbound `resize` frames are handed to the size queue one at a time
//! - output chunks become outbound `stdout` frames
//!
//! Resizes use a rendezvous handoff: the reader blocks until the size queue
//! has taken the value or the session has finished, so at most one size
//! change is ever in flight and none is silently dropped while the session
//! is alive.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::Message;
use bytes::BytesMut;
use futures::{Sink, SinkExt, Stream, StreamExt};
use protocol::{Operation, TerminalMessage, TerminalSize, END_OF_TRANSMISSION};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, trace, warn};

use super::pty::{
    BridgeError, OutputSink, PtyHandler, PtyStreams, SessionId, StdinSource, TerminalSizeQueue,
};
use super::signal::CompletionSignal;

type SizeHandoff = (TerminalSize, oneshot::Sender<()>);

/// Creates the producer and consumer ends of a resize rendezvous.
fn size_channel(done: CompletionSignal) -> (SizeSender, SizeQueue) {
    let (tx, rx) = mpsc::channel(1);
    (
        SizeSender {
            tx,
            done: done.clone(),
        },
        SizeQueue { rx, done },
    )
}

/// Producer end of the resize rendezvous.
#[derive(Debug)]
struct SizeSender {
    tx: mpsc::Sender<SizeHandoff>,
    done: CompletionSignal,
}

impl SizeSender {
    /// Hands a size to the queue and waits for it to be taken.
    ///
    /// Returns `false` if the session finished or the queue went away first.
    async fn send(&self, size: TerminalSize) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        let handoff = async {
            if self.tx.send((size, ack_tx)).await.is_err() {
                return false;
            }
            ack_rx.await.is_ok()
        };

        tokio::select! {
            delivered = handoff => delivered,
            _ = self.done.wait() => false,
        }
    }
}

/// Consumer end of the resize rendezvous.
#[derive(Debug)]
pub struct SizeQueue {
    rx: mpsc::Receiver<SizeHandoff>,
    done: CompletionSignal,
}

#[async_trait]
impl TerminalSizeQueue for SizeQueue {
    async fn next(&mut self) -> Option<TerminalSize> {
        tokio::select! {
            biased;
            _ = self.done.wait() => None,
            handoff = self.rx.recv() => {
                let (size, ack) = handoff?;
                // The reader may have given up on this value already.
                let _ = ack.send(());
                Some(size)
            }
        }
    }
}

/// Input half of a terminal session.
pub struct TerminalReader<S> {
    session_id: SessionId,
    stream: S,
    sizes: SizeSender,
}

impl<S, E> TerminalReader<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    /// Consumes one transport frame, appending any input to `buf`.
    async fn next_frame(&mut self, buf: &mut BytesMut) -> Result<usize, BridgeError> {
        let frame = match self.stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(BridgeError::TransportRead(e.to_string())),
            None => return Err(BridgeError::TransportClosed),
        };

        let payload = match frame {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Ping(_) | Message::Pong(_) => return Ok(0),
            Message::Close(_) => return Err(BridgeError::TransportClosed),
        };

        let message = TerminalMessage::decode(&payload)?;
        match message.operation {
            Operation::Stdin => {
                buf.extend_from_slice(message.data.as_bytes());
                Ok(message.data.len())
            }
            Operation::Resize => {
                let size = message.resize_size();
                trace!(session_id = %self.session_id, cols = size.cols, rows = size.rows, "Terminal resize");
                if !self.sizes.send(size).await {
                    debug!(session_id = %self.session_id, "Resize discarded, session finished");
                }
                Ok(0)
            }
            Operation::Ping => Ok(0),
            other => Err(BridgeError::UnknownOperation(other)),
        }
    }
}

#[async_trait]
impl<S, E> StdinSource for TerminalReader<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize, BridgeError> {
        match self.next_frame(buf).await {
            Ok(n) => Ok(n),
            Err(e) => {
                match &e {
                    BridgeError::TransportClosed => {
                        debug!(session_id = %self.session_id, "Terminal transport closed")
                    }
                    _ => warn!(session_id = %self.session_id, error = %e, "Terminal input failed"),
                }
                buf.extend_from_slice(END_OF_TRANSMISSION);
                Err(e)
            }
        }
    }
}

/// Output half of a terminal session.
///
/// Clones share the underlying sink, so stdout, stderr and the supervisor
/// can all write to the same transport.
pub struct TerminalWriter<W> {
    sink: Arc<Mutex<W>>,
}

impl<W> Clone for TerminalWriter<W> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<W> TerminalWriter<W>
where
    W: Sink<Message> + Unpin + Send,
    W::Error: Display,
{
    async fn send_frame(&self, frame: Message) -> Result<(), BridgeError> {
        self.sink
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| BridgeError::TransportWrite(e.to_string()))
    }
}

#[async_trait]
impl<W> OutputSink for TerminalWriter<W>
where
    W: Sink<Message> + Unpin + Send,
    W::Error: Display,
{
    async fn write(&self, chunk: &[u8]) -> Result<usize, BridgeError> {
        let frame = TerminalMessage::stdout(chunk).encode()?;
        self.send_frame(Message::Text(frame)).await?;
        Ok(chunk.len())
    }
}

/// Supervisor-side handle to a terminal session.
///
/// Stays usable after the session streams have been handed to the exec
/// layer, for marking completion, reporting errors and closing the
/// transport.
pub struct SessionHandle<W> {
    id: SessionId,
    writer: TerminalWriter<W>,
    done: CompletionSignal,
    closed: Arc<AtomicBool>,
}

impl<W> Clone for SessionHandle<W> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            writer: self.writer.clone(),
            done: self.done.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<W> SessionHandle<W>
where
    W: Sink<Message> + Unpin + Send,
    W::Error: Display,
{
    /// Returns the session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fires the completion signal. Safe to call more than once.
    pub fn mark_done(&self) -> bool {
        self.done.fire()
    }

    /// Sends `text` to the client as a `stdout` frame.
    pub async fn write_output(&self, text: &str) -> Result<(), BridgeError> {
        self.writer.write(text.as_bytes()).await.map(|_| ())
    }

    /// Closes the transport. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.writer.sink.lock().await.close().await {
            debug!(session_id = %self.id, error = %e, "Error closing terminal transport");
        }
    }
}

/// A browser terminal attached to a WebSocket.
///
/// # Example
///
/// ```ignore
/// let (sink, stream) = socket.split();
/// let session = TerminalSession::new(id, stream, sink);
/// let handle = session.handle();
/// api.exec(&target, command, session.into_streams(), true).await?;
/// handle.mark_done();
/// handle.close().await;
/// ```
pub struct TerminalSession<S, W> {
    id: SessionId,
    reader: TerminalReader<S>,
    writer: TerminalWriter<W>,
    sizes: SizeQueue,
    done: CompletionSignal,
    tty: bool,
}

impl<S, W> TerminalSession<S, W> {
    /// Wraps the inbound `stream` and outbound `sink` of a transport.
    pub fn new(id: impl Into<SessionId>, stream: S, sink: W) -> Self {
        let id = id.into();
        let done = CompletionSignal::new();
        let (sender, sizes) = size_channel(done.clone());

        Self {
            reader: TerminalReader {
                session_id: id.clone(),
                stream,
                sizes: sender,
            },
            writer: TerminalWriter {
                sink: Arc::new(Mutex::new(sink)),
            },
            sizes,
            done,
            tty: true,
            id,
        }
    }

    /// Sets whether the remote process gets a TTY. Defaults to `true`.
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Returns the session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns a handle that outlives [`PtyHandler::into_streams`].
    pub fn handle(&self) -> SessionHandle<W> {
        SessionHandle {
            id: self.id.clone(),
            writer: self.writer.clone(),
            done: self.done.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<S, W, E> PtyHandler for TerminalSession<S, W>
where
    S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
{
    fn tty(&self) -> bool {
        self.tty
    }

    fn into_streams(self) -> PtyStreams {
        PtyStreams {
            stdin: Box::new(self.reader),
            stdout: Arc::new(self.writer.clone()),
            stderr: Arc::new(self.writer),
            resize: Box::new(self.sizes),
        }
    }
}
