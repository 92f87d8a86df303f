//! WebSocket destination for forwarded log lines.

use std::fmt::Display;

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt};

use super::forwarder::{ForwardError, LineSink};

/// Writes each log line as one text frame.
pub struct WsLogSink<W> {
    sink: W,
    closed: bool,
}

impl<W> WsLogSink<W>
where
    W: Sink<Message> + Unpin + Send,
    W::Error: Display,
{
    /// Wraps the outbound half of a WebSocket.
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            closed: false,
        }
    }

    /// Closes the transport. Later calls do nothing.
    pub async fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        if let Err(e) = self.sink.close().await {
            tracing::debug!(error = %e, "Error closing log transport");
        }
    }
}

#[async_trait]
impl<W> LineSink for WsLogSink<W>
where
    W: Sink<Message> + Unpin + Send,
    W::Error: Display,
{
    async fn send_line(&mut self, line: &str) -> Result<(), ForwardError> {
        self.sink
            .send(Message::Text(line.to_owned()))
            .await
            .map_err(|e| ForwardError::Write(e.to_string()))
    }
}
