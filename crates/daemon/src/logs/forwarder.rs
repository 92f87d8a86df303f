//! Line-oriented log forwarding.
//!
//! Container logs arrive as a raw byte stream that may contain anything the
//! process wrote, including bytes that are not valid UTF-8. The forwarder
//! splits that stream into lines and hands each one to a [`LineSink`] as
//! text, dropping invalid byte sequences so the sink always gets decodable
//! output.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Size of the internal read buffer. Longer lines are reassembled, not cut.
pub const LOG_READ_BUFFER_SIZE: usize = 256;

/// Errors that end a forwarding run.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Reading from the log source failed.
    #[error("failed to read log stream: {0}")]
    Read(#[from] std::io::Error),

    /// Writing to the sink failed.
    #[error("failed to write log line: {0}")]
    Write(String),
}

/// Destination for forwarded log lines.
#[async_trait]
pub trait LineSink: Send {
    /// Delivers one line, without its terminator.
    async fn send_line(&mut self, line: &str) -> Result<(), ForwardError>;
}

/// Converts a raw line into text, dropping invalid UTF-8 sub-sequences.
///
/// Valid bytes keep their original order; a line that is already valid is
/// returned unchanged.
pub fn sanitize_line(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

/// Strips a trailing `\n` or `\r\n`.
fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Copies `source` to `sink` one line at a time until end of input.
///
/// A trailing line without a terminator is still forwarded. Returns the
/// number of lines written. Read and write errors end forwarding at once
/// and are returned to the caller, which owns closing the sink.
pub async fn forward_lines<R, K>(source: R, sink: &mut K) -> Result<usize, ForwardError>
where
    R: AsyncRead + Unpin,
    K: LineSink + ?Sized,
{
    let mut reader = BufReader::with_capacity(LOG_READ_BUFFER_SIZE, source);
    let mut line = Vec::with_capacity(LOG_READ_BUFFER_SIZE);
    let mut forwarded = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(forwarded);
        }

        sink.send_line(&sanitize_line(strip_terminator(&line))).await?;
        forwarded += 1;
    }
}
