//! Wire message definitions for PodShell.
//!
//! The interactive channel carries one JSON encoded [`TerminalMessage`] per
//! transport frame. The log channel carries plain text lines and has no
//! envelope; its parameters arrive on the upgrade request query string.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Byte sequence handed to the remote process when the interactive channel
/// terminates (ASCII EOT, the terminal "end of transmission" control).
pub const END_OF_TRANSMISSION: &[u8] = b"\x04";

/// Command executed when the client does not supply any `cmd` parameter.
pub const DEFAULT_COMMAND: &str = "/bin/bash";

/// Default number of backlog lines requested for a log stream.
pub const DEFAULT_TAIL_LINES: i64 = 200;

/// Log streams follow the container output unless told otherwise.
pub const DEFAULT_FOLLOW: bool = true;

/// Operation carried by a [`TerminalMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Keyboard input from the client.
    Stdin,
    /// Process output sent to the client.
    Stdout,
    /// Terminal size change from the client.
    Resize,
    /// Client keepalive.
    Ping,
    /// Any operation name this version does not understand.
    #[serde(other)]
    Unknown,
}

impl Operation {
    /// Returns the wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Stdin => "stdin",
            Operation::Stdout => "stdout",
            Operation::Resize => "resize",
            Operation::Ping => "ping",
            Operation::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Width in columns.
    pub cols: u16,
    /// Height in rows.
    pub rows: u16,
}

impl TerminalSize {
    /// Creates a new terminal size.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// Envelope for every frame on the interactive channel.
///
/// `data` is only meaningful for [`Operation::Stdin`] and
/// [`Operation::Stdout`]; `cols`/`rows` only for [`Operation::Resize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalMessage {
    /// What this frame carries.
    pub operation: Operation,
    /// Terminal bytes as text.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    /// Columns for a resize.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cols: u16,
    /// Rows for a resize.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rows: u16,
}

fn is_zero(value: &u16) -> bool {
    *value == 0
}

impl TerminalMessage {
    /// Builds a stdin frame.
    pub fn stdin(data: impl Into<String>) -> Self {
        Self {
            operation: Operation::Stdin,
            data: data.into(),
            cols: 0,
            rows: 0,
        }
    }

    /// Builds a stdout frame from a raw output chunk.
    ///
    /// The channel is text based, so byte sequences that are not valid UTF-8
    /// are replaced with U+FFFD.
    pub fn stdout(chunk: &[u8]) -> Self {
        Self {
            operation: Operation::Stdout,
            data: String::from_utf8_lossy(chunk).into_owned(),
            cols: 0,
            rows: 0,
        }
    }

    /// Builds a resize frame.
    pub fn resize(size: TerminalSize) -> Self {
        Self {
            operation: Operation::Resize,
            data: String::new(),
            cols: size.cols,
            rows: size.rows,
        }
    }

    /// Builds a ping frame.
    pub fn ping() -> Self {
        Self {
            operation: Operation::Ping,
            data: String::new(),
            cols: 0,
            rows: 0,
        }
    }

    /// Returns the size carried by a resize frame.
    pub fn resize_size(&self) -> TerminalSize {
        TerminalSize::new(self.cols, self.rows)
    }

    /// Decodes a frame from JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes the frame as a JSON string.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parameters for a container log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRequest {
    /// Container whose output is streamed.
    pub container: String,
    /// Keep the stream open and yield new lines as they are produced.
    pub follow: bool,
    /// Number of backlog lines to start from.
    pub tail_lines: i64,
}

impl LogRequest {
    /// Builds a request for `container` from parsed query parameters.
    pub fn from_query(container: impl Into<String>, query: &LogQuery) -> Self {
        Self {
            container: container.into(),
            follow: query.follow(),
            tail_lines: query.tail_lines(),
        }
    }
}

/// Query parameters of the interactive channel upgrade request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecQuery {
    /// Command and arguments, one `cmd` parameter each.
    pub cmd: Vec<String>,
}

impl ExecQuery {
    /// Parses a raw (still percent-encoded) query string.
    pub fn parse(query: &str) -> Self {
        let cmd = url::form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| key == "cmd")
            .map(|(_, value)| value.into_owned())
            .collect();
        Self { cmd }
    }

    /// Returns the command to run, falling back to `default` when none was given.
    pub fn command_or(&self, default: &[String]) -> Vec<String> {
        if self.cmd.is_empty() {
            default.to_vec()
        } else {
            self.cmd.clone()
        }
    }

    /// Returns the command to run, falling back to [`DEFAULT_COMMAND`].
    pub fn command(&self) -> Vec<String> {
        self.command_or(&[DEFAULT_COMMAND.to_string()])
    }
}

/// Query parameters of the log channel upgrade request.
///
/// Values that fail to parse are treated as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogQuery {
    /// Requested backlog size.
    pub tail: Option<i64>,
    /// Requested follow mode.
    pub follow: Option<bool>,
}

impl LogQuery {
    /// Parses a raw (still percent-encoded) query string.
    pub fn parse(query: &str) -> Self {
        let mut parsed = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "tail" => parsed.tail = value.trim().parse().ok(),
                "follow" => parsed.follow = parse_bool(&value),
                _ => {}
            }
        }
        parsed
    }

    /// Backlog size, defaulting to [`DEFAULT_TAIL_LINES`].
    pub fn tail_lines(&self) -> i64 {
        self.tail.unwrap_or(DEFAULT_TAIL_LINES)
    }

    /// Follow mode, defaulting to [`DEFAULT_FOLLOW`].
    pub fn follow(&self) -> bool {
        self.follow.unwrap_or(DEFAULT_FOLLOW)
    }

    /// Fills unset values from configured defaults.
    pub fn with_defaults(self, tail: i64, follow: bool) -> Self {
        Self {
            tail: Some(self.tail.unwrap_or(tail)),
            follow: Some(self.follow.unwrap_or(follow)),
        }
    }
}

/// Accepts the boolean spellings browsers and scripts commonly send.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
