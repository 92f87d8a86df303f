//! Container log forwarding.
//!
//! This module streams container logs to a browser line by line.

pub mod forwarder;
pub mod sink;

pub use forwarder::{forward_lines, sanitize_line, ForwardError, LineSink, LOG_READ_BUFFER_SIZE};
pub use sink::WsLogSink;
