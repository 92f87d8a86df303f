//! # PodShell Protocol Library
//!
//! Wire types shared by the PodShell gateway and its clients.
//!
//! ## Overview
//!
//! PodShell exposes two browser-facing channels per container:
//!
//! - **Interactive channel**: one JSON [`TerminalMessage`] per transport frame,
//!   carrying keyboard input, terminal resizes, keepalives and process output.
//! - **Log channel**: plain text, one container log line per frame. Its
//!   parameters ([`LogQuery`]) come from the upgrade request.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Operation, TerminalMessage, TerminalSize};
//!
//! let frame = TerminalMessage::decode(br#"{"operation":"resize","cols":80,"rows":24}"#).unwrap();
//! assert_eq!(frame.operation, Operation::Resize);
//! assert_eq!(frame.resize_size(), TerminalSize::new(80, 24));
//!
//! let out = TerminalMessage::stdout(b"$ ").encode().unwrap();
//! assert_eq!(out, r#"{"operation":"stdout","data":"$ "}"#);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Frame and request parameter definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ExecQuery, LogQuery, LogRequest, Operation, TerminalMessage, TerminalSize, DEFAULT_COMMAND,
    DEFAULT_FOLLOW, DEFAULT_TAIL_LINES, END_OF_TRANSMISSION,
};
