//! Terminal session bridging.
//!
//! This module adapts a browser WebSocket into the input, output and resize
//! streams of a remote terminal, and provides the completion signal that
//! ties the lifetimes of those streams together.

pub mod bridge;
pub mod pty;
pub mod signal;

pub use bridge::{SessionHandle, SizeQueue, TerminalReader, TerminalSession, TerminalWriter};
pub use pty::{
    BridgeError, OutputSink, PtyHandler, PtyStreams, SessionId, StdinSource, TerminalSizeQueue,
};
pub use signal::CompletionSignal;
