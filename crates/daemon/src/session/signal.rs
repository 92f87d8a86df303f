//! One-shot completion signal shared by the tasks of a session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Broadcast "session finished" signal.
///
/// Cloning yields another handle to the same signal. Firing is guarded so
/// repeated teardown calls are no-ops instead of errors.
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl CompletionSignal {
    /// Creates a signal that has not fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal, waking every task blocked in [`wait`](Self::wait).
    ///
    /// Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            tracing::debug!("completion signal already fired");
            return false;
        }
        self.token.cancel();
        true
    }

    /// Resolves once the signal has fired.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}
