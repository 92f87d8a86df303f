//! Remote execution against cluster pods.
//!
//! This module defines the [`ClusterApi`] seam used by the session
//! supervisor: validate that a container can be attached to, run a command
//! in it with terminal streams, or open its log stream. [`KubeClusterApi`]
//! is the production implementation; tests substitute their own.

pub mod client;
pub mod pump;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use protocol::LogRequest;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::session::{BridgeError, PtyStreams};

pub use client::KubeClusterApi;
pub use pump::{pump_streams, PumpOutcome};

/// Raw container log bytes.
pub type LogSource = Pin<Box<dyn AsyncRead + Send>>;

/// The container a session is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    /// Namespace of the pod.
    pub namespace: String,
    /// Pod name.
    pub pod: String,
    /// Container name within the pod.
    pub container: String,
}

impl ExecTarget {
    /// Creates a new target.
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// Reasons a container cannot be attached to.
#[derive(Error, Debug)]
pub enum TargetError {
    /// The pod does not exist.
    #[error("pod {namespace}/{pod} not found")]
    PodNotFound { namespace: String, pod: String },

    /// The pod exists but is not running.
    #[error("pod {pod} is {phase}, not Running")]
    NotRunning { pod: String, phase: String },

    /// The container is not declared in the pod spec.
    #[error("container {container} not found in pod {pod}")]
    ContainerNotFound { pod: String, container: String },

    /// The container is declared but not ready.
    #[error("container {container} in pod {pod} is not ready")]
    ContainerNotReady { pod: String, container: String },

    /// The pod could not be fetched.
    #[error("failed to look up pod: {0}")]
    Lookup(String),
}

/// Errors from running a command or streaming logs.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The cluster API rejected or failed the request.
    #[error("{0}")]
    Api(#[from] kube::Error),

    /// The browser side of the session failed.
    #[error("{0}")]
    Bridge(#[from] BridgeError),

    /// Copying to or from the remote process failed.
    #[error("remote stream failed: {0}")]
    Io(#[from] std::io::Error),

    /// The attached process did not expose a requested stream.
    #[error("remote process has no {0} stream")]
    MissingStream(&'static str),

    /// The remote command reported failure.
    #[error("command failed: {0}")]
    RemoteFailure(String),
}

/// Operations the supervisor needs from a cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Checks that the target container exists and is ready.
    async fn validate_target(&self, target: &ExecTarget) -> Result<(), TargetError>;

    /// Runs `command` in the target container, wired to `streams`.
    ///
    /// Returns once the remote process exits or the client goes away.
    async fn exec(
        &self,
        target: &ExecTarget,
        command: Vec<String>,
        streams: PtyStreams,
        tty: bool,
    ) -> Result<(), ExecError>;

    /// Opens the log stream of the target container.
    async fn log_stream(
        &self,
        target: &ExecTarget,
        request: &LogRequest,
    ) -> Result<LogSource, ExecError>;
}

/// Checks that `container` in `pod` can be attached to.
///
/// The pod must be in the `Running` phase, declare the container in its
/// spec, and report the container as ready.
pub fn validate_pod(pod: &Pod, container: &str) -> Result<(), TargetError> {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let status = pod.status.as_ref();

    let phase = status.and_then(|s| s.phase.as_deref()).unwrap_or("Unknown");
    if phase != "Running" {
        return Err(TargetError::NotRunning {
            pod: name,
            phase: phase.to_string(),
        });
    }

    let declared = pod
        .spec
        .as_ref()
        .is_some_and(|spec| spec.containers.iter().any(|c| c.name == container));
    if !declared {
        return Err(TargetError::ContainerNotFound {
            pod: name,
            container: container.to_string(),
        });
    }

    let ready = status
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|c| c.name == container))
        .is_some_and(|c| c.ready);
    if !ready {
        return Err(TargetError::ContainerNotReady {
            pod: name,
            container: container.to_string(),
        });
    }

    Ok(())
}
