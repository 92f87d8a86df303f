//! [`ClusterApi`] backed by the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, LogParams};
use kube::Client;
use protocol::LogRequest;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info, warn};

use super::pump::{pump_streams, AbortGuard, PumpOutcome};
use super::{validate_pod, ClusterApi, ExecError, ExecTarget, LogSource, TargetError};
use crate::session::PtyStreams;

/// Talks to one cluster through a [`kube::Client`].
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wraps an already configured client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn validate_target(&self, target: &ExecTarget) -> Result<(), TargetError> {
        let pod = self
            .pods(&target.namespace)
            .get(&target.pod)
            .await
            .map_err(|e| match e {
                kube::Error::Api(response) if response.code == 404 => TargetError::PodNotFound {
                    namespace: target.namespace.clone(),
                    pod: target.pod.clone(),
                },
                other => TargetError::Lookup(other.to_string()),
            })?;

        validate_pod(&pod, &target.container)
    }

    async fn exec(
        &self,
        target: &ExecTarget,
        command: Vec<String>,
        streams: PtyStreams,
        tty: bool,
    ) -> Result<(), ExecError> {
        // The API server rejects a separate stderr stream on a TTY.
        let params = AttachParams::default()
            .container(target.container.clone())
            .stdin(true)
            .stdout(true)
            .stderr(!tty)
            .tty(tty);

        debug!(target = %target, ?command, tty, "Attaching to container");
        let mut attached = self
            .pods(&target.namespace)
            .exec(&target.pod, command, &params)
            .await?;

        let stdin = attached.stdin().ok_or(ExecError::MissingStream("stdin"))?;
        let stdout = attached.stdout().ok_or(ExecError::MissingStream("stdout"))?;
        let stderr = attached.stderr();
        let size_tx = attached.terminal_size();
        let status = attached.take_status();

        // Aborts the remote process unless it exited on its own, including
        // when this future is dropped mid-pump.
        let guard = AbortGuard::new(move || attached.abort());

        match pump_streams(streams, stdin, stdout, stderr, size_tx).await {
            Ok(PumpOutcome::RemoteExited) => guard.disarm(),
            Ok(PumpOutcome::ClientClosed) => {
                info!(target = %target, "Client left, detaching from remote process");
                return Ok(());
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Stream copy failed, detaching from remote process");
                return Err(e);
            }
        }

        let Some(status) = status else {
            return Ok(());
        };
        match status.await {
            Some(status) if status.status.as_deref() == Some("Failure") => {
                Err(ExecError::RemoteFailure(
                    status
                        .message
                        .or(status.reason)
                        .unwrap_or_else(|| "unknown error".to_string()),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn log_stream(
        &self,
        target: &ExecTarget,
        request: &LogRequest,
    ) -> Result<LogSource, ExecError> {
        let params = LogParams {
            container: Some(request.container.clone()),
            follow: request.follow,
            tail_lines: Some(request.tail_lines),
            ..LogParams::default()
        };

        debug!(
            target = %target,
            follow = request.follow,
            tail_lines = request.tail_lines,
            "Opening log stream"
        );
        let stream = self
            .pods(&target.namespace)
            .log_stream(&target.pod, &params)
            .await?;

        Ok(Box::pin(stream.compat()))
    }
}
