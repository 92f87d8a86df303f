//! Request handlers and per-connection session supervision.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use protocol::{ExecQuery, LogQuery, LogRequest};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::exec::{ExecError, ExecTarget, TargetError};
use crate::logs::{forward_lines, ForwardError, LineSink, WsLogSink};
use crate::registry::ClusterClient;
use crate::session::{PtyHandler, TerminalSession};

/// Path segments shared by both WebSocket routes.
type TargetPath = Path<(String, String, String, String)>;

/// Why a session ended early. Rendered as the single message sent to the
/// client before the transport is closed.
#[derive(Error, Debug)]
enum SessionFailure {
    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    #[error("Validate pod error! err: {0}")]
    Validation(#[from] TargetError),

    #[error("Exec to pod error! err: {0}")]
    Exec(#[source] ExecError),

    #[error("log err: {0}")]
    LogSource(#[source] ExecError),

    #[error("log err: {0}")]
    Forward(#[from] ForwardError),

    #[error("gateway is shutting down")]
    ShuttingDown,
}

/// `GET /healthz`
pub(super) async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clusters": state.registry.len().await,
    }))
}

/// `GET /ws/{cluster}/{namespace}/{pod}/{container}/webshell`
pub(super) async fn webshell(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((cluster, namespace, pod, container)): TargetPath,
    RawQuery(query): RawQuery,
) -> Response {
    let command = ExecQuery::parse(query.as_deref().unwrap_or_default())
        .command_or(&state.config.session.default_command);
    let target = ExecTarget::new(namespace, pod, container);

    ws.on_upgrade(move |socket| run_terminal(socket, state, cluster, target, command))
}

/// `GET /ws/{cluster}/{namespace}/{pod}/{container}/logs`
pub(super) async fn logs(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((cluster, namespace, pod, container)): TargetPath,
    RawQuery(query): RawQuery,
) -> Response {
    let defaults = &state.config.logs;
    let query = LogQuery::parse(query.as_deref().unwrap_or_default())
        .with_defaults(defaults.default_tail_lines, defaults.default_follow);
    let request = LogRequest::from_query(container.clone(), &query);
    let target = ExecTarget::new(namespace, pod, container);

    ws.on_upgrade(move |socket| run_logs(socket, state, cluster, target, request))
}

async fn lookup(state: &AppState, cluster: &str) -> Result<Arc<ClusterClient>, SessionFailure> {
    state
        .registry
        .get(cluster)
        .await
        .ok_or_else(|| SessionFailure::ClusterNotFound(cluster.to_string()))
}

async fn run_terminal(
    socket: WebSocket,
    state: AppState,
    cluster: String,
    target: ExecTarget,
    command: Vec<String>,
) {
    let session_id = Uuid::new_v4().to_string();
    info!(
        session_id = %session_id,
        cluster = %cluster,
        namespace = %target.namespace,
        pod = %target.pod,
        container = %target.container,
        ?command,
        "Terminal session opened"
    );

    let (sink, stream) = socket.split();
    let session =
        TerminalSession::new(session_id.clone(), stream, sink).with_tty(state.config.session.tty);
    let handle = session.handle();

    let run = async {
        let client = lookup(&state, &cluster).await?;
        client.api().validate_target(&target).await?;
        let tty = session.tty();
        client
            .api()
            .exec(&target, command, session.into_streams(), tty)
            .await
            .map_err(SessionFailure::Exec)
    };

    // Dropping the exec future on shutdown detaches from the remote process.
    let result = tokio::select! {
        result = run => result,
        () = state.shutdown.cancelled() => Err(SessionFailure::ShuttingDown),
    };

    if let Err(failure) = result {
        warn!(session_id = %session_id, error = %failure, "Terminal session failed");
        if let Err(e) = handle.write_output(&failure.to_string()).await {
            debug!(session_id = %session_id, error = %e, "Could not report failure to client");
        }
    }

    handle.mark_done();
    handle.close().await;
    info!(session_id = %session_id, "Terminal session closed");
}

async fn run_logs(
    socket: WebSocket,
    state: AppState,
    cluster: String,
    target: ExecTarget,
    request: LogRequest,
) {
    let session_id = Uuid::new_v4().to_string();
    info!(
        session_id = %session_id,
        cluster = %cluster,
        namespace = %target.namespace,
        pod = %target.pod,
        container = %target.container,
        follow = request.follow,
        tail_lines = request.tail_lines,
        "Log session opened"
    );

    let (sink, stream) = socket.split();
    let mut log_sink = WsLogSink::new(sink);

    let result = async {
        let client = lookup(&state, &cluster).await?;
        client.api().validate_target(&target).await?;
        let source = client
            .api()
            .log_stream(&target, &request)
            .await
            .map_err(SessionFailure::LogSource)?;

        tokio::select! {
            forwarded = forward_lines(source, &mut log_sink) => {
                let lines = forwarded?;
                debug!(session_id = %session_id, lines, "Log stream ended");
            }
            () = client_gone(stream) => {
                debug!(session_id = %session_id, "Client left log session");
            }
            () = state.shutdown.cancelled() => return Err(SessionFailure::ShuttingDown),
        }
        Ok::<_, SessionFailure>(())
    }
    .await;

    if let Err(failure) = result {
        warn!(session_id = %session_id, error = %failure, "Log session failed");
        if let Err(e) = log_sink.send_line(&failure.to_string()).await {
            debug!(session_id = %session_id, error = %e, "Could not report failure to client");
        }
    }

    log_sink.close().await;
    info!(session_id = %session_id, "Log session closed");
}

/// Resolves once the client closes its side of the connection.
async fn client_gone<S, E>(mut stream: S)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    while let Some(Ok(message)) = stream.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
}
