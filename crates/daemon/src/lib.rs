//! # PodShell Gateway Library
//!
//! This crate provides the gateway that puts interactive shells and log
//! tails of Kubernetes containers behind a browser-facing WebSocket.
//!
//! ## Overview
//!
//! - **Session Bridge**: Adapts a WebSocket to the stdin/stdout/resize
//!   streams of a remote exec
//! - **Log Forwarder**: Relays container log lines as text frames
//! - **Cluster Registry**: Named cluster clients loaded from kubeconfig files
//! - **HTTP Server**: Static pages, health check and the WebSocket routes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐          ┌─────────────────────────┐  │
//! │  │  HTTP / WS       │ ──────▶  │   Cluster Registry      │  │
//! │  │  server          │          │   (periodic refresh)    │  │
//! │  └──────────────────┘          └─────────────────────────┘  │
//! │           │                                 │               │
//! │  ┌──────────────────┐          ┌─────────────────────────┐  │
//! │  │  Session Bridge  │ ◀──────▶ │   Cluster API           │  │
//! │  │  Log Forwarder   │          │   (exec, log stream)    │  │
//! │  └──────────────────┘          └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use podshell::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut orchestrator = Orchestrator::new(config)?;
//!     let addr = orchestrator.start().await?;
//!     println!("listening on {addr}");
//!
//!     tokio::signal::ctrl_c().await?;
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: WebSocket terminal bridge
//! - [`logs`]: Log line forwarding
//! - [`exec`]: Cluster API seam and its kube-backed implementation
//! - [`registry`]: Cluster registry and credential loading
//! - [`server`]: HTTP routes and per-connection supervision
//! - [`orchestrator`]: Gateway lifecycle

pub mod config;
pub mod exec;
pub mod logs;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{
    BridgeError, CompletionSignal, PtyHandler, PtyStreams, SessionHandle, SessionId,
    TerminalSession,
};

// Re-export cluster types for convenience
pub use exec::{ClusterApi, ExecError, ExecTarget, KubeClusterApi, LogSource, TargetError};
pub use registry::{
    ClientLoader, ClusterClient, ClusterRegistry, KubeconfigLoader, RefreshReport, RegistryError,
};

// Re-export log types for convenience
pub use logs::{forward_lines, sanitize_line, ForwardError, LineSink, WsLogSink};

// Re-export server types for convenience
pub use server::{create_router, AppState};

// Re-export orchestrator types for convenience
pub use orchestrator::{Orchestrator, OrchestratorState};
