//! Gateway orchestrator for wiring together all components.
//!
//! This module provides the [`Orchestrator`] that owns the cluster registry,
//! its periodic refresh, and the HTTP listener, and drives them through a
//! start/stop lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::registry::{ClientLoader, ClusterRegistry, KubeconfigLoader};
use crate::server::{create_router, AppState};

/// How long background tasks get to finish after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, binding the listener.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Gateway orchestrator that manages all subsystems.
pub struct Orchestrator {
    /// Configuration.
    config: Arc<Config>,
    /// Known clusters.
    registry: Arc<ClusterRegistry>,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Address the listener is bound to while running.
    local_addr: Option<SocketAddr>,
    /// Refresh and server tasks.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Creates an orchestrator that loads kubeconfig credentials.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_loader(config, Arc::new(KubeconfigLoader))
    }

    /// Creates an orchestrator with a custom credential loader.
    pub fn with_loader(config: Config, loader: Arc<dyn ClientLoader>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let registry = Arc::new(ClusterRegistry::new(
            config.registry.kubeconfig_dir.clone(),
            loader,
        ));

        Ok(Self {
            config: Arc::new(config),
            registry,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            shutdown_token: CancellationToken::new(),
            local_addr: None,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns the cluster registry.
    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// Returns the effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the bound listener address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Starts the registry refresh and the HTTP listener.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }

        info!("Starting PodShell gateway...");

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                return Err(e);
            }
        };
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;

        // A previous stop() leaves the old token cancelled.
        if self.shutdown_token.is_cancelled() {
            self.shutdown_token = CancellationToken::new();
        }

        let interval = Duration::from_secs(self.config.registry.refresh_interval_secs);
        let refresh = self
            .registry
            .start_refresh_task(interval, self.shutdown_token.child_token());
        debug!(interval_secs = interval.as_secs(), "Started cluster refresh task");

        let app = create_router(AppState::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            self.shutdown_token.clone(),
        ));
        let shutdown = self.shutdown_token.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
            }
        });

        self.tasks.lock().await.extend([refresh, server]);
        self.local_addr = Some(local_addr);
        *self.state.write().await = OrchestratorState::Running;

        info!(addr = %local_addr, "PodShell gateway listening");
        Ok(local_addr)
    }

    async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.listen_addr()?;
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))
    }

    /// Stops the orchestrator gracefully.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }

        info!("Stopping PodShell gateway...");

        // Signal shutdown to all tasks
        self.shutdown_token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for mut task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("Background task did not stop in time, aborting");
                task.abort();
            }
        }

        *self.state.write().await = OrchestratorState::Stopped;
        info!("PodShell gateway stopped");
        Ok(())
    }
}
