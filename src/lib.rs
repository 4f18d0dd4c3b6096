//! netmon-helper
//!
//! The elevated half of a network monitor. The UI process runs unprivileged
//! and asks this helper for per-interface byte counters over a local socket.
//!
//! # Security Boundaries
//!
//! - Transport: named pipe (Windows) or Unix socket (mode 0600) only
//! - Authentication: HMAC-SHA256 proof over a launch secret, timestamp-bound,
//!   with per-identity attempt limits and lockout
//! - Sessions: capped in number, absolute lifetime and idle time
//! - Requests: per-session rate limit and per-request timeout

pub mod cli;
pub mod config;
pub mod executor;
pub mod ipc;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use executor::PrivilegedExecutor;
use ipc::{
    AuthConfig, Authenticator, CredentialVerifier, IpcHandler, IpcHandlerConfig, IpcServerConfig,
    ServerError, SessionConfig, SessionManager,
};
use shutdown::{ShutdownCoordinator, ShutdownResult};

/// Helper configuration.
#[derive(Debug, Clone)]
pub struct HelperConfig {
    pub endpoint: String,
    pub ipc_server: IpcServerConfig,
    pub auth: AuthConfig,
    pub sessions: SessionConfig,
    pub handler: IpcHandlerConfig,
    pub shutdown_timeout: Duration,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self::from(&config::EnvConfig::default())
    }
}

impl From<&config::EnvConfig> for HelperConfig {
    fn from(env: &config::EnvConfig) -> Self {
        Self {
            endpoint: env.endpoint.clone(),
            ipc_server: env.ipc_server,
            auth: env.auth,
            sessions: env.sessions,
            handler: env.handler,
            shutdown_timeout: env.shutdown_timeout,
        }
    }
}

/// The helper instance: shared tables plus the shutdown coordinator.
pub struct Helper {
    pub config: HelperConfig,
    pub ipc_handler: Arc<IpcHandler>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl Helper {
    pub fn new(
        config: HelperConfig,
        verifier: Arc<dyn CredentialVerifier>,
        executor: Arc<dyn PrivilegedExecutor>,
    ) -> Self {
        let authenticator = Arc::new(Authenticator::new(verifier, config.auth));
        let sessions = Arc::new(SessionManager::new(config.sessions));
        let ipc_handler = Arc::new(IpcHandler::new(
            authenticator,
            sessions,
            executor,
            config.handler,
        ));

        Self {
            config,
            ipc_handler,
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Serve until `shutdown_rx` flips to `true`, then drain connections.
    pub async fn serve(
        self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<ShutdownResult, ServerError> {
        let maintenance = Arc::clone(&self.ipc_handler).spawn_maintenance(self.shutdown.token());

        let served = ipc::server::run_server(
            self.config.endpoint.clone(),
            Arc::clone(&self.ipc_handler),
            shutdown_rx,
            Arc::clone(&self.shutdown),
            self.config.ipc_server,
        )
        .await;

        let result = self.shutdown.initiate(self.config.shutdown_timeout).await;
        if let Err(e) = maintenance.await {
            tracing::warn!(error = %e, "Maintenance task ended abnormally");
        }
        match &result {
            ShutdownResult::Complete => tracing::info!("Shutdown complete"),
            ShutdownResult::Timeout { remaining } => {
                tracing::warn!(remaining, "Shutdown timed out with connections still open")
            }
        }
        served.map(|()| result)
    }
}
