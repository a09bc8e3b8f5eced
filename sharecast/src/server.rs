//! Server lifecycle management
//!
//! Starts the background tasks (stream poller, SSE heartbeat sweep) and the
//! HTTP server, then tears them down in order on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sharecast_api::AppState;
use sharecast_core::Config;
use sharecast_hub::{InMemoryPresenceStore, StreamBroadcaster, StreamPoller};
use sharecast_proxy::SignalingProxy;

const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Services {
    pub presence: Arc<InMemoryPresenceStore>,
    pub broadcaster: Arc<StreamBroadcaster>,
    pub poller: Arc<StreamPoller>,
    pub proxy: SignalingProxy,
}

pub struct ShareCastServer {
    config: Config,
    services: Services,
    cancel: CancellationToken,
}

impl ShareCastServer {
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config,
            services,
            cancel: CancellationToken::new(),
        }
    }

    /// Start all components and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting sharecast server...");

        let poller_handle = self.services.poller.clone().start(
            self.config.streams.poll_interval(),
            self.cancel.child_token(),
        );
        info!("Stream poller started");

        let heartbeat_handle = self.services.broadcaster.clone().start_heartbeat(
            self.config.streams.heartbeat_interval(),
            self.cancel.child_token(),
        );
        info!("SSE heartbeat sweep started");

        let http_handle = self.start_http_server().await?;

        info!("All components started successfully");

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        self.cancel.cancel();
        self.shutdown(vec![("poller", poller_handle), ("heartbeat", heartbeat_handle)])
            .await;

        Ok(())
    }

    async fn shutdown(&self, tasks: Vec<(&'static str, JoinHandle<()>)>) {
        info!("Shutting down sharecast server...");
        info!(
            "Open SSE channels at shutdown: {}",
            self.services.broadcaster.registry().channel_count()
        );

        for (name, handle) in tasks {
            match tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("{name} task stopped"),
                Ok(Err(e)) => error!("{name} task failed: {e}"),
                Err(_) => warn!("{name} task did not stop within {TASK_STOP_TIMEOUT:?}"),
            }
        }

        info!("Sharecast server shutdown complete");
    }

    /// Bind the listener and serve until the cancellation token fires
    async fn start_http_server(&self) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let http_addr: std::net::SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        let router = sharecast_api::create_router(AppState {
            presence: self.services.presence.clone(),
            broadcaster: self.services.broadcaster.clone(),
            proxy: self.services.proxy.clone(),
        });

        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            info!("HTTP server listening on {}", http_addr);

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
