//! Hub server setup and accept loops.
//!
//! # Responsibilities
//! - Bind every configured listener, loading TLS material where configured
//! - Accept connections and hand them to the connection manager
//! - Apply reloaded connection settings to new connections
//! - Stop accepting, stop all connections and drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::config::HubConfig;
use crate::http::handler::RequestHandler;
use crate::net::connection::{Connection, ConnectionSettings};
use crate::net::listener::{Listener, ListenerError};
use crate::net::manager::ConnectionManager;
use crate::net::tls;
use crate::net::transport::Security;

/// Back-off after a failed accept, so a full fd table does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to load TLS material for {address}: {source}")]
    Tls {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// A bound listening socket and its encryption setting.
pub struct BoundListener {
    listener: Listener,
    security: Security,
}

impl BoundListener {
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn is_secure(&self) -> bool {
        self.security.is_secure()
    }
}

/// Hub web server: listeners in front of a shared connection manager.
pub struct HubServer {
    config: HubConfig,
    handler: Arc<dyn RequestHandler>,
    manager: ConnectionManager,
    settings: Arc<ArcSwap<ConnectionSettings>>,
}

impl HubServer {
    pub fn new(config: HubConfig, handler: Arc<dyn RequestHandler>, manager: ConnectionManager) -> Self {
        let settings = Arc::new(ArcSwap::from_pointee(ConnectionSettings::from(&config.connection)));
        Self {
            config,
            handler,
            manager,
            settings,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Settings given to the next accepted connection.
    pub fn settings(&self) -> Arc<ConnectionSettings> {
        self.settings.load_full()
    }

    /// Bind all configured listeners.
    pub async fn bind(&self) -> Result<Vec<BoundListener>, ServerError> {
        let mut bound = Vec::with_capacity(self.config.listeners.len());
        for config in &self.config.listeners {
            let security = tls::security_for(config.tls.as_ref())
                .await
                .map_err(|source| ServerError::Tls {
                    address: config.bind_address.clone(),
                    source,
                })?;
            let listener = Listener::bind(config).await?;
            bound.push(BoundListener { listener, security });
        }
        Ok(bound)
    }

    /// Swap in new connection settings. Listener changes need a restart.
    pub fn apply_config(&mut self, config: HubConfig) {
        let settings = ConnectionSettings::from(&config.connection);
        tracing::info!(
            idle_timeout_secs = config.connection.idle_timeout_secs,
            close_grace_ms = config.connection.close_grace_ms,
            "Connection settings reloaded"
        );

        let old: Vec<&str> = self.config.listeners.iter().map(|l| l.bind_address.as_str()).collect();
        let new: Vec<&str> = config.listeners.iter().map(|l| l.bind_address.as_str()).collect();
        if old != new {
            tracing::warn!("Listener changes take effect after a restart");
        }

        self.settings.store(Arc::new(settings));
        self.config = config;
    }

    /// Serve until `shutdown` fires, then close every connection and drain.
    pub async fn run(
        mut self,
        listeners: Vec<BoundListener>,
        mut shutdown: broadcast::Receiver<()>,
        mut updates: Option<mpsc::UnboundedReceiver<HubConfig>>,
    ) {
        let mut accept_loops = JoinSet::new();
        for bound in listeners {
            if let Ok(addr) = bound.local_addr() {
                tracing::info!(address = %addr, secure = bound.is_secure(), "Accepting connections");
            }
            accept_loops.spawn(accept_loop(
                bound,
                self.manager.clone(),
                Arc::clone(&self.handler),
                Arc::clone(&self.settings),
            ));
        }

        loop {
            let update = async {
                match updates.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = shutdown.recv() => break,
                config = update => match config {
                    Some(config) => self.apply_config(config),
                    None => updates = None,
                },
            }
        }

        tracing::info!("Shutting down, no longer accepting connections");
        accept_loops.shutdown().await;

        let stopped = self.manager.stop_all();
        let settings = self.settings.load_full();
        let deadline = settings.close_grace * 2 + Duration::from_secs(1);
        if tokio::time::timeout(deadline, self.manager.wait_idle()).await.is_err() {
            tracing::warn!(
                remaining = self.manager.active_count(),
                "Connections still open after shutdown deadline"
            );
        }
        tracing::info!(stopped, "Hub server stopped");
    }
}

async fn accept_loop(
    bound: BoundListener,
    manager: ConnectionManager,
    handler: Arc<dyn RequestHandler>,
    settings: Arc<ArcSwap<ConnectionSettings>>,
) {
    loop {
        match bound.listener.accept().await {
            Ok((stream, peer, permit)) => {
                let connection = Connection::new(
                    stream,
                    peer,
                    bound.security.clone(),
                    ConnectionSettings::clone(&settings.load()),
                    Arc::clone(&handler),
                )
                .with_permit(permit);
                manager.start(connection);
            }
            Err(ListenerError::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}
