//! Gateway server

use std::sync::Arc;

use crate::cache::{CacheBackend, MemoryBackend, RedisBackend};
use crate::common::{CacheBackendKind, Clock, Config, Result, SystemClock};
use crate::fallback::FallbackCoordinator;
use crate::gateway::http::{create_router, AppState};
use crate::gateway::{spawn_resync_task, Gateway, HttpPrimaryStore};

/// Production wiring of a [`Gateway`] behind the HTTP API.
pub struct GatewayServer {
    config: Config,
}

impl GatewayServer {
    /// Create a new server from an already validated config.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Wire the production collaborators into a gateway.
    pub fn build_gateway(&self) -> Result<Arc<Gateway>> {
        let primary = Arc::new(HttpPrimaryStore::new(&self.config.primary)?);
        let backend: Arc<dyn CacheBackend> = match self.config.cache.backend {
            CacheBackendKind::Redis => Arc::new(RedisBackend::connect(&self.config.cache)?),
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let coordinator = Arc::new(FallbackCoordinator::new(
            &self.config.health,
            Arc::clone(&clock),
        ));

        Ok(Arc::new(Gateway::new(
            &self.config,
            primary,
            backend,
            coordinator,
            clock,
        )))
    }

    /// Run the gateway until ctrl-c.
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting storegate");
        tracing::info!("  HTTP API: {}", self.config.server.bind_addr);
        tracing::info!("  Primary store: {}", self.config.primary.base_url);
        tracing::info!(
            "  Shared cache: {:?} (namespace {}, ttl {}s)",
            self.config.cache.backend,
            self.config.cache.namespace,
            self.config.cache.ttl_seconds
        );
        tracing::info!(
            "  Circuit: degrade after {} failures, recover after {} successes",
            self.config.health.failure_threshold,
            self.config.health.recovery_threshold
        );

        let gateway = self.build_gateway()?;

        let monitor_handle = Arc::clone(gateway.monitor()).spawn();
        let resync_handle = spawn_resync_task(Arc::clone(&gateway));

        let router = create_router(AppState { gateway }, self.config.server.max_body_bytes);
        let listener = tokio::net::TcpListener::bind(self.config.server.bind_addr).await?;

        tracing::info!("storegate ready");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        monitor_handle.abort();
        resync_handle.abort();

        if let Err(e) = served {
            tracing::error!("HTTP server error: {}", e);
            return Err(e.into());
        }
        tracing::info!("storegate stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
