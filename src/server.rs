//! Server assembly: wires the engines over a store and serves the API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{self, AppState};
use crate::assignment::AssignmentEngine;
use crate::clock::Clock;
use crate::config::ControlConfig;
use crate::error::Result;
use crate::progress::ProgressAggregator;
use crate::registry::WorkerRegistry;
use crate::storage::ControlStore;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

pub struct ControlServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ControlServer {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ControlStore>,
        control_config: &ControlConfig,
    ) -> Result<Self> {
        let clock = Clock::from_hours(control_config.utc_offset_hours)?;

        let state = Arc::new(AppState {
            registry: WorkerRegistry::new(store.clone(), clock, control_config),
            assignment: AssignmentEngine::new(store.clone(), clock, control_config),
            progress: ProgressAggregator::new(store, clock, control_config),
        });

        Ok(Self { config, state })
    }

    pub fn router(&self) -> Router {
        api::router(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
    }

    /// Bind and serve; blocks until shutdown.
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("watch-control server listening on {}", addr);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}
