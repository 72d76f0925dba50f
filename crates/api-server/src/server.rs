//! HTTP and metrics listeners.

use crate::ingress::EventIngress;
use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use campaign_core::config::AppConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: AppConfig,
    ingress: Arc<EventIngress>,
}

/// Build the REST router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/events", post(rest::notify_user_event))
        .route("/v1/attributes", post(rest::notify_user_attribute))
        .route("/v1/campaigns/:id/activate", post(rest::activate_campaign))
        .route("/v1/campaigns/:id/deactivate", post(rest::deactivate_campaign))
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl ApiServer {
    pub fn new(config: AppConfig, ingress: Arc<EventIngress>) -> Self {
        Self { config, ingress }
    }

    /// Serve the REST API until the listener fails.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            ingress: self.ingress.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, mode = ?self.ingress.mode(), "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Install the Prometheus recorder and its scrape listener.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
