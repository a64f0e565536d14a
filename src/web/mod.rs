//! Web server module

mod middleware;
mod routes;
mod sse;

pub use middleware::AdminAuthLayer;
pub use routes::{AnalyticsRequest, AnalyticsResponse, ButtonClickPayload, PageViewPayload};

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{AnalyticsConfig, Config};
use crate::dates;
use crate::events::EventBus;
use crate::store::{StoreHandle, WriteCommand};

pub struct AppState {
    pub store: StoreHandle,
    pub event_bus: EventBus,
    pub analytics: AnalyticsConfig,
    pub admin_password: Option<String>,
}

impl AppState {
    pub fn new(config: &Config, store: StoreHandle, event_bus: EventBus) -> Self {
        Self {
            store,
            event_bus,
            analytics: config.analytics.clone(),
            admin_password: config.admin.password().map(str::to_string),
        }
    }
}

/// Build the application router.
///
/// Event ingestion and the health check are public. Everything that reads or
/// resets data sits behind the admin guard.
pub fn router(state: Arc<AppState>) -> Router {
    let guard = AdminAuthLayer::new(state.admin_password.clone());

    Router::new()
        .route(
            "/analytics",
            get(routes::get_stats)
                .delete(routes::clear_data)
                .route_layer(guard.clone())
                .post(routes::record_event),
        )
        .route("/analytics/dashboard", get(routes::dashboard).route_layer(guard.clone()))
        .route("/analytics/events", get(sse::events_handler).route_layer(guard))
        .route("/health", get(routes::health))
        .with_state(state)
}

/// Request span without the query string, which may carry the admin token
fn request_span(request: &Request<Body>) -> tracing::Span {
    tracing::info_span!("request", method = %request.method(), path = %request.uri().path())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Spawn the retention pruner when retention is enabled
pub fn start_background_tasks(store: StoreHandle, analytics: &AnalyticsConfig) {
    if analytics.retention_days == 0 {
        return;
    }

    let retention_days = analytics.retention_days;
    let period = Duration::from_secs(analytics.prune_interval_secs);
    info!(retention_days, interval_secs = analytics.prune_interval_secs, "Retention pruner enabled");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let Some(cutoff) = dates::window_start(dates::today(), retention_days) else {
                continue;
            };
            match store.submit(WriteCommand::PruneBefore(cutoff)).await {
                Ok(applied) => tracing::debug!(?applied, %cutoff, "retention pass finished"),
                Err(e) => {
                    tracing::error!(error = %e, "retention pass failed, stopping pruner");
                    break;
                }
            }
        }
    });
}

pub async fn start_server(config: &Config, state: Arc<AppState>) -> Result<()> {
    let app = router(state)
        .layer(cors_layer(&config.server.cors_origins))
        .layer(TraceLayer::new_for_http().make_span_with(request_span));

    let addr = config.bind_addr();
    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, AnalyticsStore, StoreLimits};
    use chrono::Days;

    #[tokio::test]
    async fn pruner_drops_buckets_past_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.json");
        let today = dates::today();
        let old = today.checked_sub_days(Days::new(45)).unwrap();

        let mut seeded = AnalyticsStore::default();
        seeded.record_page_view(old, true, "direct");
        seeded.record_page_view(today, true, "google.com");
        let handle = store::start_write_buffer(path.clone(), seeded, StoreLimits::default());

        let analytics = AnalyticsConfig {
            retention_days: 30,
            ..AnalyticsConfig::default()
        };
        start_background_tasks(handle.clone(), &analytics);

        let mut remaining = Vec::new();
        for _ in 0..100 {
            remaining = handle.read(|s| s.by_date.keys().copied().collect::<Vec<_>>()).await;
            if remaining.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining, vec![today]);

        // All-time counters survive pruning and the pass is persisted
        assert_eq!(handle.read(|s| s.global.total_visits).await, 2);
        let on_disk = store::load(&path).await.unwrap();
        assert_eq!(on_disk.by_date.len(), 1);
    }

    #[tokio::test]
    async fn pruner_is_off_without_retention() {
        let dir = tempfile::tempdir().unwrap();
        let old = dates::today().checked_sub_days(Days::new(400)).unwrap();
        let mut seeded = AnalyticsStore::default();
        seeded.record_page_view(old, false, "direct");
        let handle = store::start_write_buffer(dir.path().join("a.json"), seeded, StoreLimits::default());

        start_background_tasks(handle.clone(), &AnalyticsConfig::default());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.read(|s| s.by_date.len()).await, 1);
    }
}
