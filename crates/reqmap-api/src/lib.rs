//! # reqmap-api — Axum API Service for the Requirement Applicability Engine
//!
//! Exposes the applicability engine over HTTP: resolution of an
//! organization's effective requirement list, manual include/exclude/revert
//! decisions, bulk inclusion by requirement filter, rule administration and
//! audit verification. State lives in memory or in Postgres.
//!
//! ## API Surface
//!
//! | Prefix                                  | Module                      | Domain                |
//! |-----------------------------------------|-----------------------------|-----------------------|
//! | `/v1/organizations/{id}/requirements`   | [`routes::organizations`]   | Resolution            |
//! | `/v1/organizations/{id}/attributes`     | [`routes::organizations`]   | Attributes            |
//! | `/v1/organizations/{id}/requirements/*` | [`routes::organizations`]   | Manual decisions      |
//! | `/v1/organizations/{id}/bulk-include`   | [`routes::organizations`]   | Bulk inclusion        |
//! | `/v1/requirements/{id}/*`               | [`routes::requirements`]    | Rules, reconciliation |
//! | `/v1/rules/preview`                     | [`routes::requirements`]    | Rule preview          |
//! | `/v1/audit/verify`                      | [`routes::audit`]           | Audit chain           |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → Handler
//! ```
//!
//! ## OpenAPI
//!
//! Auto-generated OpenAPI 3.1 spec via utoipa derive macros at `/openapi.json`.

pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::middleware::metrics::ApiMetrics;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) and `/metrics` sit outside the request
/// metrics so scrapes do not count themselves.
pub fn app(state: AppState) -> Router {
    let metrics = state.metrics.clone();
    let metrics_on = state.config.metrics_enabled;

    // Body size limit: 2 MiB. Bulk requests carry a filter, not row lists.
    let api = Router::new()
        .merge(routes::organizations::router())
        .merge(routes::requirements::router())
        .merge(routes::audit::router())
        .merge(openapi::router());

    let mut api = api.layer(DefaultBodyLimit::max(2 * 1024 * 1024));

    if metrics_on {
        api = api
            .layer(from_fn(middleware::metrics::metrics_middleware))
            .layer(Extension(metrics.clone()));
    }

    let api = api
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let mut probes = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    if metrics_on {
        probes = probes
            .route("/metrics", axum::routing::get(prometheus_metrics))
            .layer(Extension(metrics));
    }

    let probes = probes.with_state(state);

    Router::new().merge(probes).merge(api)
}

/// GET /metrics — Prometheus metrics scrape endpoint.
async fn prometheus_metrics(Extension(metrics): Extension<ApiMetrics>) -> impl IntoResponse {
    match metrics.gather_and_encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode Prometheus metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}

/// Liveness probe — always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe — 200 "ready", or 503 when the configured database does
/// not answer.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }
    (StatusCode::OK, "ready").into_response()
}
