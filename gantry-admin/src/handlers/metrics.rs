use crate::server::AdminState;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use chrono::{Duration, Utc};
use gantry_observability::analytics::{self, GatewayStats};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub hours: Option<u32>,
}

/// GET /metrics — windowed aggregates over the request-log window.
pub async fn stats(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<StatsQuery>,
) -> Json<GatewayStats> {
    let hours = query.hours.unwrap_or(24).clamp(1, 168);
    let now = Utc::now();
    let logs = state.logs.since(now - Duration::hours(hours as i64));
    Json(analytics::compute_stats(&logs, hours, now))
}

/// GET /metrics/prometheus — text exposition for scrapers.
pub async fn prometheus(State(state): State<Arc<AdminState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather_text(),
    )
        .into_response()
}
