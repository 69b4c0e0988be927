use crate::server::{AdminState, ApiResult};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use gantry_core::health::{AggregatedHealth, ServiceHealth};
use gantry_core::GantryError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /services
pub async fn list_services(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let services = state.health.aggregated(&state.breaker).services;
    Json(json!({ "list": services, "total": services.len() }))
}

#[derive(Debug, Deserialize)]
pub struct ServiceRegistration {
    pub service_name: String,
    pub base_url: String,
}

/// POST /services — register a service for health monitoring ahead of its
/// first dispatch.
pub async fn register_service(
    State(state): State<Arc<AdminState>>,
    Json(reg): Json<ServiceRegistration>,
) -> ApiResult<(StatusCode, Json<ServiceHealth>)> {
    if reg.service_name.trim().is_empty() {
        return Err(GantryError::Validation("service_name must not be empty".into()).into());
    }
    if !reg.base_url.starts_with("http://") && !reg.base_url.starts_with("https://") {
        return Err(GantryError::Validation(format!(
            "base_url must be http(s): {}",
            reg.base_url
        ))
        .into());
    }

    let base_url = reg.base_url.trim_end_matches('/');
    if !state.health.register(&reg.service_name, base_url) {
        return Err(GantryError::Conflict(format!(
            "service '{}' is already registered",
            reg.service_name
        ))
        .into());
    }
    state.persist();

    let record = state
        .health
        .get(&reg.service_name)
        .ok_or_else(|| GantryError::Internal("registration vanished".into()))?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /services/{name} — health record plus the breaker's view.
pub async fn get_service(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let mut record = state
        .health
        .get(&name)
        .ok_or_else(|| GantryError::NotFound(format!("service '{name}' not found")))?;
    record.circuit_open = state.breaker.is_open(&name);
    let circuit = state.breaker.snapshot(&name);
    Ok(Json(json!({ "health": record, "circuit": circuit })))
}

/// POST /services/{name}/reset — force the breaker closed and zero the
/// health counters.
pub async fn reset_service(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ServiceHealth>> {
    let record = state
        .health
        .reset(&name)
        .ok_or_else(|| GantryError::NotFound(format!("service '{name}' not found")))?;
    state.breaker.reset(&name);
    state.persist();
    Ok(Json(record))
}

/// GET /health — aggregated service health.
pub async fn aggregated_health(State(state): State<Arc<AdminState>>) -> Json<AggregatedHealth> {
    Json(state.health.aggregated(&state.breaker))
}
