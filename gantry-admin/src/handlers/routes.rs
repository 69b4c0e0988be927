use crate::server::{AdminState, ApiResult};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use gantry_core::route::{Route, RouteDraft, RoutePatch};
use gantry_core::GantryError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub active_only: bool,
}

/// GET /routes
pub async fn list_routes(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<ListQuery>,
) -> Json<Value> {
    let mut routes: Vec<Route> = state
        .cache
        .all_routes()
        .into_iter()
        .filter(|r| !query.active_only || r.active)
        .collect();
    routes.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.pattern.cmp(&b.pattern)));
    Json(json!({ "list": routes, "total": routes.len() }))
}

/// POST /routes
pub async fn create_route(
    State(state): State<Arc<AdminState>>,
    Json(draft): Json<RouteDraft>,
) -> ApiResult<(StatusCode, Json<Route>)> {
    let route = draft.into_route(Uuid::new_v4(), Utc::now())?;
    if route.active && state.cache.pattern_taken(&route.pattern, None) {
        return Err(GantryError::Conflict(format!(
            "an active route already uses pattern '{}'",
            route.pattern
        ))
        .into());
    }

    state.cache.routes.insert(route.id, route.clone());
    state.rebuild_router();
    state.persist();
    Ok((StatusCode::CREATED, Json(route)))
}

/// GET /routes/{id}
pub async fn get_route(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Route>> {
    match state.cache.routes.get(&id) {
        Some(route) => Ok(Json(route.value().clone())),
        None => Err(GantryError::NotFound(format!("route {id} not found")).into()),
    }
}

/// PUT /routes/{id}
pub async fn update_route(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<RoutePatch>,
) -> ApiResult<Json<Route>> {
    let mut route = match state.cache.routes.get(&id) {
        Some(r) => r.value().clone(),
        None => return Err(GantryError::NotFound(format!("route {id} not found")).into()),
    };

    patch.apply(&mut route, Utc::now())?;
    if route.active && state.cache.pattern_taken(&route.pattern, Some(id)) {
        return Err(GantryError::Conflict(format!(
            "an active route already uses pattern '{}'",
            route.pattern
        ))
        .into());
    }

    state.cache.routes.insert(id, route.clone());
    state.rebuild_router();
    state.persist();
    Ok(Json(route))
}

/// DELETE /routes/{id}
pub async fn delete_route(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.cache.routes.remove(&id).is_none() {
        return Err(GantryError::NotFound(format!("route {id} not found")).into());
    }
    state.rebuild_router();
    state.persist();
    Ok(StatusCode::NO_CONTENT)
}
