use crate::server::{AdminState, ApiResult};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use gantry_core::rate_limit::{RateLimitRule, RuleDraft, RulePatch};
use gantry_core::GantryError;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// GET /rate-limits
pub async fn list_rules(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let mut rules: Vec<RateLimitRule> = state.cache.all_rules();
    rules.sort_by(|a, b| a.name.cmp(&b.name));
    Json(json!({ "list": rules, "total": rules.len() }))
}

/// POST /rate-limits
pub async fn create_rule(
    State(state): State<Arc<AdminState>>,
    Json(draft): Json<RuleDraft>,
) -> ApiResult<(StatusCode, Json<RateLimitRule>)> {
    let rule = draft.into_rule(Uuid::new_v4(), Utc::now())?;
    if state.cache.rule_name_taken(&rule.name, None) {
        return Err(
            GantryError::Conflict(format!("a rule named '{}' already exists", rule.name)).into()
        );
    }

    state.cache.rules.insert(rule.id, rule.clone());
    state.rebuild_rules();
    state.persist();
    Ok((StatusCode::CREATED, Json(rule)))
}

/// GET /rate-limits/{id}
pub async fn get_rule(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RateLimitRule>> {
    match state.cache.rules.get(&id) {
        Some(rule) => Ok(Json(rule.value().clone())),
        None => Err(GantryError::NotFound(format!("rate-limit rule {id} not found")).into()),
    }
}

/// PUT /rate-limits/{id}
pub async fn update_rule(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<RulePatch>,
) -> ApiResult<Json<RateLimitRule>> {
    let mut rule = match state.cache.rules.get(&id) {
        Some(r) => r.value().clone(),
        None => {
            return Err(GantryError::NotFound(format!("rate-limit rule {id} not found")).into())
        }
    };

    patch.apply(&mut rule, Utc::now())?;
    if state.cache.rule_name_taken(&rule.name, Some(id)) {
        return Err(
            GantryError::Conflict(format!("a rule named '{}' already exists", rule.name)).into()
        );
    }

    state.cache.rules.insert(id, rule.clone());
    state.rebuild_rules();
    state.persist();
    Ok(Json(rule))
}

/// DELETE /rate-limits/{id}
pub async fn delete_rule(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.cache.rules.remove(&id).is_none() {
        return Err(GantryError::NotFound(format!("rate-limit rule {id} not found")).into());
    }
    state.rebuild_rules();
    state.persist();
    Ok(StatusCode::NO_CONTENT)
}
