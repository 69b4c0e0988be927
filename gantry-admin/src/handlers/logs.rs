use crate::server::AdminState;
use axum::extract::{Query, State};
use axum::response::Json;
use gantry_core::log::{LogFilter, RequestLog};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /logs — filtered request-log query, newest first.
pub async fn query_logs(
    State(state): State<Arc<AdminState>>,
    Query(filter): Query<LogFilter>,
) -> Json<Value> {
    let logs: Vec<RequestLog> = state.logs.query(&filter);
    Json(json!({ "list": logs, "total": logs.len() }))
}

#[derive(Debug, Deserialize)]
pub struct ErrorsQuery {
    pub limit: Option<usize>,
}

/// GET /logs/errors — most recent records that carry an error message.
pub async fn error_logs(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<ErrorsQuery>,
) -> Json<Value> {
    let logs = state.logs.errors(query.limit.unwrap_or(100));
    Json(json!({ "list": logs, "total": logs.len() }))
}
