use crate::server::AdminState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;
use gantry_core::GantryError;
use std::sync::Arc;
use uuid::Uuid;

/// Management-surface gate: only authenticated identities carrying the admin
/// role get through. Unauthenticated → 401/503 per the verifier; anyone else
/// without the role → 403.
pub async fn admin_auth(
    State(state): State<Arc<AdminState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.verifier.verify(header_value).await {
        Ok(identity) if identity.is_admin() => next.run(request).await,
        Ok(_) => gantry_proxy::pipeline::error_response(
            &GantryError::Forbidden,
            Uuid::new_v4(),
            None,
        ),
        Err(e) => gantry_proxy::pipeline::error_response(&e, Uuid::new_v4(), None),
    }
}
