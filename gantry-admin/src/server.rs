use crate::handlers;
use crate::middleware::admin_auth;
use arc_swap::ArcSwap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router as AxumRouter;
use gantry_core::router::Router;
use gantry_core::GantryError;
use gantry_observability::{LogStore, MetricsCollector};
use gantry_proxy::{CircuitBreaker, HealthRegistry, RateLimiter, TokenVerifier};
use gantry_store::cache::ConfigCache;
use gantry_store::{FileStore, PersistedState, SCHEMA_VERSION};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Shared state for the management API.
pub struct AdminState {
    pub cache: ConfigCache,
    pub router: Arc<ArcSwap<Router>>,
    pub limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub health: Arc<HealthRegistry>,
    pub logs: Arc<LogStore>,
    pub metrics: Arc<MetricsCollector>,
    pub verifier: Arc<TokenVerifier>,
    /// `None` in unit tests; mutations then skip persistence.
    pub store: Option<Arc<FileStore>>,
}

impl AdminState {
    /// Rebuild the frozen router from the cache and swap it in. Patterns are
    /// validated before they reach the cache, so a build failure here is a
    /// bug worth shouting about rather than surfacing to the caller.
    pub fn rebuild_router(&self) {
        let version = self.router.load().version() + 1;
        match Router::build(self.cache.all_routes(), version) {
            Ok(router) => self.router.store(Arc::new(router)),
            Err(e) => error!(error = %e, "failed to rebuild router after mutation"),
        }
    }

    /// Rebuild the limiter's active rule set from the cache.
    pub fn rebuild_rules(&self) {
        if let Err(e) = self.limiter.swap_rules(self.cache.all_rules()) {
            error!(error = %e, "failed to rebuild rate-limit rules after mutation");
        }
    }

    /// Write the current control-plane state to the backing store.
    pub fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        store.save(&PersistedState {
            schema_version: SCHEMA_VERSION,
            routes: self.cache.all_routes(),
            rate_limit_rules: self.cache.all_rules(),
            services: self.health.all(),
        });
    }
}

/// Handler error wrapper: any `GantryError` renders as the uniform JSON
/// error body with a fresh request id.
pub struct ApiError(pub GantryError);

impl From<GantryError> for ApiError {
    fn from(e: GantryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        gantry_proxy::pipeline::error_response(&self.0, Uuid::new_v4(), None)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Build the management router mounted under the reserved prefix.
/// Every endpoint requires an admin-scope identity.
pub fn build_admin_router(state: Arc<AdminState>) -> AxumRouter {
    AxumRouter::new()
        .route(
            "/routes",
            get(handlers::routes::list_routes).post(handlers::routes::create_route),
        )
        .route(
            "/routes/{id}",
            get(handlers::routes::get_route)
                .put(handlers::routes::update_route)
                .delete(handlers::routes::delete_route),
        )
        .route(
            "/rate-limits",
            get(handlers::rate_limits::list_rules).post(handlers::rate_limits::create_rule),
        )
        .route(
            "/rate-limits/{id}",
            get(handlers::rate_limits::get_rule)
                .put(handlers::rate_limits::update_rule)
                .delete(handlers::rate_limits::delete_rule),
        )
        .route(
            "/services",
            get(handlers::services::list_services).post(handlers::services::register_service),
        )
        .route("/services/{name}", get(handlers::services::get_service))
        .route(
            "/services/{name}/reset",
            axum::routing::post(handlers::services::reset_service),
        )
        .route("/logs", get(handlers::logs::query_logs))
        .route("/logs/errors", get(handlers::logs::error_logs))
        .route("/metrics", get(handlers::metrics::stats))
        .route("/metrics/prometheus", get(handlers::metrics::prometheus))
        .route("/health", get(handlers::services::aggregated_health))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), admin_auth))
        .with_state(state)
}
