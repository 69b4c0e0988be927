// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Gantry — API gateway for microservice fleets
//
//  One listener serves both planes: the management API under the
//  reserved prefix, every other path through the proxy pipeline.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use anyhow::Context;
use arc_swap::ArcSwap;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::get;
use axum::Json;
use clap::Parser;
use gantry_admin::{build_admin_router, AdminState};
use gantry_core::config::CorsConfig;
use gantry_core::router::Router;
use gantry_core::GantryConfig;
use gantry_observability::{LogSink, LogStore, MetricsCollector};
use gantry_proxy::pipeline::{self, Gateway, MANAGEMENT_PREFIX};
use gantry_proxy::{
    CircuitBreaker, Dispatcher, HealthRegistry, HealthSupervisor, RateLimiter, TokenVerifier,
};
use gantry_store::cache::ConfigCache;
use gantry_store::{FileStore, StoreError};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Entries the in-memory log window can hold for the query endpoints.
const LOG_WINDOW_CAPACITY: usize = 100_000;

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_STORE_UNREACHABLE: u8 = 2;
const EXIT_SCHEMA_MISMATCH: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "gantry", version, about = "Gantry — API gateway for microservice fleets")]
struct Cli {
    /// Path to configuration file (default: gantry.yaml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Gantry starting");

    let config = match GantryConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let store = FileStore::new(&config.store.dsn);
    let restored = match store.load() {
        Ok(state) => state,
        Err(e @ StoreError::SchemaMismatch { .. }) => {
            error!(error = %e, "run the migration tool before starting this build");
            return ExitCode::from(EXIT_SCHEMA_MISMATCH);
        }
        Err(e) => {
            error!(error = %e, "cannot read the backing store");
            return ExitCode::from(EXIT_STORE_UNREACHABLE);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build runtime");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match runtime.block_on(serve(config, store, restored)) {
        Ok(()) => {
            info!("Gantry stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

async fn serve(
    config: GantryConfig,
    store: FileStore,
    restored: Option<gantry_store::PersistedState>,
) -> anyhow::Result<()> {
    let config = Arc::new(config);

    // ── Restore control-plane state ──
    let cache = ConfigCache::new();
    let health = Arc::new(HealthRegistry::new());
    if let Some(state) = restored {
        for route in state.routes {
            cache.routes.insert(route.id, route);
        }
        for rule in state.rate_limit_rules {
            cache.rules.insert(rule.id, rule);
        }
        health.restore(state.services);
    }

    // ── Data-plane components ──
    let router = Arc::new(ArcSwap::new(Arc::new(Router::build(cache.all_routes(), 1)?)));
    let metrics = Arc::new(MetricsCollector::new()?);
    let log_store = Arc::new(LogStore::new(LOG_WINDOW_CAPACITY));
    let (sink, _sink_task) = LogSink::spawn(
        Arc::clone(&log_store),
        config.logging.buffer_size,
        config.logging.sampling_ratio,
        metrics.logs_dropped_total.clone(),
    );
    let verifier = Arc::new(TokenVerifier::new(&config.auth)?);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.enabled));
    limiter.swap_rules(cache.all_rules())?;
    let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));
    let dispatcher =
        Dispatcher::new(config.proxy.gateway_timeout_ms, config.proxy.gateway_retry_count)?;

    let gateway = Arc::new(Gateway {
        config: Arc::clone(&config),
        router: Arc::clone(&router),
        verifier: Arc::clone(&verifier),
        limiter: Arc::clone(&limiter),
        breaker: Arc::clone(&breaker),
        health: Arc::clone(&health),
        dispatcher,
        sink,
        metrics: Arc::clone(&metrics),
    });

    let admin_state = Arc::new(AdminState {
        cache,
        router,
        limiter,
        breaker,
        health: Arc::clone(&health),
        logs: log_store,
        metrics,
        verifier,
        store: Some(Arc::new(store)),
    });

    // ── Background tasks ──
    HealthSupervisor::new(Arc::clone(&health), &config.health_check).spawn();

    // ── Single listener: management nest + probes + proxy fallback ──
    let mut app = axum::Router::new()
        .fallback(pipeline::handle)
        .with_state(gateway)
        .nest(MANAGEMENT_PREFIX, build_admin_router(admin_state))
        .route("/health", get(probe))
        .route("/ready", get(probe))
        .route("/live", get(probe));

    if let Some(cors) = cors_layer(&config.cors) {
        app = app.layer(cors);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %addr, "Gantry is ready — serving traffic");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Liveness/readiness for orchestrators; answered locally, never proxied.
async fn probe() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn cors_layer(cfg: &CorsConfig) -> Option<CorsLayer> {
    if cfg.origins.is_empty() {
        return None;
    }

    let methods: Vec<Method> = cfg.methods.iter().filter_map(|m| m.parse().ok()).collect();
    let headers: Vec<HeaderName> = cfg.headers.iter().filter_map(|h| h.parse().ok()).collect();

    let mut layer = CorsLayer::new().allow_methods(methods).allow_headers(headers);

    if cfg.origins.iter().any(|o| o == "*") {
        // Wildcard origin cannot be combined with credentials.
        layer = layer.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> =
            cfg.origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer = layer.allow_origin(origins).allow_credentials(cfg.allow_credentials);
    }

    Some(layer)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining");
}
