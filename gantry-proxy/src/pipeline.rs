use crate::auth::TokenVerifier;
use crate::breaker::CircuitBreaker;
use crate::dispatch::{Dispatcher, ForwardContext};
use crate::health::HealthRegistry;
use crate::limiter::{RateLimiter, Verdict};
use arc_swap::ArcSwap;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderName, HeaderValue, Request, Response, StatusCode};
use chrono::Utc;
use gantry_core::log::RequestLog;
use gantry_core::router::{ResolveError, Router};
use gantry_core::{GantryConfig, GantryError};
use gantry_observability::{LogSink, MetricsCollector};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::error;
use uuid::Uuid;

/// Reserved control-plane prefix; anything under it is never proxied.
pub const MANAGEMENT_PREFIX: &str = "/api/v1/gateway";

/// Request bodies are buffered so an attempt can be replayed on retry.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Extra admission-deadline headroom on top of the per-attempt budgets.
const DEADLINE_SLACK: Duration = Duration::from_secs(1);

/// Shared state of the data plane — the pipeline's collaborators.
pub struct Gateway {
    pub config: Arc<GantryConfig>,
    pub router: Arc<ArcSwap<Router>>,
    pub verifier: Arc<TokenVerifier>,
    pub limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub health: Arc<HealthRegistry>,
    pub dispatcher: Dispatcher,
    pub sink: LogSink,
    pub metrics: Arc<MetricsCollector>,
}

/// The per-request pipeline, mounted as the listener's fallback handler:
/// resolve → auth → rate limit → breaker → dispatch → relay, with exactly
/// one log record per request on every exit path.
pub async fn handle(
    State(gw): State<Arc<Gateway>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response<Body> {
    let request_id = Uuid::new_v4();
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let peer_ip = peer.ip();
    let trusted_peer =
        gw.config.proxy.trusted_proxy_cidrs.iter().any(|net| net.contains(&peer_ip));
    let inbound_xff = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client_ip = client_ip_from(peer_ip, trusted_peer, inbound_xff.as_deref());

    let mut guard = LogGuard::new(
        Arc::clone(&gw),
        request_id,
        method.to_string(),
        path.clone(),
        client_ip.to_string(),
        start,
    );

    // The management surface is routed before this fallback; a stray path
    // under the reserved prefix must 404 rather than be proxied.
    if path.starts_with(MANAGEMENT_PREFIX) {
        let err = GantryError::NotFound(format!("no management endpoint at {path}"));
        return guard.error_response(&err, None);
    }

    // Step 1: route resolution.
    let route = {
        let router = gw.router.load();
        match router.resolve(method.as_str(), &path) {
            Ok(resolved) => resolved.route.clone(),
            Err(ResolveError::NotFound) => {
                let err = GantryError::RouteNotFound {
                    method: method.to_string(),
                    path: path.clone(),
                };
                return guard.error_response(&err, None);
            }
            Err(ResolveError::MethodNotAllowed { allowed }) => {
                return guard.error_response(&GantryError::MethodNotAllowed { allowed }, None);
            }
        }
    };
    guard.set_route(route.id, &route.target_service);

    // Step 2: authentication gate.
    let mut identity = None;
    if route.auth_required {
        let header_value =
            req.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
        match gw.verifier.verify(header_value).await {
            Ok(id) => {
                guard.set_user(&id.user_id);
                identity = Some(id);
            }
            Err(e) => return guard.error_response(&e, None),
        }
    }

    // Step 3: rate-limit gate.
    let now = SystemTime::now();
    let verdict = gw.limiter.evaluate(
        &path,
        Some(route.id),
        identity.as_ref().map(|i| i.user_id.as_str()),
        &client_ip.to_string(),
        now,
    );
    if let Some(v) = &verdict {
        if !v.allowed {
            gw.metrics.rate_limited_total.inc();
            let err = GantryError::RateLimited { rule: v.rule_name.clone() };
            return guard.error_response(&err, verdict.as_ref());
        }
    }

    // The upstream becomes a known service on first dispatch.
    gw.health.observe(&route.target_service, &route.target_base_url);

    // Buffer the body before taking a breaker slot so a client that cannot
    // produce one never consumes a half-open probe.
    let headers = req.headers().clone();
    let body = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => {
            let err = GantryError::Validation("failed to read request body".into());
            return guard.error_response(&err, verdict.as_ref());
        }
    };

    // Step 4: circuit-breaker gate.
    let breaker_gated = route.circuit_breaker_enabled;
    if breaker_gated && !gw.breaker.allow(&route.target_service) {
        gw.metrics.breaker_rejections_total.inc();
        let err = GantryError::CircuitOpen(route.target_service.clone());
        return guard.error_response(&err, verdict.as_ref());
    }

    // Step 5: dispatch under the admission deadline.
    let timeout_ms = route.timeout_ms.unwrap_or(gw.config.proxy.gateway_timeout_ms);
    let attempts = route.retry_count.unwrap_or(gw.config.proxy.gateway_retry_count) as u64 + 1;
    let deadline = Duration::from_millis(timeout_ms.saturating_mul(attempts)) + DEADLINE_SLACK;

    let fctx = ForwardContext {
        request_id,
        identity,
        peer_ip,
        trusted_peer,
        inbound_xff,
    };

    if breaker_gated {
        guard.mark_dispatching(&route.target_service);
    }
    let upstream_start = Instant::now();
    let outcome = match tokio::time::timeout(
        deadline,
        gw.dispatcher.dispatch(&route, method.clone(), &path_and_query, &headers, body, &fctx),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(GantryError::UpstreamTimeout(route.target_service.clone())),
    };
    guard.clear_dispatching();
    gw.metrics
        .record_upstream_latency(&route.target_service, upstream_start.elapsed().as_secs_f64());

    // Step 6: report the outcome and relay.
    match outcome {
        Ok(mut resp) => {
            let status = resp.status().as_u16();
            if breaker_gated {
                if status >= 500 {
                    gw.breaker.record_failure(&route.target_service);
                } else {
                    gw.breaker.record_success(&route.target_service);
                }
            }
            gw.metrics.record_request(
                &route.target_service,
                method.as_str(),
                status,
                start.elapsed().as_secs_f64(),
            );
            stamp_request_id(resp.headers_mut(), request_id);
            if let Some(v) = &verdict {
                stamp_rate_limit_headers(resp.headers_mut(), v);
            }
            guard.finish(Some(status), None);
            resp
        }
        Err(e) => {
            let is_upstream_failure = matches!(
                e,
                GantryError::UpstreamTimeout(_) | GantryError::UpstreamConnect(_)
            );
            if breaker_gated {
                if is_upstream_failure {
                    gw.breaker.record_failure(&route.target_service);
                } else {
                    // Not the upstream's fault — free any half-open probe slot
                    // without counting an outcome.
                    gw.breaker.abandon_probe(&route.target_service);
                }
            }
            guard.error_response(&e, verdict.as_ref())
        }
    }
}

/// Trusted peers may name the real client via X-Forwarded-For; for anyone
/// else the socket peer is the sole client address.
fn client_ip_from(peer_ip: IpAddr, trusted: bool, inbound_xff: Option<&str>) -> IpAddr {
    if !trusted {
        return peer_ip;
    }
    inbound_xff
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|s| s.parse::<IpAddr>().ok())
        .unwrap_or(peer_ip)
}

fn stamp_request_id(headers: &mut axum::http::HeaderMap, request_id: Uuid) {
    if let Ok(v) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert(HeaderName::from_static("x-gateway-request-id"), v);
    }
}

fn stamp_rate_limit_headers(headers: &mut axum::http::HeaderMap, verdict: &Verdict) {
    let pairs = [
        ("x-ratelimit-limit", verdict.limit.to_string()),
        ("x-ratelimit-remaining", verdict.remaining.to_string()),
        ("x-ratelimit-reset", verdict.reset_at.to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), v);
        }
    }
}

/// Build the uniform error response for a pipeline failure.
pub fn error_response(
    err: &GantryError,
    request_id: Uuid,
    verdict: Option<&Verdict>,
) -> Response<Body> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = err.to_body(request_id).to_string();

    let mut resp = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to build error response");
            Response::new(Body::empty())
        });

    stamp_request_id(resp.headers_mut(), request_id);

    if let GantryError::MethodNotAllowed { allowed } = err {
        if let Ok(v) = HeaderValue::from_str(&allowed.join(", ")) {
            resp.headers_mut().insert(header::ALLOW, v);
        }
    }

    if let Some(v) = verdict {
        stamp_rate_limit_headers(resp.headers_mut(), v);
        if !v.allowed {
            let retry_after = v.retry_after(SystemTime::now());
            if let Ok(hv) = HeaderValue::from_str(&retry_after.to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, hv);
            }
        }
    }

    resp
}

/// Owns the request's log record and in-flight accounting.
///
/// Every exit path calls `finish` or `error_response`; if the task is dropped
/// instead (client disconnect cancels it at the next await), the Drop impl
/// records the request as 499 and releases any held breaker probe slot, so a
/// cancellation counts as neither success nor failure.
struct LogGuard {
    gw: Arc<Gateway>,
    request_id: Uuid,
    method: String,
    path: String,
    client_ip: String,
    start: Instant,
    route_id: Option<Uuid>,
    target_service: Option<String>,
    user_id: Option<String>,
    dispatching_service: Option<String>,
    finished: bool,
}

impl LogGuard {
    fn new(
        gw: Arc<Gateway>,
        request_id: Uuid,
        method: String,
        path: String,
        client_ip: String,
        start: Instant,
    ) -> Self {
        gw.metrics.active_requests.inc();
        Self {
            gw,
            request_id,
            method,
            path,
            client_ip,
            start,
            route_id: None,
            target_service: None,
            user_id: None,
            dispatching_service: None,
            finished: false,
        }
    }

    fn set_route(&mut self, route_id: Uuid, service: &str) {
        self.route_id = Some(route_id);
        self.target_service = Some(service.to_string());
    }

    fn set_user(&mut self, user_id: &str) {
        self.user_id = Some(user_id.to_string());
    }

    fn mark_dispatching(&mut self, service: &str) {
        self.dispatching_service = Some(service.to_string());
    }

    fn clear_dispatching(&mut self) {
        self.dispatching_service = None;
    }

    /// Emit the log record exactly once.
    fn finish(&mut self, status_code: Option<u16>, error_message: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.gw.metrics.active_requests.dec();
        self.gw.sink.record(RequestLog {
            request_id: self.request_id,
            method: self.method.clone(),
            path: self.path.clone(),
            matched_route_id: self.route_id,
            target_service: self.target_service.clone(),
            user_id: self.user_id.clone(),
            client_ip: self.client_ip.clone(),
            status_code,
            response_time_ms: self.start.elapsed().as_secs_f64() * 1000.0,
            error_message,
            created_at: Utc::now(),
        });
    }

    /// Finalize with an error outcome and produce the client response.
    fn error_response(
        &mut self,
        err: &GantryError,
        verdict: Option<&Verdict>,
    ) -> Response<Body> {
        let status = err.status_code();
        let service = self.target_service.as_deref().unwrap_or("none").to_string();
        self.gw.metrics.record_request(
            &service,
            &self.method,
            status,
            self.start.elapsed().as_secs_f64(),
        );
        self.finish(Some(status), Some(err.log_message()));
        error_response(err, self.request_id, verdict)
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(service) = self.dispatching_service.take() {
            self.gw.breaker.abandon_probe(&service);
        }
        self.finish(Some(499), Some("client_closed".into()));
    }
}
