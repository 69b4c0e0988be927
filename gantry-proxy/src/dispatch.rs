use crate::auth::Identity;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Response};
use bytes::Bytes;
use gantry_core::route::Route;
use gantry_core::GantryError;
use rand::Rng;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Exponential backoff base and cap for retry attempts.
const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_CAP_MS: u64 = 2_000;

/// Per-request context the dispatcher needs for header shaping.
pub struct ForwardContext {
    pub request_id: Uuid,
    pub identity: Option<Identity>,
    /// Socket peer — always appended to X-Forwarded-For.
    pub peer_ip: IpAddr,
    /// Peer is inside the trusted proxy list; its inbound XFF is kept.
    pub trusted_peer: bool,
    pub inbound_xff: Option<String>,
}

/// Speaks HTTP to upstreams: URL composition, header hygiene, per-attempt
/// timeouts, bounded retries, streamed response relay.
pub struct Dispatcher {
    client: reqwest::Client,
    default_timeout_ms: u64,
    default_retry_count: u32,
}

impl Dispatcher {
    pub fn new(default_timeout_ms: u64, default_retry_count: u32) -> Result<Self, GantryError> {
        // No client-wide timeout: each attempt gets the route's own budget.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GantryError::Config(e.to_string()))?;
        Ok(Self { client, default_timeout_ms, default_retry_count })
    }

    /// Forward a request to the route's upstream and stream the response
    /// back. The returned response may carry any status, including 5xx —
    /// upstream statuses pass through; only transport failures become errors.
    pub async fn dispatch(
        &self,
        route: &Route,
        method: Method,
        path_and_query: &str,
        inbound_headers: &HeaderMap,
        body: Bytes,
        ctx: &ForwardContext,
    ) -> Result<Response<Body>, GantryError> {
        let url = format!("{}{}", route.target_base_url, path_and_query);
        let headers = shape_headers(inbound_headers, ctx);
        let timeout =
            Duration::from_millis(route.timeout_ms.unwrap_or(self.default_timeout_ms));
        let attempts = route.retry_count.unwrap_or(self.default_retry_count) + 1;
        // A retried POST/PATCH could be applied twice; only a connect failure
        // proves the upstream never saw the request.
        let idempotent = !matches!(method.as_str(), "POST" | "PATCH");

        let service = route.target_service.as_str();
        let mut last_err = GantryError::UpstreamConnect(service.to_string());

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let result = self
                .client
                .request(method.clone(), &url)
                .headers(headers.clone())
                .body(body.clone())
                .timeout(timeout)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    debug!(service, attempt, status = resp.status().as_u16(), "upstream responded");
                    return relay_response(resp);
                }
                Err(e) => {
                    let retryable = if e.is_timeout() {
                        last_err = GantryError::UpstreamTimeout(service.to_string());
                        idempotent
                    } else if e.is_connect() {
                        // Refused before any byte was sent — safe for any method.
                        last_err = GantryError::UpstreamConnect(service.to_string());
                        true
                    } else {
                        last_err = GantryError::UpstreamConnect(service.to_string());
                        idempotent
                    };
                    warn!(service, attempt, error = %e, retryable, "upstream attempt failed");
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_err)
    }
}

/// Full-jitter exponential backoff: up to base·2^(attempt−1), capped.
fn backoff_delay(attempt: u32) -> Duration {
    let cap = (BACKOFF_BASE_MS << (attempt - 1).min(10)).min(BACKOFF_CAP_MS);
    Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
}

/// Convert the upstream response, dropping hop-by-hop headers and streaming
/// the body through without buffering.
fn relay_response(resp: reqwest::Response) -> Result<Response<Body>, GantryError> {
    let mut builder = Response::builder().status(resp.status());
    for (name, value) in resp.headers() {
        if !is_hop_by_hop(name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from_stream(resp.bytes_stream()))
        .map_err(|e| GantryError::Internal(e.to_string()))
}

/// Clone inbound headers for the upstream: hop-by-hop and gateway-reserved
/// names are dropped, identity and forwarding headers injected.
pub fn shape_headers(inbound: &HeaderMap, ctx: &ForwardContext) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len() + 4);

    for (name, value) in inbound {
        let n = name.as_str();
        if is_hop_by_hop(n)
            || n.starts_with("x-gateway-")
            || n == "host"
            || n == "content-length"
            || n == "x-forwarded-for"
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    insert_str(&mut out, "x-gateway-request-id", &ctx.request_id.to_string());

    if let Some(identity) = &ctx.identity {
        insert_str(&mut out, "x-gateway-user-id", &identity.user_id);
        if let Some(email) = &identity.email {
            insert_str(&mut out, "x-gateway-user-email", email);
        }
        if !identity.roles.is_empty() {
            insert_str(&mut out, "x-gateway-user-roles", &identity.roles.join(","));
        }
    }

    let xff = match (&ctx.inbound_xff, ctx.trusted_peer) {
        (Some(prior), true) => format!("{prior}, {}", ctx.peer_ip),
        _ => ctx.peer_ip.to_string(),
    };
    insert_str(&mut out, "x-forwarded-for", &xff);

    out
}

fn insert_str(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), v);
    }
}

/// Hop-by-hop headers never cross the gateway in either direction.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection" | "keep-alive" | "te" | "trailer" | "transfer-encoding" | "upgrade"
    ) || name.starts_with("proxy-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use http_body_util::BodyExt;

    fn route(base_url: &str, timeout_ms: Option<u64>, retry_count: Option<u32>) -> Route {
        Route {
            id: Uuid::new_v4(),
            pattern: "/api/*".into(),
            methods: vec!["*".into()],
            target_service: "upstream".into(),
            target_base_url: base_url.trim_end_matches('/').to_string(),
            auth_required: false,
            priority: 0,
            timeout_ms,
            retry_count,
            circuit_breaker_enabled: true,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ctx() -> ForwardContext {
        ForwardContext {
            request_id: Uuid::new_v4(),
            identity: None,
            peer_ip: "10.0.0.9".parse().unwrap(),
            trusted_peer: false,
            inbound_xff: None,
        }
    }

    async fn spawn_upstream() -> std::net::SocketAddr {
        use axum::routing::{any, get};
        use axum::Router;

        let app = Router::new()
            .route("/api/echo", any(|req: axum::http::Request<Body>| async move {
                let xff = req
                    .headers()
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                ([("x-upstream-saw-xff", xff)], "echoed")
            }))
            .route("/api/broken", get(|| async {
                (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom")
            }))
            .route("/api/slow", any(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "late"
            }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_dispatch_relays_status_headers_and_body() {
        let addr = spawn_upstream().await;
        let dispatcher = Dispatcher::new(5_000, 0).unwrap();
        let route = route(&format!("http://{addr}"), None, None);

        let resp = dispatcher
            .dispatch(&route, Method::GET, "/api/echo", &HeaderMap::new(), Bytes::new(), &ctx())
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("x-upstream-saw-xff").unwrap().to_str().unwrap(),
            "10.0.0.9"
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"echoed");
    }

    #[tokio::test]
    async fn test_upstream_5xx_passes_through() {
        let addr = spawn_upstream().await;
        let dispatcher = Dispatcher::new(5_000, 0).unwrap();
        let route = route(&format!("http://{addr}"), None, None);

        let resp = dispatcher
            .dispatch(&route, Method::GET, "/api/broken", &HeaderMap::new(), Bytes::new(), &ctx())
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
    }

    #[tokio::test]
    async fn test_connect_error_maps_to_bad_gateway() {
        // Discard port — nothing listens there.
        let dispatcher = Dispatcher::new(5_000, 0).unwrap();
        let route = route("http://127.0.0.1:9", Some(500), Some(0));

        let err = dispatcher
            .dispatch(&route, Method::GET, "/api/x", &HeaderMap::new(), Bytes::new(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, GantryError::UpstreamConnect(_)));
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_gateway_timeout() {
        let addr = spawn_upstream().await;
        let dispatcher = Dispatcher::new(5_000, 0).unwrap();
        let route = route(&format!("http://{addr}"), Some(50), Some(0));

        let err = dispatcher
            .dispatch(&route, Method::GET, "/api/slow", &HeaderMap::new(), Bytes::new(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, GantryError::UpstreamTimeout(_)));
        assert_eq!(err.status_code(), 504);
    }

    #[tokio::test]
    async fn test_timeout_on_post_is_not_retried() {
        let addr = spawn_upstream().await;
        let dispatcher = Dispatcher::new(5_000, 0).unwrap();
        // Three would-be retries; a POST timeout must fail on the first.
        let route = route(&format!("http://{addr}"), Some(100), Some(3));

        let start = std::time::Instant::now();
        let err = dispatcher
            .dispatch(&route, Method::POST, "/api/slow", &HeaderMap::new(), Bytes::new(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, GantryError::UpstreamTimeout(_)));
        assert!(
            start.elapsed() < Duration::from_millis(2_000),
            "POST timeout must not burn retry attempts"
        );
    }

    #[test]
    fn test_shape_headers_strips_and_injects() {
        let mut inbound = HeaderMap::new();
        inbound.insert("connection", HeaderValue::from_static("keep-alive"));
        inbound.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        inbound.insert("proxy-authorization", HeaderValue::from_static("Basic x"));
        inbound.insert("x-gateway-user-id", HeaderValue::from_static("spoofed"));
        inbound.insert("accept", HeaderValue::from_static("application/json"));
        inbound.insert("host", HeaderValue::from_static("gateway.local"));

        let mut fwd = ctx();
        fwd.identity = Some(Identity {
            user_id: "u-42".into(),
            email: Some("u42@example.org".into()),
            roles: vec!["editor".into(), "admin".into()],
        });
        let out = shape_headers(&inbound, &fwd);

        assert!(out.get("connection").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert!(out.get("proxy-authorization").is_none());
        assert!(out.get("host").is_none());
        assert_eq!(out.get("accept").unwrap(), "application/json");
        // The spoofed inbound value is gone; ours is in place.
        assert_eq!(out.get("x-gateway-user-id").unwrap(), "u-42");
        assert_eq!(out.get("x-gateway-user-email").unwrap(), "u42@example.org");
        assert_eq!(out.get("x-gateway-user-roles").unwrap(), "editor,admin");
        assert!(out.get("x-gateway-request-id").is_some());
    }

    #[test]
    fn test_xff_appends_only_for_trusted_peers() {
        let mut inbound = HeaderMap::new();
        inbound.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));

        let mut fwd = ctx();
        fwd.inbound_xff = Some("203.0.113.7".into());
        fwd.trusted_peer = true;
        let out = shape_headers(&inbound, &fwd);
        assert_eq!(out.get("x-forwarded-for").unwrap(), "203.0.113.7, 10.0.0.9");

        let mut fwd = ctx();
        fwd.inbound_xff = Some("203.0.113.7".into());
        fwd.trusted_peer = false;
        let out = shape_headers(&inbound, &fwd);
        assert_eq!(out.get("x-forwarded-for").unwrap(), "10.0.0.9");
    }

    #[test]
    fn test_backoff_is_bounded() {
        for attempt in 1..8 {
            let d = backoff_delay(attempt);
            assert!(d <= Duration::from_millis(BACKOFF_CAP_MS));
        }
    }

    #[test]
    fn test_hop_by_hop_set() {
        assert!(is_hop_by_hop("connection"));
        assert!(is_hop_by_hop("upgrade"));
        assert!(is_hop_by_hop("proxy-connection"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("authorization"));
    }
}
