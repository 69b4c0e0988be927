use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Unified error type for Gantry.
///
/// Every stage of the pipeline and the management API returns one of these;
/// each variant maps to exactly one HTTP status and one stable error code, so
/// no failure kind is conflated with another across component boundaries.
#[derive(Error, Debug)]
pub enum GantryError {
    #[error("No route configured for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("Method not allowed; allowed: {}", allowed.join(", "))]
    MethodNotAllowed { allowed: Vec<String> },

    #[error("Missing authorization header")]
    AuthMissing,

    #[error("Malformed bearer credential")]
    AuthMalformed,

    #[error("Token expired")]
    AuthExpired,

    #[error("Invalid token signature")]
    AuthInvalidSignature,

    #[error("Token revoked")]
    AuthRevoked,

    #[error("Identity service unavailable")]
    AuthUnavailable,

    #[error("Admin scope required")]
    Forbidden,

    #[error("Rate limit exceeded by rule '{rule}'")]
    RateLimited { rule: String },

    #[error("Service '{0}' unavailable (circuit open)")]
    CircuitOpen(String),

    #[error("Upstream '{0}' timed out")]
    UpstreamTimeout(String),

    #[error("Failed to connect to upstream '{0}'")]
    UpstreamConnect(String),

    #[error("Client closed the connection")]
    ClientClosed,

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl GantryError {
    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        use GantryError::*;
        match self {
            RouteNotFound { .. } | NotFound(_) => 404,
            MethodNotAllowed { .. } => 405,
            AuthMissing | AuthMalformed | AuthExpired | AuthInvalidSignature | AuthRevoked => 401,
            AuthUnavailable | CircuitOpen(_) => 503,
            Forbidden => 403,
            RateLimited { .. } => 429,
            UpstreamTimeout(_) => 504,
            UpstreamConnect(_) => 502,
            ClientClosed => 499,
            InvalidPattern(_) | Validation(_) => 400,
            Conflict(_) => 409,
            _ => 500,
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        use GantryError::*;
        match self {
            RouteNotFound { .. } => "route_not_found",
            MethodNotAllowed { .. } => "method_not_allowed",
            AuthMissing => "auth_missing",
            AuthMalformed => "auth_malformed",
            AuthExpired => "token_expired",
            AuthInvalidSignature => "invalid_signature",
            AuthRevoked => "token_revoked",
            AuthUnavailable => "identity_service_unavailable",
            Forbidden => "forbidden",
            RateLimited { .. } => "rate_limit_exceeded",
            CircuitOpen(_) => "circuit_open",
            UpstreamTimeout(_) => "gateway_timeout",
            UpstreamConnect(_) => "bad_gateway",
            ClientClosed => "client_closed",
            InvalidPattern(_) => "invalid_pattern",
            Validation(_) => "validation_failed",
            Conflict(_) => "conflict",
            NotFound(_) => "not_found",
            Config(_) => "config_error",
            Store(_) => "store_error",
            _ => "internal_error",
        }
    }

    /// Short form recorded in the request log's `error_message` column.
    pub fn log_message(&self) -> String {
        match self {
            GantryError::RateLimited { rule } => format!("rate_limited:{rule}"),
            GantryError::CircuitOpen(_) => "circuit_open".to_string(),
            GantryError::ClientClosed => "client_closed".to_string(),
            other => other.to_string(),
        }
    }

    /// Uniform JSON error body. Internal detail never leaks: 5xx bodies carry
    /// the code and an opaque message only.
    pub fn to_body(&self, request_id: Uuid) -> serde_json::Value {
        let message = if self.status_code() >= 500 && !self.is_gateway_surface() {
            "internal gateway error".to_string()
        } else {
            self.to_string()
        };
        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": message,
                "request_id": request_id,
            }
        });
        if let GantryError::MethodNotAllowed { allowed } = self {
            body["error"]["details"] = json!({ "allowed_methods": allowed });
        }
        body
    }

    /// 5xx kinds that are part of the gateway's contract (timeouts, breaker,
    /// connect failures) keep their message; everything else is opaque.
    fn is_gateway_surface(&self) -> bool {
        matches!(
            self,
            GantryError::UpstreamTimeout(_)
                | GantryError::UpstreamConnect(_)
                | GantryError::CircuitOpen(_)
                | GantryError::AuthUnavailable
        )
    }
}
