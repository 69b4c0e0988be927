use crate::error::GantryError;
use crate::pattern::Pattern;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Route record — binds a path pattern to an upstream and its policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,

    /// Path glob (e.g. "/api/v1/auth/*"). Unique across active routes.
    pub pattern: String,

    /// Uppercase method tokens, or ["*"] for any method.
    pub methods: Vec<String>,

    /// Logical service name — joins to the health registry and breaker.
    pub target_service: String,

    /// scheme://host[:port], no trailing slash.
    pub target_base_url: String,

    #[serde(default = "default_true")]
    pub auth_required: bool,

    /// Higher wins on ambiguous match.
    #[serde(default)]
    pub priority: i32,

    /// Per-attempt dispatch timeout; gateway default when absent.
    pub timeout_ms: Option<u64>,

    /// Retry attempts after the first; gateway default when absent.
    pub retry_count: Option<u32>,

    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,

    #[serde(default = "default_true")]
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Route {
    /// Check if a given HTTP method is allowed.
    pub fn allows_method(&self, method: &str) -> bool {
        self.methods
            .iter()
            .any(|m| m == "*" || m.eq_ignore_ascii_case(method))
    }
}

/// Create payload. Server assigns id and timestamps.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteDraft {
    pub pattern: String,
    pub methods: Vec<String>,
    pub target_service: String,
    pub target_base_url: String,
    #[serde(default = "default_true")]
    pub auth_required: bool,
    #[serde(default)]
    pub priority: i32,
    pub timeout_ms: Option<u64>,
    pub retry_count: Option<u32>,
    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl RouteDraft {
    /// Validate and normalize into a full record.
    pub fn into_route(self, id: Uuid, now: DateTime<Utc>) -> Result<Route, GantryError> {
        Pattern::compile(&self.pattern)?;
        let methods = normalize_methods(&self.methods)?;
        if self.target_service.trim().is_empty() {
            return Err(GantryError::Validation("target_service must not be empty".into()));
        }
        let target_base_url = normalize_base_url(&self.target_base_url)?;
        Ok(Route {
            id,
            pattern: self.pattern,
            methods,
            target_service: self.target_service,
            target_base_url,
            auth_required: self.auth_required,
            priority: self.priority,
            timeout_ms: self.timeout_ms,
            retry_count: self.retry_count,
            circuit_breaker_enabled: self.circuit_breaker_enabled,
            active: self.active,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutePatch {
    pub pattern: Option<String>,
    pub methods: Option<Vec<String>>,
    pub target_service: Option<String>,
    pub target_base_url: Option<String>,
    pub auth_required: Option<bool>,
    pub priority: Option<i32>,
    pub timeout_ms: Option<Option<u64>>,
    pub retry_count: Option<Option<u32>>,
    pub circuit_breaker_enabled: Option<bool>,
    pub active: Option<bool>,
}

impl RoutePatch {
    /// Apply onto an existing record, revalidating changed fields and bumping
    /// `updated_at`.
    pub fn apply(self, route: &mut Route, now: DateTime<Utc>) -> Result<(), GantryError> {
        if let Some(pattern) = self.pattern {
            Pattern::compile(&pattern)?;
            route.pattern = pattern;
        }
        if let Some(methods) = self.methods {
            route.methods = normalize_methods(&methods)?;
        }
        if let Some(service) = self.target_service {
            if service.trim().is_empty() {
                return Err(GantryError::Validation("target_service must not be empty".into()));
            }
            route.target_service = service;
        }
        if let Some(url) = self.target_base_url {
            route.target_base_url = normalize_base_url(&url)?;
        }
        if let Some(v) = self.auth_required {
            route.auth_required = v;
        }
        if let Some(v) = self.priority {
            route.priority = v;
        }
        if let Some(v) = self.timeout_ms {
            route.timeout_ms = v;
        }
        if let Some(v) = self.retry_count {
            route.retry_count = v;
        }
        if let Some(v) = self.circuit_breaker_enabled {
            route.circuit_breaker_enabled = v;
        }
        if let Some(v) = self.active {
            route.active = v;
        }
        route.updated_at = now;
        Ok(())
    }
}

fn normalize_methods(methods: &[String]) -> Result<Vec<String>, GantryError> {
    if methods.is_empty() {
        return Err(GantryError::Validation("methods must not be empty".into()));
    }
    let mut out = Vec::with_capacity(methods.len());
    for m in methods {
        if m == "*" {
            return Ok(vec!["*".to_string()]);
        }
        if m.is_empty() || !m.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(GantryError::Validation(format!("invalid method token: {m:?}")));
        }
        let upper = m.to_ascii_uppercase();
        if !out.contains(&upper) {
            out.push(upper);
        }
    }
    Ok(out)
}

fn normalize_base_url(url: &str) -> Result<String, GantryError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(GantryError::Validation(format!(
            "target_base_url must be http(s): {url}"
        )));
    }
    Ok(url.trim_end_matches('/').to_string())
}
