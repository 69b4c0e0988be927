use crate::error::GantryError;
use crate::pattern::Pattern;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a rule's bucket is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    PerUser,
    PerIp,
    PerEndpoint,
    Global,
}

/// Rate-limit rule. A request is denied iff any active rule whose scope and
/// pattern select it is over budget — rules compose by conjunction of permits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub id: Uuid,

    /// Unique human-readable name; surfaces in logs as `rate_limited:<name>`.
    pub name: String,

    pub scope: LimitScope,

    /// Optional path glob; null means any path.
    pub pattern: Option<String>,

    pub max_requests: u32,
    pub window_seconds: u64,

    #[serde(default = "default_true")]
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    pub scope: LimitScope,
    pub pattern: Option<String>,
    pub max_requests: u32,
    pub window_seconds: u64,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl RuleDraft {
    pub fn into_rule(self, id: Uuid, now: DateTime<Utc>) -> Result<RateLimitRule, GantryError> {
        validate_rule(&self.name, self.pattern.as_deref(), self.max_requests, self.window_seconds)?;
        Ok(RateLimitRule {
            id,
            name: self.name,
            scope: self.scope,
            pattern: self.pattern,
            max_requests: self.max_requests,
            window_seconds: self.window_seconds,
            active: self.active,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulePatch {
    pub name: Option<String>,
    pub scope: Option<LimitScope>,
    pub pattern: Option<Option<String>>,
    pub max_requests: Option<u32>,
    pub window_seconds: Option<u64>,
    pub active: Option<bool>,
}

impl RulePatch {
    pub fn apply(self, rule: &mut RateLimitRule, now: DateTime<Utc>) -> Result<(), GantryError> {
        let name = self.name.unwrap_or_else(|| rule.name.clone());
        let pattern = self.pattern.unwrap_or_else(|| rule.pattern.clone());
        let max_requests = self.max_requests.unwrap_or(rule.max_requests);
        let window_seconds = self.window_seconds.unwrap_or(rule.window_seconds);
        validate_rule(&name, pattern.as_deref(), max_requests, window_seconds)?;

        rule.name = name;
        rule.pattern = pattern;
        rule.max_requests = max_requests;
        rule.window_seconds = window_seconds;
        if let Some(scope) = self.scope {
            rule.scope = scope;
        }
        if let Some(active) = self.active {
            rule.active = active;
        }
        rule.updated_at = now;
        Ok(())
    }
}

fn validate_rule(
    name: &str,
    pattern: Option<&str>,
    max_requests: u32,
    window_seconds: u64,
) -> Result<(), GantryError> {
    if name.trim().is_empty() {
        return Err(GantryError::Validation("rule name must not be empty".into()));
    }
    if max_requests < 1 {
        return Err(GantryError::Validation("max_requests must be >= 1".into()));
    }
    if window_seconds < 1 {
        return Err(GantryError::Validation("window_seconds must be >= 1".into()));
    }
    if let Some(p) = pattern {
        Pattern::compile(p)?;
    }
    Ok(())
}
