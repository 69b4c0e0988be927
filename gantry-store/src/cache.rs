use dashmap::DashMap;
use gantry_core::rate_limit::RateLimitRule;
use gantry_core::route::Route;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory config cache — the admin-side source of truth that frozen
/// router/rule-set snapshots are built from.
///
/// Only the management API writes here; the data plane never touches the maps
/// directly, it reads the immutable snapshots swapped in after each mutation.
#[derive(Clone)]
pub struct ConfigCache {
    pub routes: Arc<DashMap<Uuid, Route>>,
    pub rules: Arc<DashMap<Uuid, RateLimitRule>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self { routes: Arc::new(DashMap::new()), rules: Arc::new(DashMap::new()) }
    }

    pub fn all_routes(&self) -> Vec<Route> {
        self.routes.iter().map(|r| r.value().clone()).collect()
    }

    pub fn all_rules(&self) -> Vec<RateLimitRule> {
        self.rules.iter().map(|r| r.value().clone()).collect()
    }

    /// Is `pattern` already taken by an *active* route other than `exclude`?
    /// Enforces the active-pattern uniqueness invariant on create/update.
    pub fn pattern_taken(&self, pattern: &str, exclude: Option<Uuid>) -> bool {
        self.routes.iter().any(|r| {
            r.active && r.pattern == pattern && Some(r.id) != exclude
        })
    }

    /// Is `name` already taken by a rule other than `exclude`?
    pub fn rule_name_taken(&self, name: &str, exclude: Option<Uuid>) -> bool {
        self.rules.iter().any(|r| r.name == name && Some(r.id) != exclude)
    }
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new()
    }
}
