use crate::pattern::Pattern;
use crate::route::Route;
use crate::GantryError;
use dashmap::DashMap;
use tracing::info;

/// Upper bound on cached resolutions per snapshot; beyond this, lookups fall
/// through to the scan.
const RESOLVE_CACHE_MAX: usize = 8192;

/// A route with its pattern compiled once at snapshot build time.
#[derive(Debug)]
pub struct CompiledRoute {
    pub route: Route,
    pattern: Pattern,
}

/// Why a resolve produced no route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    NotFound,
    /// At least one active pattern matched the path, but none accepted the
    /// method.
    MethodNotAllowed { allowed: Vec<String> },
}

/// Frozen routing table.
///
/// The router is immutable once built. On any route mutation the admin layer
/// builds a fresh `Router` and swaps it in via `arc_swap::ArcSwap`, which also
/// discards the embedded resolve cache wholesale — resolve on the hot path is
/// a single atomic load plus a cache hit or a priority-ordered scan.
pub struct Router {
    /// Active routes, sorted by priority desc, then updated_at desc (younger
    /// wins), then pattern asc. First match in order is the resolution.
    routes: Vec<CompiledRoute>,
    /// "METHOD path" → index into `routes`.
    cache: DashMap<String, usize>,
    /// Monotonic version — bumped on every rebuild.
    version: u64,
}

impl Router {
    /// Build a frozen router from a set of routes. Inactive routes never
    /// match and are dropped here; the config cache keeps their records.
    pub fn build(routes: Vec<Route>, version: u64) -> Result<Self, GantryError> {
        let mut compiled: Vec<CompiledRoute> = routes
            .into_iter()
            .filter(|r| r.active)
            .map(|route| {
                let pattern = Pattern::compile(&route.pattern)?;
                Ok(CompiledRoute { route, pattern })
            })
            .collect::<Result<_, GantryError>>()?;

        compiled.sort_by(|a, b| {
            b.route
                .priority
                .cmp(&a.route.priority)
                .then(b.route.updated_at.cmp(&a.route.updated_at))
                .then(a.route.pattern.cmp(&b.route.pattern))
        });

        info!(routes = compiled.len(), version, "Router built");

        Ok(Self { routes: compiled, cache: DashMap::new(), version })
    }

    /// Resolve `(path, method)` to the highest-priority active route.
    pub fn resolve(&self, method: &str, path: &str) -> Result<&CompiledRoute, ResolveError> {
        let key = format!("{method} {path}");
        if let Some(idx) = self.cache.get(&key) {
            return Ok(&self.routes[*idx]);
        }

        let mut pattern_matched = false;
        let mut allowed: Vec<String> = Vec::new();

        for (idx, cr) in self.routes.iter().enumerate() {
            if !cr.pattern.matches(path) {
                continue;
            }
            if cr.route.allows_method(method) {
                if self.cache.len() < RESOLVE_CACHE_MAX {
                    self.cache.insert(key, idx);
                }
                return Ok(&self.routes[idx]);
            }
            pattern_matched = true;
            for m in &cr.route.methods {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
        }

        if pattern_matched {
            allowed.sort();
            Err(ResolveError::MethodNotAllowed { allowed })
        } else {
            Err(ResolveError::NotFound)
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn make_route(pattern: &str, methods: Vec<&str>, priority: i32) -> Route {
        Route {
            id: Uuid::new_v4(),
            pattern: pattern.to_string(),
            methods: methods.into_iter().map(|s| s.to_string()).collect(),
            target_service: "svc".into(),
            target_base_url: "http://svc:8000".into(),
            auth_required: false,
            priority,
            timeout_ms: None,
            retry_count: None,
            circuit_breaker_enabled: true,
            active: true,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_basic_resolution() {
        let router = Router::build(
            vec![
                make_route("/api/v1/auth/*", vec!["GET", "POST"], 10),
                make_route("/api/v1/content/*", vec!["*"], 10),
            ],
            1,
        )
        .unwrap();

        let cr = router.resolve("GET", "/api/v1/auth/users/7").unwrap();
        assert_eq!(cr.route.pattern, "/api/v1/auth/*");

        let cr = router.resolve("DELETE", "/api/v1/content/items/3").unwrap();
        assert_eq!(cr.route.pattern, "/api/v1/content/*");
    }

    #[test]
    fn test_not_found() {
        let router = Router::build(vec![make_route("/api/*", vec!["GET"], 0)], 1).unwrap();
        assert!(matches!(router.resolve("GET", "/other/x"), Err(ResolveError::NotFound)));
        assert!(matches!(router.resolve("GET", "/"), Err(ResolveError::NotFound)));
    }

    #[test]
    fn test_method_not_allowed_reports_allowed_set() {
        let router = Router::build(
            vec![
                make_route("/api/v1/auth/*", vec!["GET", "POST"], 10),
                make_route("/api/v1/*", vec!["PUT"], 5),
            ],
            1,
        )
        .unwrap();

        match router.resolve("DELETE", "/api/v1/auth/users/7") {
            Err(ResolveError::MethodNotAllowed { allowed }) => {
                assert_eq!(allowed, vec!["GET", "POST", "PUT"]);
            }
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn test_priority_wins() {
        let router = Router::build(
            vec![
                make_route("/api/*", vec!["GET"], 1),
                make_route("/api/v1/*", vec!["GET"], 50),
            ],
            1,
        )
        .unwrap();
        let cr = router.resolve("GET", "/api/v1/users").unwrap();
        assert_eq!(cr.route.pattern, "/api/v1/*");
    }

    #[test]
    fn test_priority_tie_younger_updated_wins() {
        let mut older = make_route("/api/a/*", vec!["GET"], 10);
        older.updated_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut younger = make_route("/api/*", vec!["GET"], 10);
        younger.updated_at = Utc.timestamp_opt(1_700_000_500, 0).unwrap();

        let router = Router::build(vec![older, younger], 1).unwrap();
        let cr = router.resolve("GET", "/api/a/x").unwrap();
        assert_eq!(cr.route.pattern, "/api/*");
    }

    #[test]
    fn test_full_tie_breaks_on_pattern() {
        // Same priority, same updated_at — lexicographically smaller pattern wins.
        let router = Router::build(
            vec![make_route("/api/b/*", vec!["GET"], 10), make_route("/api/a*/x/*", vec!["GET"], 10)],
            1,
        )
        .unwrap();
        // Only /api/b/* matches this path, ordering must not hide it.
        assert!(router.resolve("GET", "/api/b/x").is_ok());
    }

    #[test]
    fn test_inactive_routes_never_match() {
        let mut r = make_route("/api/*", vec!["GET"], 0);
        r.active = false;
        let router = Router::build(vec![r], 1).unwrap();
        assert!(matches!(router.resolve("GET", "/api/x"), Err(ResolveError::NotFound)));
        assert!(router.is_empty());
    }

    #[test]
    fn test_cache_hit_is_consistent() {
        let router =
            Router::build(vec![make_route("/api/v1/auth/*", vec!["GET"], 10)], 1).unwrap();
        let first = router.resolve("GET", "/api/v1/auth/login").unwrap().route.id;
        let second = router.resolve("GET", "/api/v1/auth/login").unwrap().route.id;
        assert_eq!(first, second);
    }

    #[test]
    fn test_rebuild_reflects_mutation() {
        let route = make_route("/api/*", vec!["GET"], 0);
        let router = Router::build(vec![route.clone()], 1).unwrap();
        assert!(router.resolve("GET", "/api/x").is_ok());

        // Snapshot rebuild without the route — the fresh cache sees nothing.
        let router = Router::build(vec![], 2).unwrap();
        assert_eq!(router.version(), 2);
        assert!(matches!(router.resolve("GET", "/api/x"), Err(ResolveError::NotFound)));
    }

    proptest::proptest! {
        /// Resolution never panics regardless of method or path input.
        #[test]
        fn resolve_never_panics(method in "[A-Z]{1,8}", path in "/[a-z/]{0,40}") {
            let router = Router::build(
                vec![make_route("/api/*", vec!["GET"], 0)],
                1,
            ).unwrap();
            let _ = router.resolve(&method, &path);
        }

        /// resolve is a pure function of the active route set: two identically
        /// built routers agree on every query.
        #[test]
        fn resolve_is_deterministic(path in "/[a-z/]{0,30}") {
            let routes = vec![
                make_route("/api/*", vec!["GET"], 1),
                make_route("/api/v1/*", vec!["GET"], 2),
            ];
            let a = Router::build(routes.clone(), 1).unwrap();
            let b = Router::build(routes, 1).unwrap();
            let ra = a.resolve("GET", &path).map(|c| c.route.id);
            let rb = b.resolve("GET", &path).map(|c| c.route.id);
            assert_eq!(ra, rb);
        }
    }
}
