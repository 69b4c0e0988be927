use arc_swap::ArcSwap;
use dashmap::DashMap;
use gantry_core::pattern::Pattern;
use gantry_core::rate_limit::{LimitScope, RateLimitRule};
use gantry_core::GantryError;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;
use uuid::Uuid;

/// One observation of a bucket's window.
#[derive(Debug, Clone, Copy)]
pub struct WindowSample {
    /// Weighted request count currently charged to the window.
    pub count: u64,
    /// Start of the current window step, unix seconds.
    pub window_start: u64,
}

/// Counter backend contract.
///
/// The in-process store below is the default; a distributed counter service
/// implements the same two operations and drops in without touching the
/// engine.
pub trait CounterStore: Send + Sync {
    /// Atomically record one arrival and return the resulting sample.
    fn incr(&self, key: &str, window: Duration, now: SystemTime) -> WindowSample;

    /// Observe the bucket without recording an arrival.
    fn peek(&self, key: &str, window: Duration, now: SystemTime) -> WindowSample;
}

#[derive(Debug)]
struct Slot {
    step_start: f64,
    current: u64,
    previous: u64,
}

/// In-process sliding-window counters.
///
/// Each bucket keeps a current and a previous step count; the previous step
/// decays linearly as the current one fills (weighted rollover). For a steady
/// arrival rate this admits at most `max_requests` per window with drift
/// bounded by one window step. Each DashMap entry access holds the shard lock,
/// making test-and-increment atomic per key.
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self { slots: DashMap::new() }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_secs(now: SystemTime) -> f64 {
    now.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs_f64()
}

fn roll(slot: &mut Slot, window: f64, now: f64) {
    if now < slot.step_start {
        return;
    }
    let elapsed = now - slot.step_start;
    if elapsed < window {
        return;
    }
    let steps = (elapsed / window).floor();
    if steps >= 2.0 {
        slot.previous = 0;
    } else {
        slot.previous = slot.current;
    }
    slot.current = 0;
    slot.step_start += steps * window;
}

fn weighted(slot: &Slot, window: f64, now: f64) -> u64 {
    let frac = ((now - slot.step_start) / window).clamp(0.0, 1.0);
    (slot.current as f64 + slot.previous as f64 * (1.0 - frac)).floor() as u64
}

impl CounterStore for MemoryCounterStore {
    fn incr(&self, key: &str, window: Duration, now: SystemTime) -> WindowSample {
        let window = window.as_secs_f64();
        let now = unix_secs(now);
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot { step_start: now, current: 0, previous: 0 });
        roll(&mut slot, window, now);
        slot.current += 1;
        WindowSample { count: weighted(&slot, window, now), window_start: slot.step_start as u64 }
    }

    fn peek(&self, key: &str, window: Duration, now: SystemTime) -> WindowSample {
        let window_secs = window.as_secs_f64();
        let now_secs = unix_secs(now);
        match self.slots.get_mut(key) {
            Some(mut slot) => {
                roll(&mut slot, window_secs, now_secs);
                WindowSample {
                    count: weighted(&slot, window_secs, now_secs),
                    window_start: slot.step_start as u64,
                }
            }
            None => WindowSample { count: 0, window_start: now_secs as u64 },
        }
    }
}

struct CompiledRule {
    rule: RateLimitRule,
    pattern: Option<Pattern>,
}

/// Frozen active-rule snapshot, rebuilt and swapped on every rule mutation.
struct RuleSet {
    rules: Vec<CompiledRule>,
    version: u64,
}

impl RuleSet {
    fn build(rules: Vec<RateLimitRule>, version: u64) -> Result<Self, GantryError> {
        let compiled = rules
            .into_iter()
            .filter(|r| r.active)
            .map(|rule| {
                let pattern = rule.pattern.as_deref().map(Pattern::compile).transpose()?;
                Ok(CompiledRule { rule, pattern })
            })
            .collect::<Result<Vec<_>, GantryError>>()?;
        Ok(Self { rules: compiled, version })
    }
}

/// Outcome of a rate-limit evaluation, with the governing rule's meter.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds when the governing rule frees a slot.
    pub reset_at: u64,
    pub rule_name: String,
}

impl Verdict {
    pub fn retry_after(&self, now: SystemTime) -> u64 {
        self.reset_at.saturating_sub(unix_secs(now) as u64)
    }
}

/// The rate-limit gate.
///
/// Evaluation is two-phase: every selected rule's bucket is peeked first, and
/// buckets are only incremented when all of them permit — a denied request
/// consumes no budget anywhere.
pub struct RateLimiter {
    rules: ArcSwap<RuleSet>,
    counters: Arc<dyn CounterStore>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self::with_store(enabled, Arc::new(MemoryCounterStore::new()))
    }

    pub fn with_store(enabled: bool, counters: Arc<dyn CounterStore>) -> Self {
        Self {
            rules: ArcSwap::new(Arc::new(RuleSet { rules: Vec::new(), version: 0 })),
            counters,
            enabled,
        }
    }

    /// Replace the active rule set (admin mutation or boot restore).
    pub fn swap_rules(&self, rules: Vec<RateLimitRule>) -> Result<(), GantryError> {
        let version = self.rules.load().version + 1;
        let set = RuleSet::build(rules, version)?;
        info!(rules = set.rules.len(), version, "rate-limit rule set swapped");
        self.rules.store(Arc::new(set));
        Ok(())
    }

    /// Evaluate a request. `None` means no active rule selected it (or the
    /// engine is disabled) — no headers are owed.
    pub fn evaluate(
        &self,
        path: &str,
        route_id: Option<Uuid>,
        user_id: Option<&str>,
        client_ip: &str,
        now: SystemTime,
    ) -> Option<Verdict> {
        if !self.enabled {
            return None;
        }
        let set = self.rules.load();
        let selected: Vec<&CompiledRule> = set
            .rules
            .iter()
            .filter(|cr| match &cr.pattern {
                Some(p) => p.matches(path),
                None => true,
            })
            .filter(|cr| cr.rule.scope != LimitScope::PerUser || user_id.is_some())
            .collect();
        if selected.is_empty() {
            return None;
        }

        // Phase 1: test every bucket.
        let denied = selected
            .iter()
            .filter_map(|cr| {
                let key = bucket_key(cr, route_id, user_id, client_ip, path);
                let window = Duration::from_secs(cr.rule.window_seconds);
                let sample = self.counters.peek(&key, window, now);
                (sample.count >= cr.rule.max_requests as u64).then_some((*cr, sample))
            })
            .min_by_key(|(cr, _)| cr.rule.max_requests);

        if let Some((cr, sample)) = denied {
            return Some(Verdict {
                allowed: false,
                limit: cr.rule.max_requests,
                remaining: 0,
                reset_at: sample.window_start + cr.rule.window_seconds,
                rule_name: cr.rule.name.clone(),
            });
        }

        // Phase 2: commit to every bucket; the rule with the least headroom
        // governs the response headers.
        let mut governing: Option<(u32, &CompiledRule, WindowSample)> = None;
        for &cr in &selected {
            let key = bucket_key(cr, route_id, user_id, client_ip, path);
            let window = Duration::from_secs(cr.rule.window_seconds);
            let sample = self.counters.incr(&key, window, now);
            let remaining =
                (cr.rule.max_requests as u64).saturating_sub(sample.count) as u32;
            let tighter = match &governing {
                Some((best, _, _)) => remaining < *best,
                None => true,
            };
            if tighter {
                governing = Some((remaining, cr, sample));
            }
        }

        let (remaining, cr, sample) = governing.expect("selected is non-empty");
        Some(Verdict {
            allowed: true,
            limit: cr.rule.max_requests,
            remaining,
            reset_at: sample.window_start + cr.rule.window_seconds,
            rule_name: cr.rule.name.clone(),
        })
    }
}

fn bucket_key(
    cr: &CompiledRule,
    route_id: Option<Uuid>,
    user_id: Option<&str>,
    client_ip: &str,
    path: &str,
) -> String {
    let rule_id = cr.rule.id;
    match cr.rule.scope {
        LimitScope::PerUser => format!("user:{}:{rule_id}", user_id.unwrap_or("anonymous")),
        LimitScope::PerIp => format!("ip:{client_ip}:{rule_id}"),
        LimitScope::PerEndpoint => match route_id {
            Some(id) => format!("endpoint:{id}:{rule_id}"),
            None => format!("endpoint:{path}:{rule_id}"),
        },
        LimitScope::Global => format!("global:{rule_id}"),
    }
}
