use crate::breaker::CircuitBreaker;
use chrono::Utc;
use dashmap::DashMap;
use gantry_core::config::HealthCheckConfig;
use gantry_core::health::{AggregatedHealth, ServiceHealth, ServiceStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, warn};

/// Live health records for every known upstream service.
///
/// Services appear on explicit registration or on first observed dispatch and
/// are never removed, only reset.
pub struct HealthRegistry {
    services: DashMap<String, ServiceHealth>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self { services: DashMap::new() }
    }

    /// Explicit registration. Returns false when the name is already known.
    pub fn register(&self, name: &str, base_url: &str) -> bool {
        if self.services.contains_key(name) {
            return false;
        }
        self.services
            .insert(name.to_string(), ServiceHealth::new(name.to_string(), base_url.to_string(), Utc::now()));
        true
    }

    /// Auto-registration on first observed dispatch; a no-op for known names.
    pub fn observe(&self, name: &str, base_url: &str) {
        self.services
            .entry(name.to_string())
            .or_insert_with(|| ServiceHealth::new(name.to_string(), base_url.to_string(), Utc::now()));
    }

    pub fn get(&self, name: &str) -> Option<ServiceHealth> {
        self.services.get(name).map(|h| h.value().clone())
    }

    pub fn all(&self) -> Vec<ServiceHealth> {
        let mut services: Vec<ServiceHealth> =
            self.services.iter().map(|h| h.value().clone()).collect();
        services.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        services
    }

    /// Restore records persisted by a previous run.
    pub fn restore(&self, services: Vec<ServiceHealth>) {
        for service in services {
            self.services.insert(service.service_name.clone(), service);
        }
    }

    pub fn reset(&self, name: &str) -> Option<ServiceHealth> {
        let mut entry = self.services.get_mut(name)?;
        entry.reset(Utc::now());
        Some(entry.clone())
    }

    fn record_probe(&self, name: &str, status: ServiceStatus, elapsed_ms: f64) {
        let Some(mut entry) = self.services.get_mut(name) else {
            return;
        };
        let now = Utc::now();
        entry.status = status;
        entry.last_check_at = Some(now);
        entry.response_time_ms = Some(elapsed_ms);
        entry.updated_at = now;
        if status == ServiceStatus::Healthy {
            entry.success_count += 1;
        } else {
            entry.error_count += 1;
        }
    }

    /// Aggregated view with the breaker state mirrored into each record.
    pub fn aggregated(&self, breaker: &CircuitBreaker) -> AggregatedHealth {
        let mut services = self.all();
        for service in &mut services {
            service.circuit_open = breaker.is_open(&service.service_name);
        }
        AggregatedHealth::from_services(services)
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Background prober.
///
/// Publishes status only; the breaker is driven exclusively by real dispatch
/// outcomes, so the two disagree at most transiently.
pub struct HealthSupervisor {
    registry: Arc<HealthRegistry>,
    client: reqwest::Client,
    interval: Duration,
    timeout: Duration,
}

impl HealthSupervisor {
    pub fn new(registry: Arc<HealthRegistry>, cfg: &HealthCheckConfig) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
            interval: Duration::from_secs(cfg.interval_seconds.max(1)),
            timeout: Duration::from_secs(cfg.timeout_seconds.max(1)),
        }
    }

    /// Start the probe loop.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(self.interval);
            loop {
                tick.tick().await;
                for service in self.registry.all() {
                    let (status, elapsed_ms) =
                        probe(&self.client, &service.base_url, self.timeout).await;
                    if status != ServiceStatus::Healthy {
                        warn!(
                            service = %service.service_name,
                            status = ?status,
                            "health probe not healthy"
                        );
                    } else {
                        debug!(service = %service.service_name, elapsed_ms, "health probe ok");
                    }
                    self.registry.record_probe(&service.service_name, status, elapsed_ms);
                }
            }
        })
    }
}

/// One GET against the conventional health path.
///
/// 200 within the timeout → healthy; any other response → degraded; no
/// response at all → unhealthy.
pub async fn probe(
    client: &reqwest::Client,
    base_url: &str,
    timeout: Duration,
) -> (ServiceStatus, f64) {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let start = Instant::now();
    let status = match client.get(&url).timeout(timeout).send().await {
        Ok(resp) if resp.status().as_u16() == 200 => ServiceStatus::Healthy,
        Ok(_) => ServiceStatus::Degraded,
        Err(_) => ServiceStatus::Unhealthy,
    };
    (status, start.elapsed().as_secs_f64() * 1000.0)
}
