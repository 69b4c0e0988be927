use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Health record for one upstream service. Created on registration or first
/// observed dispatch; never deleted, only reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub base_url: String,
    pub status: ServiceStatus,
    pub last_check_at: Option<DateTime<Utc>>,
    /// Most recent probe round-trip, milliseconds.
    pub response_time_ms: Option<f64>,
    pub success_count: u64,
    pub error_count: u64,
    /// Mirror of the breaker state at snapshot time.
    pub circuit_open: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceHealth {
    pub fn new(service_name: String, base_url: String, now: DateTime<Utc>) -> Self {
        Self {
            service_name,
            base_url,
            status: ServiceStatus::Unknown,
            last_check_at: None,
            response_time_ms: None,
            success_count: 0,
            error_count: 0,
            circuit_open: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Admin reset: back to unknown with zeroed counters.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.status = ServiceStatus::Unknown;
        self.success_count = 0;
        self.error_count = 0;
        self.circuit_open = false;
        self.updated_at = now;
    }
}

/// Fold per-service statuses into one gateway-level status.
///
/// healthy iff all services are healthy; degraded if at least one is healthy
/// and none unhealthy; unhealthy otherwise. No registered services: unknown.
pub fn aggregate_status(statuses: &[ServiceStatus]) -> ServiceStatus {
    if statuses.is_empty() {
        return ServiceStatus::Unknown;
    }
    if statuses.iter().all(|s| *s == ServiceStatus::Healthy) {
        return ServiceStatus::Healthy;
    }
    let any_healthy = statuses.iter().any(|s| *s == ServiceStatus::Healthy);
    let any_unhealthy = statuses.iter().any(|s| *s == ServiceStatus::Unhealthy);
    if any_healthy && !any_unhealthy {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Unhealthy
    }
}

/// Aggregated view returned by the management health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedHealth {
    pub overall_status: ServiceStatus,
    pub total_services: usize,
    pub healthy_services: usize,
    pub degraded_services: usize,
    pub unhealthy_services: usize,
    pub services: Vec<ServiceHealth>,
}

impl AggregatedHealth {
    pub fn from_services(services: Vec<ServiceHealth>) -> Self {
        let statuses: Vec<ServiceStatus> = services.iter().map(|s| s.status).collect();
        let count = |wanted: ServiceStatus| statuses.iter().filter(|s| **s == wanted).count();
        Self {
            overall_status: aggregate_status(&statuses),
            total_services: services.len(),
            healthy_services: count(ServiceStatus::Healthy),
            degraded_services: count(ServiceStatus::Degraded),
            unhealthy_services: count(ServiceStatus::Unhealthy),
            services,
        }
    }
}
