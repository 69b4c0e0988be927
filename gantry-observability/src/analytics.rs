use chrono::{DateTime, Utc};
use gantry_core::log::RequestLog;
use serde::Serialize;
use std::collections::HashMap;

const TOP_ENDPOINTS: usize = 10;

/// Windowed aggregates computed on query from the log window.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub window_hours: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage of requests outside the 2xx/3xx classes.
    pub error_rate: f64,
    pub requests_per_second: f64,
    pub avg_response_time_ms: f64,
    pub response_time_percentiles: Percentiles,
    /// Request counts keyed by status class ("2xx", "4xx", ..., "none").
    pub status_classes: HashMap<String, u64>,
    pub top_endpoints: Vec<EndpointStats>,
    pub services: Vec<ServiceStats>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub path: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub service: String,
    pub total_requests: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
}

/// 2xx/3xx counts as success, everything else (including never-returned)
/// as failure.
fn is_success(log: &RequestLog) -> bool {
    matches!(log.status_code, Some(code) if (200..400).contains(&code))
}

fn status_class(log: &RequestLog) -> String {
    match log.status_code {
        Some(code) => format!("{}xx", code / 100),
        None => "none".to_string(),
    }
}

pub fn compute_stats(logs: &[RequestLog], window_hours: u32, now: DateTime<Utc>) -> GatewayStats {
    let total = logs.len() as u64;
    let successful = logs.iter().filter(|l| is_success(l)).count() as u64;
    let failed = total - successful;
    let error_rate = if total > 0 { failed as f64 / total as f64 * 100.0 } else { 0.0 };

    let window_secs = (window_hours as f64) * 3600.0;
    let requests_per_second = if window_secs > 0.0 { total as f64 / window_secs } else { 0.0 };

    let mut times: Vec<f64> = logs.iter().map(|l| l.response_time_ms).collect();
    times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let avg = if times.is_empty() { 0.0 } else { times.iter().sum::<f64>() / times.len() as f64 };

    let mut status_classes: HashMap<String, u64> = HashMap::new();
    for log in logs {
        *status_classes.entry(status_class(log)).or_default() += 1;
    }

    GatewayStats {
        window_hours,
        total_requests: total,
        successful_requests: successful,
        failed_requests: failed,
        error_rate,
        requests_per_second,
        avg_response_time_ms: avg,
        response_time_percentiles: Percentiles {
            p50: percentile(&times, 50.0),
            p90: percentile(&times, 90.0),
            p95: percentile(&times, 95.0),
            p99: percentile(&times, 99.0),
        },
        status_classes,
        top_endpoints: top_endpoints(logs),
        services: service_stats(logs),
        generated_at: now,
    }
}

/// Nearest-rank percentile over the sorted window — exact for the bounded
/// window, no streaming sketch needed at this scale.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((q / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn top_endpoints(logs: &[RequestLog]) -> Vec<EndpointStats> {
    let mut by_path: HashMap<&str, (u64, u64, f64)> = HashMap::new();
    for log in logs {
        let entry = by_path.entry(log.path.as_str()).or_default();
        entry.0 += 1;
        if is_success(log) {
            entry.1 += 1;
        }
        entry.2 += log.response_time_ms;
    }

    let mut endpoints: Vec<EndpointStats> = by_path
        .into_iter()
        .map(|(path, (total, ok, time_sum))| EndpointStats {
            path: path.to_string(),
            total_requests: total,
            successful_requests: ok,
            failed_requests: total - ok,
            avg_response_time_ms: time_sum / total as f64,
        })
        .collect();

    endpoints.sort_by(|a, b| {
        b.total_requests.cmp(&a.total_requests).then_with(|| a.path.cmp(&b.path))
    });
    endpoints.truncate(TOP_ENDPOINTS);
    endpoints
}

fn service_stats(logs: &[RequestLog]) -> Vec<ServiceStats> {
    let mut by_service: HashMap<&str, (u64, u64, f64)> = HashMap::new();
    for log in logs {
        let Some(service) = log.target_service.as_deref() else {
            continue;
        };
        let entry = by_service.entry(service).or_default();
        entry.0 += 1;
        if !is_success(log) {
            entry.1 += 1;
        }
        entry.2 += log.response_time_ms;
    }

    let mut services: Vec<ServiceStats> = by_service
        .into_iter()
        .map(|(service, (total, errors, time_sum))| ServiceStats {
            service: service.to_string(),
            total_requests: total,
            error_count: errors,
            error_rate: errors as f64 / total as f64 * 100.0,
            avg_response_time_ms: time_sum / total as f64,
        })
        .collect();
    services.sort_by(|a, b| a.service.cmp(&b.service));
    services
}
