use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Prometheus metrics for the gateway.
pub struct MetricsCollector {
    registry: Registry,

    /// Total requests by target service, method, status.
    pub http_requests_total: IntCounterVec,

    /// End-to-end latency by target service.
    pub http_request_duration: HistogramVec,

    /// Upstream round-trip latency by target service.
    pub upstream_latency: HistogramVec,

    /// Requests currently inside the pipeline.
    pub active_requests: IntGauge,

    pub rate_limited_total: IntCounter,
    pub breaker_rejections_total: IntCounter,
    pub logs_dropped_total: IntCounter,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("gantry_http_requests_total", "Total HTTP requests"),
            &["service", "method", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("gantry_http_request_duration_seconds", "Request latency")
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
            &["service"],
        )?;

        let upstream_latency = HistogramVec::new(
            HistogramOpts::new("gantry_upstream_latency_seconds", "Upstream response time")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["service"],
        )?;

        let active_requests =
            IntGauge::new("gantry_active_requests", "Requests currently in flight")?;

        let rate_limited_total =
            IntCounter::new("gantry_rate_limited_total", "Requests denied by rate limiting")?;

        let breaker_rejections_total = IntCounter::new(
            "gantry_breaker_rejections_total",
            "Requests refused by an open circuit",
        )?;

        let logs_dropped_total =
            IntCounter::new("gantry_logs_dropped_total", "Request-log records dropped")?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;
        registry.register(Box::new(active_requests.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(breaker_rejections_total.clone()))?;
        registry.register(Box::new(logs_dropped_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            upstream_latency,
            active_requests,
            rate_limited_total,
            breaker_rejections_total,
            logs_dropped_total,
        })
    }

    /// Record a completed request.
    pub fn record_request(&self, service: &str, method: &str, status: u16, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[service, method, &status.to_string()])
            .inc();
        self.http_request_duration
            .with_label_values(&[service])
            .observe(duration_secs);
    }

    pub fn record_upstream_latency(&self, service: &str, duration_secs: f64) {
        self.upstream_latency.with_label_values(&[service]).observe(duration_secs);
    }

    /// Prometheus text exposition.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metrics = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metrics, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("failed to create metrics collector")
    }
}
