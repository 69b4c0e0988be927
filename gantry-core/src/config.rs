use crate::error::GantryError;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the Gantry gateway.
///
/// Loaded from a YAML file merged with `GANTRY_`-prefixed environment
/// variables (`GANTRY_AUTH__SECRET_KEY`, `GANTRY_LISTEN_PORT`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GantryConfig {
    /// TCP port of the public listener.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret for local bearer verification.
    #[serde(default)]
    pub secret_key: String,

    /// Signing algorithm the secret is used with.
    #[serde(default = "default_algorithm")]
    pub token_algorithm: String,

    /// Remote validation endpoint of the identity service. Empty disables
    /// the remote fallback.
    #[serde(default)]
    pub identity_service_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection string of the persistent store. The bundled store treats
    /// this as the JSON state-file path.
    #[serde(default = "default_store_dsn")]
    pub dsn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Per-attempt dispatch timeout when a route omits its own.
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,

    /// Retry attempts when a route omits its own.
    #[serde(default = "default_gateway_retry_count")]
    pub gateway_retry_count: u32,

    /// Peers allowed to supply `X-Forwarded-For`. Anyone else is taken at
    /// socket-address value.
    #[serde(default)]
    pub trusted_proxy_cidrs: Vec<IpNet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master kill-switch for the rate-limit gate.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes before the circuit closes.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Seconds the circuit stays open before admitting a probe.
    #[serde(default = "default_open_timeout_seconds")]
    pub open_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_interval")]
    pub interval_seconds: u64,

    #[serde(default = "default_health_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Horizon for the out-of-band log sweeper; the gateway only carries it.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Capacity of the request-log channel between the pipeline and the sink.
    #[serde(default = "default_log_buffer_size")]
    pub buffer_size: usize,

    /// Fraction of requests recorded; 1.0 records everything.
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_cors_headers")]
    pub headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
}

impl GantryConfig {
    /// Load configuration from a YAML file (if present) plus environment
    /// overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self, GantryError> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for candidate in ["gantry.yaml", "/etc/gantry/gantry.yaml", "config/gantry.yaml"] {
                if Path::new(candidate).exists() {
                    figment = figment.merge(Yaml::file(candidate));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("GANTRY_").split("__"));

        let config: Self =
            figment.extract().map_err(|e| GantryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gateway cannot safely run with.
    pub fn validate(&self) -> Result<(), GantryError> {
        if self.auth.secret_key.is_empty() && self.auth.identity_service_url.is_empty() {
            return Err(GantryError::Config(
                "one of auth.secret_key or auth.identity_service_url must be set".into(),
            ));
        }
        const ALGORITHMS: &[&str] =
            &["HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384"];
        if !ALGORITHMS.contains(&self.auth.token_algorithm.as_str()) {
            return Err(GantryError::Config(format!(
                "unsupported token_algorithm: {}",
                self.auth.token_algorithm
            )));
        }
        if !(0.0..=1.0).contains(&self.logging.sampling_ratio) {
            return Err(GantryError::Config("sampling_ratio must be within [0, 1]".into()));
        }
        if self.logging.buffer_size == 0 {
            return Err(GantryError::Config("log buffer_size must be >= 1".into()));
        }
        if self.circuit_breaker.failure_threshold == 0
            || self.circuit_breaker.success_threshold == 0
        {
            return Err(GantryError::Config("breaker thresholds must be >= 1".into()));
        }
        Ok(())
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy.gateway_timeout_ms)
    }

    pub fn breaker_open_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker.open_timeout_seconds)
    }
}

// Serde default functions

fn default_listen_port() -> u16 {
    8000
}
fn default_algorithm() -> String {
    "HS256".to_string()
}
fn default_store_dsn() -> String {
    "data/gantry-state.json".to_string()
}
fn default_gateway_timeout_ms() -> u64 {
    30_000
}
fn default_gateway_retry_count() -> u32 {
    3
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_open_timeout_seconds() -> u64 {
    60
}
fn default_health_interval() -> u64 {
    60
}
fn default_health_timeout() -> u64 {
    5
}
fn default_retention_days() -> u32 {
    30
}
fn default_log_buffer_size() -> usize {
    10_000
}
fn default_sampling_ratio() -> f64 {
    1.0
}
fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_cors_headers() -> Vec<String> {
    vec!["authorization".to_string(), "content-type".to_string()]
}
fn default_true() -> bool {
    true
}

impl Default for GantryConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            auth: AuthConfig::default(),
            store: StoreConfig::default(),
            proxy: ProxyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health_check: HealthCheckConfig::default(),
            logging: LoggingConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            token_algorithm: default_algorithm(),
            identity_service_url: String::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { dsn: default_store_dsn() }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            gateway_timeout_ms: default_gateway_timeout_ms(),
            gateway_retry_count: default_gateway_retry_count(),
            trusted_proxy_cidrs: vec![],
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout_seconds: default_open_timeout_seconds(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_health_interval(),
            timeout_seconds: default_health_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            buffer_size: default_log_buffer_size(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec![],
            methods: default_cors_methods(),
            headers: default_cors_headers(),
            allow_credentials: false,
        }
    }
}
