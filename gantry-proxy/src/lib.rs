pub mod auth;
pub mod breaker;
pub mod dispatch;
pub mod health;
pub mod limiter;
pub mod pipeline;

pub use auth::{Identity, TokenVerifier};
pub use breaker::{BreakerState, CircuitBreaker};
pub use dispatch::Dispatcher;
pub use health::{HealthRegistry, HealthSupervisor};
pub use limiter::{RateLimiter, Verdict};
pub use pipeline::Gateway;
