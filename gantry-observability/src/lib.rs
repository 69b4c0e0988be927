pub mod analytics;
pub mod metrics;
pub mod sink;
pub mod store;

pub use metrics::MetricsCollector;
pub use sink::LogSink;
pub use store::LogStore;
