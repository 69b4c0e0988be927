pub mod config;
pub mod error;
pub mod health;
pub mod log;
pub mod pattern;
pub mod rate_limit;
pub mod route;
pub mod router;

pub use config::GantryConfig;
pub use error::GantryError;
pub use pattern::Pattern;
pub use route::Route;
pub use router::Router;
