//! Ready-made routes
//!
//! - [`health_route`]: aggregate status of periodic health checks
//! - [`info_route`]: a static JSON document with cache validators
//! - [`spa_route`]: a directory served with an index document fallback

pub mod health;
pub mod info;
pub mod spa;

pub use health::{health_route, HealthCheck, HealthCheckConfig, HealthOptions, HealthStatus, OnCheck};
pub use info::{info_route, InfoOptions};
pub use spa::{spa_route, SpaMatcher, SpaOptions};
