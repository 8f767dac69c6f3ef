pub mod api;
pub mod config;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod telemetry;
