pub mod env;
pub mod error;
pub mod metrics;
pub mod secret_store;
pub mod telemetry;
