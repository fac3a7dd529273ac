pub mod config;
pub mod error;
pub mod generator;
pub mod models;
pub mod openapi;
pub mod pipeline;
pub mod repo;
pub mod routes;
pub mod telemetry; // prometheus recorder, request counters, store gauges

// Re-export commonly used items for tests / external users
pub use pipeline::Pipeline;
pub use routes::{config, AppState};
