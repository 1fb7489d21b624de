pub mod auth;
pub mod config;
pub mod engine;
pub mod market_data;
pub mod pipeline;
pub mod telemetry;
