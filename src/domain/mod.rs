pub mod configuration;
pub mod models;
pub mod settings;
pub mod telemetry;
