pub mod board;
pub mod config;
pub mod errors;
pub mod sync;
pub mod telemetry;
pub mod validate;
