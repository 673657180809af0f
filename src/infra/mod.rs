//! Runtime bootstrap: logging, metrics descriptions and their errors.

pub mod error;
pub mod telemetry;
