//! Job assignment and auto-approval engine for a trades marketplace.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;

#[cfg(test)]
pub(crate) mod test_env;

pub use error::AppError;
