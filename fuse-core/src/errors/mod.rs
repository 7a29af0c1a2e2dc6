//! Error handling for the fusion workspace.
//! One error enum per subsystem, `thiserror` only, zero `anyhow`.
//!
//! The analysis cache has no error type: lookups, inserts, and invalidation are
//! total. Errors only come from configuration loading and graph mutation.

pub mod config_error;
pub mod error_code;
pub mod graph_error;

pub use config_error::ConfigError;
pub use error_code::FuseErrorCode;
pub use graph_error::GraphError;
