//! FuseErrorCode trait for structured error reporting.

/// Every error enum implements this to provide a stable, machine-readable code.
pub trait FuseErrorCode {
    /// Returns the error code string (e.g., "CONFIG_ERROR").
    fn error_code(&self) -> &'static str;

    /// Returns the formatted string: `[ERROR_CODE] message`.
    fn display_with_code(&self) -> String
    where
        Self: std::fmt::Display,
    {
        format!("[{}] {}", self.error_code(), self)
    }
}

pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
pub const UNKNOWN_NODE: &str = "UNKNOWN_NODE";
pub const GRAPH_ERROR: &str = "GRAPH_ERROR";
