//! # fuse-core
//!
//! Shared foundation for the fusion analysis workspace.
//! Node identities, device description, errors, layered config, and tracing setup.

pub mod config;
pub mod errors;
pub mod tracing;
pub mod types;
