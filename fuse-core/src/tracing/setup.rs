//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Initialize logging for the fusion workspace.
///
/// Reads `FUSE_LOG` for per-module log levels, e.g.
/// `FUSE_LOG=fuse_analysis::cache=debug,fuse_core=warn`.
/// Falls back to `fuse=info` if `FUSE_LOG` is not set or is invalid.
///
/// Idempotent. Does nothing if another global subscriber is already installed.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env("FUSE_LOG").unwrap_or_else(|_| EnvFilter::new("fuse=info"));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init();
    });
}
