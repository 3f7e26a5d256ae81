//! Logging setup for the provider process and the sweeper.
//!
//! All logs go to **stderr**; stdout belongs to the host's plugin protocol.
//!
//! # Environment Variables
//!
//! - `LINODE_PROVIDER_LOG`: log filter for this provider (takes precedence)
//! - `RUST_LOG`: fallback filter
//!
//! ```bash
//! # Request-level detail from the cloud client only
//! LINODE_PROVIDER_LOG=info,linode_provider::client=debug ./linode-sweeper --prefix tf-test
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "LINODE_PROVIDER_LOG";

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the default logging subscriber at `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level, used when neither
/// environment variable is set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if already initialized.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}
