//! Tracing setup for the binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the composition root.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "cookbook_client=info,cookbook=info";

/// Install a fmt subscriber honouring `RUST_LOG`, falling back to `default_filter`.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}
