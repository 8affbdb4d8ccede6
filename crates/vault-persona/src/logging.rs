//! Tracing subscriber setup for processes embedding the personas.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "vault=info";

/// Install the global subscriber with [`DEFAULT_FILTER`].
pub fn init() -> bool {
    init_with(DEFAULT_FILTER)
}

/// Install the global subscriber, falling back to `default_filter` when
/// `RUST_LOG` is unset. Returns false if a subscriber was already installed.
pub fn init_with(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
