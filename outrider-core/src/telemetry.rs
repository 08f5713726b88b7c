//! Tracing subscriber setup for the engine's structured logs.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize a global tracing subscriber from `RUST_LOG`, defaulting to
/// `info` for the outrider crates.
///
/// Safe to call more than once; later calls are no-ops, which keeps test
/// binaries that race on initialization quiet.
pub fn init() {
    init_with_filter("info,outrider_core=info,outrider_ingest=info");
}

/// Initialize with an explicit default filter, still honoring `RUST_LOG`.
pub fn init_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_init_is_harmless() {
        init();
        init();
    }
}
