// Tracing bootstrap for embedding applications
//
// The engine only emits `tracing` events. Hosts that have no subscriber of
// their own can call `init_tracing` once at startup.

use tracing_subscriber::prelude::*;

/// Install a fmt subscriber filtered by `RUST_LOG`, or `default_filter` when unset
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        // Whichever test installs first wins; the second call must not panic
        let _ = init_tracing("debug");
        assert!(!init_tracing("info"));
    }
}
