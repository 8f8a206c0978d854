//! Opt-in tracing setup for hosts embedding the engine
//!
//! The engine itself only emits `tracing` events. Hosts without a subscriber
//! of their own can call [`init_logging`] once at startup.

use tracing_subscriber::EnvFilter;

/// Install a stderr fmt subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (for example
/// `"tessera_core=info"`) is used. Security events are logged under the
/// `security` target, so `security=warn` isolates them.
///
/// Returns an error when a global subscriber is already installed.
pub fn init_logging(default_directive: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr) // logs never go to stdout
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_fails() {
        // Another test may have installed one first; either way the second call must fail
        let _ = init_logging("tessera_core=debug");
        assert!(init_logging("tessera_core=debug").is_err());
    }
}
