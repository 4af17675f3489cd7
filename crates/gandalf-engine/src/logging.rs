//! Tracing subscriber set-up.

use tracing_subscriber::EnvFilter;

/// Install a formatted `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` is used. Calling this
/// more than once is harmless: later calls leave the first subscriber in
/// place and return `false`.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_tracing("warn");
        assert!(!init_tracing("debug"));
    }
}
