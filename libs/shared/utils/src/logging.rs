use dotenv::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Load `.env` and install the global fmt subscriber, filtered by `RUST_LOG`.
///
/// Safe to call more than once: later calls (for example from several test
/// binaries sharing a process) leave the first subscriber in place.
pub fn init_tracing() {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_does_not_panic() {
        init_tracing();
        init_tracing();
        tracing::info!("tracing initialised");
    }
}
