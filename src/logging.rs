use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingSection;

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init(logging: &LoggingSection, verbose: bool) {
    let default_directive = if verbose {
        "debug".to_string()
    } else if logging.level.trim().is_empty() {
        "info".to_string()
    } else {
        logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    // try_init: tests and repeated CLI invocations in one process must not panic.
    let result = if logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
