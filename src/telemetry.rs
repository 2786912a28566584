use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured filter, e.g. `RUST_LOG=debug`.
/// Fails if a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(config.with_thread_ids),
        )
        .with(filter)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        // Only meaningful when RUST_LOG does not take precedence
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }

        let config = LoggingConfig {
            filter: "es_runtime=notalevel".to_string(),
            with_thread_ids: false,
        };

        assert!(init_tracing(&config).is_err());
    }
}
