//! Structured logging and metric registration.
//!
//! Logging uses `tracing-subscriber` with an `EnvFilter`: `RUST_LOG` wins
//! when set, otherwise the configured level applies. JSON output is for
//! production, pretty text for development.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Initialize the logging subsystem.
///
/// Call once at startup. Subsequent calls have no effect (the subscriber is
/// global).
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    if settings.json {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_target(true));
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Registers descriptions for every metric the server emits.
pub fn register_metrics() {
    reportd_domain::cache::register_cache_metrics();

    metrics::describe_counter!(
        "reportd_jobs_submitted_total",
        "Total number of batch jobs accepted"
    );
    metrics::describe_counter!(
        "reportd_jobs_completed_total",
        "Total number of batch jobs finished, labeled by terminal status"
    );
    metrics::describe_counter!(
        "reportd_items_dispatched_total",
        "Total number of batch items dispatched upstream"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            json: false,
        };
        init_logging(&settings);
        // A second call must not panic even though the global default is set.
        init_logging(&settings);
    }
}
