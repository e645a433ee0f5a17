//! Shared tracing/logging initialization.
//!
//! The signer binary and any embedding host use the same pattern for setting
//! up `tracing_subscriber` with an env-filter and optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialise the global tracing subscriber from the logging section of the
/// resolved configuration.
///
/// `RUST_LOG` wins over `logging.level` when set. When `logging.json` is
/// `true`, structured JSON log lines are emitted instead of the
/// human-readable format.
pub fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(&logging.level)),
    );
    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Scope the configured level to the workspace crates so dependency noise
/// (sqlx statement logging in particular) stays at `warn`.
fn default_filter(level: &str) -> String {
    format!("warn,serialvault_core={level},serialvault_keystore={level},serialvault_signer={level}")
}
