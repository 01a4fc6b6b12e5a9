//! Tracing subscriber setup.

use hotvault_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_telemetry(config: &Config) -> Result<(), anyhow::Error> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hotvault=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(
                        tracing_subscriber::fmt::format::Format::default()
                            .compact()
                            .with_target(false),
                    ),
            )
            .try_init()?;
    }

    tracing::info!(
        environment = %config.environment,
        json_logs = json,
        "Telemetry initialized"
    );
    Ok(())
}
