//! Logging initialization for the billing binary.
//!
//! Filter priority:
//! 1. CLI flags (`-v/-q`)
//! 2. `RUST_LOG`
//! 3. the default filter passed in

use crate::error::{BillingError, Result};
use clap_verbosity_flag::{LogLevel, Verbosity};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "cowork_billing=info";

fn build_filter<L: LogLevel>(verbosity: &Verbosity<L>, default_filter: &str) -> Result<EnvFilter> {
    // -v and -q move the level away from the binary's default
    if verbosity.log_level() != L::default() {
        let directive = verbosity.log_level_filter().to_string().to_lowercase();
        return EnvFilter::try_new(directive).map_err(|e| BillingError::Configuration {
            message: format!("invalid log level: {}", e),
        });
    }
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
}

/// Install the global subscriber. `json` switches to one JSON object per line.
pub fn init_logging<L: LogLevel>(verbosity: &Verbosity<L>, default_filter: &str, json: bool) -> Result<()> {
    let filter = build_filter(verbosity, default_filter)?;

    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| BillingError::Configuration {
            message: format!("failed to initialize logging: {}", e),
        })
}
