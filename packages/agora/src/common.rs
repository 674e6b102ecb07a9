/// Common helper functions and utilities.
use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system.
///
/// This leverages the tracing crate. If verbose is enabled,
/// debug messages for both the agora crate itself, and if provided
/// the local crate, will be logged.
pub fn init_logger(verbose: bool, local_crate_name: Option<&str>) {
    static LOGGER_SETUP: OnceLock<()> = OnceLock::new();
    LOGGER_SETUP.get_or_init(|| {
        let env_filter = if verbose {
            match local_crate_name {
                None => format!("{}=debug,info", env!("CARGO_CRATE_NAME")),
                Some(name) => format!("{}=debug,{name}=debug,info", env!("CARGO_CRATE_NAME")),
            }
            .parse()
            .unwrap()
        } else {
            EnvFilter::from_default_env().add_directive(Level::INFO.into())
        };

        tracing_subscriber::registry()
            .with(
                fmt::Layer::default()
                    .log_internal_errors(true)
                    .and_then(env_filter),
            )
            .init();
        tracing::info!("Initialized Logging");
    });
}
