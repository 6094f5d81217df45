use crate::config::LOG_ENV;
use tracing_subscriber::EnvFilter;

// Log to stderr so stdout stays clean for script output and JSON.
// `SCRIPT_SAVER_LOG` takes EnvFilter directives and overrides `-v`.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
