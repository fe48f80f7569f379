use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PROGRESSD_LOG";

/// Installs the global subscriber. Output goes to stderr: stdout carries the
/// response stream and must stay clean.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .try_init();
}
