/// Logger setup: a stdout `fmt` subscriber whose level comes from `LOG_LEVEL`.
///
/// Each line carries a timestamp, the level, and the emitting component
/// (the tracing target).
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Level used when `LOG_LEVEL` is unset or unrecognized.
pub const DEFAULT_LEVEL: Level = Level::INFO;

/// Resolve a `LOG_LEVEL` value. Case-insensitive; never fails.
pub fn resolve_level(raw: Option<&str>) -> Level {
    let Some(raw) = raw else {
        return DEFAULT_LEVEL;
    };
    match raw.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" | "CRITICAL" | "FATAL" => Level::ERROR,
        _ => DEFAULT_LEVEL,
    }
}

/// Install the process-wide subscriber. Call once, at startup.
pub fn init(level: Level) {
    let filter = EnvFilter::new(level.as_str().to_ascii_lowercase());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}
