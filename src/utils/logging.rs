use std::str::FromStr;

use tracing::Level;

/// Parse a level name (`error`, `warn`, `info`, `debug`, `trace`, any case).
pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_ascii_lowercase().as_str() {
        "warning" => Some(Level::WARN),
        other => Level::from_str(other).ok(),
    }
}

/// Install the global fmt subscriber at `level`.
///
/// Unknown levels fall back to `info` with a warning. Later calls are no-ops,
/// so tests may call this freely.
pub fn init(level: &str) {
    let parsed = parse_level(level);

    let installed = tracing_subscriber::fmt()
        .with_max_level(parsed.unwrap_or(Level::INFO))
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .is_ok();

    if installed && parsed.is_none() {
        tracing::warn!("Unknown log level '{level}', using info");
    }
}
