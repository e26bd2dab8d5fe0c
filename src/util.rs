use chrono::{DateTime, Utc};
use tracing::level_filters::LevelFilter;

const AGENT_CONFIG: &str = "AGENT_CONFIG";

const AGENT_TRACE: &str = "AGENT_TRACE";

const DEFAULT_CONFIG_PATH: &str = "./agent.json";

const DEFAULT_SERVER_PORT: u16 = 10051;

pub fn get_default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

pub fn get_config_path() -> String {
    std::env::var(AGENT_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Whether `AGENT_TRACE` asks for trace logging
pub fn get_trace_enabled() -> bool {
    is_enabled(std::env::var(AGENT_TRACE).ok().as_deref())
}

fn is_enabled(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

/// Log level for the agent targets
///
/// TRACE also dumps every submission payload and turns streamed disk sends
/// into buffered ones, so it is opt-in.
pub fn log_level(trace: bool) -> LevelFilter {
    if trace { LevelFilter::TRACE } else { LevelFilter::DEBUG }
}

/// Whole seconds elapsed between two instants, clamped at zero
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    (later - earlier).num_seconds().max(0) as u64
}
