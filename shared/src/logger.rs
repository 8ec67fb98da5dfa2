//! Logging utilities

use tracing_subscriber::EnvFilter;

/// Output format for the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Reads `LOG_FORMAT`; anything other than `json` means text.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Build the filter from `RUST_LOG`, defaulting to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logger
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logger() {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    let result = match LogFormat::from_env() {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if result.is_ok() {
        tracing::debug!("logger initialized");
    }
}

/// Mask a credential for logging, keeping a short prefix.
pub fn sanitize_for_log(value: &str) -> String {
    if value.len() <= 4 {
        return "****".to_string();
    }
    let prefix: String = value.chars().take(4).collect();
    format!("{}****", prefix)
}
