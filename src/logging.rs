//! Tracing subscriber setup.

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the global subscriber. `RUST_LOG` takes precedence over `log_level`.
pub fn init(log_format: &str, log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    let format = normalize_log_format(log_format);

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true).with_target(true))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()?;
    }

    tracing::debug!(log_format = format, log_level, "Logging system initialized");
    Ok(())
}

fn normalize_log_format(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "json" => "json",
        "pretty" | "compact" | "text" => "pretty",
        _ => {
            eprintln!(
                "WARN: Invalid log format '{format}', defaulting to 'json'. Valid options: json, pretty"
            );
            "json"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_log_format() {
        assert_eq!(normalize_log_format("JSON"), "json");
        assert_eq!(normalize_log_format("text"), "pretty");
        assert_eq!(normalize_log_format("compact"), "pretty");
        assert_eq!(normalize_log_format("yaml"), "json");
    }
}
