use crate::config::{LogFormat, LogLevel, LoggingConfig};
use chrono::{DateTime, Utc};
use log::Record;
use serde_json::json;
use std::io::Write;

/// Installs the global logger. `RUST_LOG` overrides the configured level.
pub fn init(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    builder(config).try_init()?;
    Ok(())
}

fn builder(config: &LoggingConfig) -> env_logger::Builder {
    let level = config.level.clone().unwrap_or_default().to_string();
    let env = env_logger::Env::default().default_filter_or(level);
    let mut builder = env_logger::Builder::from_env(env);

    if let LogFormat::Json = config.format.clone().unwrap_or_default() {
        builder.format(|buf, record| writeln!(buf, "{}", format_json(record, Utc::now())));
    }

    builder
}

fn format_json(record: &Record, timestamp: DateTime<Utc>) -> String {
    let log_entry = json!({
        "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": record.level().to_string().to_lowercase(),
        "target": record.target(),
        "module": record.module_path().unwrap_or("unknown"),
        "message": record.args().to_string(),
    });
    log_entry.to_string()
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, Box<dyn std::error::Error>> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(format!(
            "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            s
        )
        .into()),
    }
}

pub fn parse_log_format(s: &str) -> Result<LogFormat, Box<dyn std::error::Error>> {
    match s.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(format!("Invalid log format: {}. Must be one of: text, json", s).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("DEBUG").unwrap(), LogLevel::Debug));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_parse_log_format() {
        assert!(matches!(parse_log_format("json").unwrap(), LogFormat::Json));
        assert!(parse_log_format("xml").is_err());
    }

    #[test]
    fn test_json_line() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let record = Record::builder()
            .args(format_args!("counter requests_total count: 3"))
            .level(log::Level::Info)
            .target("proximity::diag")
            .module_path(Some("proximity::metrics"))
            .build();

        let line = format_json(&record, timestamp);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["timestamp"], "2024-05-01T12:00:00.000Z");
        assert_eq!(value["level"], "info");
        assert_eq!(value["target"], "proximity::diag");
        assert_eq!(value["message"], "counter requests_total count: 3");
    }
}
