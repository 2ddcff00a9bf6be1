//! 日志初始化
//!
//! 配置文档中的 `logging` 段落决定全局 tracing 订阅者；没有该段落时使用
//! DEBUG 级别的 compact 输出。`RUST_LOG` 环境变量优先于文档中的级别。

use serde::Deserialize;
use tracing::{debug, info};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::value::ConfigValue;
use crate::{AssemblyError, AssemblyResult};

/// Top-level key holding the logging section.
pub const LOGGING_KEY: &str = "logging";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    #[default]
    Compact,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `assembler=debug,warn`.
    pub level: String,
    pub format: LogFormat,
    pub include_location: bool,
    pub include_thread_id: bool,
    pub include_thread_name: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::baseline()
    }
}

impl LoggingConfig {
    /// Used when the configuration has no logging section.
    pub fn baseline() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            include_thread_id: false,
            include_thread_name: false,
        }
    }

    pub fn from_section(section: &ConfigValue) -> AssemblyResult<Self> {
        section
            .deserialize()
            .map_err(|e| AssemblyError::invalid_value(LOGGING_KEY, e.to_string()))
    }

    fn filter(&self) -> AssemblyResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| AssemblyError::invalid_value(LOGGING_KEY, e.to_string())),
        }
    }
}

/// Installs the global subscriber. Returns `false` when one was already
/// installed, which leaves the existing subscriber in place.
pub fn init_logging(config: &LoggingConfig) -> AssemblyResult<bool> {
    let registry = tracing_subscriber::registry().with(config.filter()?);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_thread_ids(config.include_thread_id)
                    .with_thread_names(config.include_thread_name)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_thread_ids(config.include_thread_id)
                    .with_thread_names(config.include_thread_name),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_thread_ids(config.include_thread_id)
                    .with_thread_names(config.include_thread_name),
            )
            .try_init(),
    };

    match installed {
        Ok(()) => {
            info!(
                logging.format = ?config.format,
                logging.level = %config.level,
                "logging initialized"
            );
            Ok(true)
        }
        Err(e) => {
            debug!("logging already initialized: {e}");
            Ok(false)
        }
    }
}

/// Applies the `logging` section of a merged document, or the baseline.
pub fn init_from_section(section: Option<&ConfigValue>) -> AssemblyResult<bool> {
    let config = match section {
        Some(section) if !section.is_null() => LoggingConfig::from_section(section)?,
        _ => LoggingConfig::baseline(),
    };
    init_logging(&config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_section_parsing() {
        let section = ConfigValue::from(json!({"level": "info", "format": "json"}));
        let config = LoggingConfig::from_section(&section).unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Json);
        assert!(!config.include_location);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let section = ConfigValue::from(json!({"levle": "info"}));
        let err = LoggingConfig::from_section(&section).unwrap_err();
        assert!(err.to_string().contains("logging"));
    }

    #[test]
    fn test_second_init_keeps_existing_subscriber() {
        let _ = init_logging(&LoggingConfig::baseline()).unwrap();
        assert!(!init_logging(&LoggingConfig::baseline()).unwrap());
    }
}
