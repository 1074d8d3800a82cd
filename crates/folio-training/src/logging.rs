//! Process-wide log configuration.
//!
//! Only the primary process logs at `INFO`; other ranks are limited to warnings
//! so a multi-process run does not repeat every line per worker. The entry point
//! builds a [`LoggingConfig`] once and calls [`LoggingConfig::init`].

use crate::args::is_main_process;
use crate::error::{TrainingError, TrainingResult};
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

pub const DEFAULT_TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: Level,
    pub main_process: bool,
    pub time_format: String,
}

impl LoggingConfig {
    #[must_use]
    pub fn for_rank(local_rank: i64) -> Self {
        let main_process = is_main_process(local_rank);
        Self {
            level: if main_process { Level::INFO } else { Level::WARN },
            main_process,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }

    /// Replace the rank-derived level with an explicit one (trace, debug, info, warn, error).
    pub fn with_level_override(mut self, level: Option<&str>) -> TrainingResult<Self> {
        if let Some(level) = level {
            self.level = level.parse::<Level>().map_err(|_| {
                TrainingError::InvalidArguments(format!("unknown log level: {level}"))
            })?;
        }
        Ok(self)
    }

    /// Install the global subscriber. Fails if one is already installed.
    pub fn init(&self) -> TrainingResult<()> {
        tracing_subscriber::fmt()
            .with_max_level(self.level)
            .with_timer(ChronoLocal::new(self.time_format.clone()))
            .with_target(true)
            .with_writer(std::io::stdout)
            .try_init()
            .map_err(|e| {
                TrainingError::Other(anyhow::anyhow!("failed to install log subscriber: {e}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_process_logs_info() {
        let config = LoggingConfig::for_rank(-1);
        assert!(config.main_process);
        assert_eq!(config.level, Level::INFO);

        assert_eq!(LoggingConfig::for_rank(0).level, Level::INFO);
    }

    #[test]
    fn test_worker_process_logs_warnings_only() {
        let config = LoggingConfig::for_rank(3);
        assert!(!config.main_process);
        assert_eq!(config.level, Level::WARN);
    }

    #[test]
    fn test_level_override() {
        let config = LoggingConfig::for_rank(2).with_level_override(Some("debug")).unwrap();
        assert_eq!(config.level, Level::DEBUG);

        assert!(LoggingConfig::for_rank(0).with_level_override(Some("loud")).is_err());
        assert_eq!(
            LoggingConfig::for_rank(0).with_level_override(None).unwrap().level,
            Level::INFO
        );
    }
}
