use std::path::Path;
use std::sync::Arc;

use crate::app::adb::locator::{resolve_program, validate_program, Tool};
use crate::app::adb::runner::ProcessRunner;
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::logging::{FanoutSink, FileLogSink, LogSink, TracingLogSink};

/// Shared application state: the loaded configuration and the single
/// process runner every operation goes through.
pub struct AppState {
    pub config: AppConfig,
    pub runner: ProcessRunner,
}

impl AppState {
    pub fn new(config: AppConfig, trace_id: &str) -> Result<Self, AppError> {
        let mut sink = FanoutSink::new().with(Arc::new(TracingLogSink));
        if config.logging.log_to_file {
            let path = Path::new(config.logging.log_file_path.trim());
            let file_sink = FileLogSink::open(path).map_err(|err| {
                AppError::system(
                    format!("Failed to open log file {}: {err}", path.display()),
                    trace_id,
                )
            })?;
            sink = sink.with(Arc::new(file_sink));
        }
        Ok(Self::with_sink(config, Some(Arc::new(sink))))
    }

    pub fn with_sink(config: AppConfig, sink: Option<Arc<dyn LogSink>>) -> Self {
        let runner = ProcessRunner::with_logging(sink, config.logging.log_commands);
        Self { config, runner }
    }

    pub fn program(&self, tool: Tool, trace_id: &str) -> Result<String, AppError> {
        let configured = match tool {
            Tool::Adb => &self.config.tools.adb_path,
            Tool::Fastboot => &self.config.tools.fastboot_path,
            Tool::Aapt => &self.config.tools.aapt_path,
        };
        let program = resolve_program(tool, configured);
        validate_program(tool, &program).map_err(|err| AppError::dependency(err, trace_id))?;
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_configured_programs() {
        let mut config = AppConfig::default();
        config.tools.fastboot_path = "  'fastboot-nightly'  ".to_string();
        let state = AppState::with_sink(config, None);
        assert_eq!(state.program(Tool::Adb, "t").unwrap(), "adb");
        assert_eq!(state.program(Tool::Fastboot, "t").unwrap(), "fastboot-nightly");
    }

    #[test]
    fn missing_configured_path_is_a_dependency_error() {
        let mut config = AppConfig::default();
        config.tools.adb_path = "/this/path/should/not/exist/adb".to_string();
        let state = AppState::with_sink(config, None);
        let err = state.program(Tool::Adb, "trace-2").unwrap_err();
        assert_eq!(err.code, "ERR_DEPENDENCY");
        assert_eq!(err.trace_id, "trace-2");
    }

    #[test]
    fn file_logging_opens_configured_file() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let log_path = tmp.path().join("assistant.log");
        let mut config = AppConfig::default();
        config.logging.log_to_file = true;
        config.logging.log_file_path = log_path.to_string_lossy().to_string();
        let state = AppState::new(config, "t").expect("state");
        assert_eq!(state.runner.issued(), 0);
        assert!(log_path.exists());
    }
}
