use serde::Serialize;
use std::fmt;

pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_DEPENDENCY: &str = "ERR_DEPENDENCY";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    /// Bad caller input; nothing was spawned.
    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    /// A required external tool (adb, fastboot, aapt) is missing or unusable.
    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_DEPENDENCY, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }

    pub fn is_validation(&self) -> bool {
        self.code == ERR_VALIDATION
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trace_id.is_empty() {
            write!(f, "{} ({})", self.error, self.code)
        } else {
            write!(f, "{} ({}, trace {})", self.error, self.code, self.trace_id)
        }
    }
}

impl std::error::Error for AppError {}

pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_trace() {
        let err = AppError::validation("apk_paths is required", "trace-1");
        assert_eq!(
            err.to_string(),
            "apk_paths is required (ERR_VALIDATION, trace trace-1)"
        );
        assert!(err.is_validation());
    }

    #[test]
    fn display_omits_empty_trace() {
        let err = AppError::system("Failed to read config", "");
        assert_eq!(err.to_string(), "Failed to read config (ERR_SYSTEM)");
    }

    #[test]
    fn trace_ids_are_unique() {
        assert_ne!(new_trace_id(), new_trace_id());
    }
}
