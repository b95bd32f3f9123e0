use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Adb,
    Fastboot,
    Aapt,
}

impl Tool {
    pub fn default_program(self) -> &'static str {
        match self {
            Tool::Adb => "adb",
            Tool::Fastboot => "fastboot",
            Tool::Aapt => "aapt",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            Tool::Adb => "ADB",
            Tool::Fastboot => "Fastboot",
            Tool::Aapt => "AAPT",
        }
    }
}

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Configured path for `tool`, or the bare tool name so the search path is used.
pub fn resolve_program(tool: Tool, configured_path: &str) -> String {
    let normalized = normalize_command_path(configured_path);
    if normalized.is_empty() {
        tool.default_program().to_string()
    } else {
        normalized
    }
}

pub fn validate_program(tool: Tool, program: &str) -> Result<(), String> {
    let name = tool.display_name();
    if program.trim().is_empty() {
        return Err(format!("{name} command is empty"));
    }
    if program == tool.default_program() {
        return Ok(());
    }
    let path = Path::new(program);
    if path.components().count() == 1 && !path.exists() {
        // A bare name such as "adb-custom" is looked up on the search path.
        return Ok(());
    }
    if path.is_dir() {
        return Err(format!("{name} path must point to an executable file"));
    }
    if !path.exists() {
        return Err(format!("{name} executable not found at the configured path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/android/platform-tools/adb\"  "),
            "/opt/android/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/android/platform-tools/fastboot'  "),
            "/opt/android/platform-tools/fastboot"
        );
    }

    #[test]
    fn resolves_empty_to_tool_name() {
        assert_eq!(resolve_program(Tool::Adb, ""), "adb");
        assert_eq!(resolve_program(Tool::Fastboot, "   "), "fastboot");
        assert_eq!(resolve_program(Tool::Aapt, "\"\""), "aapt");
    }

    #[test]
    fn validates_paths() {
        let err = validate_program(Tool::Adb, "/this/path/should/not/exist/adb").unwrap_err();
        assert!(err.to_lowercase().contains("not found"));
        assert!(validate_program(Tool::Fastboot, "fastboot").is_ok());
        assert!(validate_program(Tool::Adb, "adb-custom").is_ok());
        assert!(validate_program(Tool::Adb, " ").is_err());

        let tmp = tempfile::TempDir::new().expect("tmp");
        let err = validate_program(Tool::Aapt, tmp.path().to_str().unwrap()).unwrap_err();
        assert!(err.contains("executable file"));
    }
}
