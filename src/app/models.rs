use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
    pub product: Option<String>,
    pub device: Option<String>,
    pub transport_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FastbootDevice {
    pub serial: String,
    pub mode: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageFilter {
    pub system_only: bool,
    pub third_party_only: bool,
}

impl PackageFilter {
    pub fn args(self) -> Vec<String> {
        let mut args = Vec::new();
        if self.system_only {
            args.push("-s".to_string());
        }
        if self.third_party_only {
            args.push("-3".to_string());
        }
        args
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    Install,
    Uninstall,
}

impl BatchAction {
    pub fn verb(self) -> &'static str {
        match self {
            BatchAction::Install => "install",
            BatchAction::Uninstall => "uninstall",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchItem {
    pub target: String,
    pub exit_code: i32,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub action: BatchAction,
    pub total: usize,
    pub succeeded: Vec<BatchItem>,
    pub failed: Vec<BatchItem>,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn fail_count(&self) -> usize {
        self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.succeeded.len() == self.total
    }

    pub fn summary(&self) -> String {
        let verb = self.action.verb();
        let target_kind = match self.action {
            BatchAction::Install => "APK files",
            BatchAction::Uninstall => "packages",
        };
        let mut text = format!(
            "Attempted to {verb} {} item(s)\nSucceeded: {}\nFailed: {}\n",
            self.total,
            self.success_count(),
            self.fail_count()
        );
        if !self.succeeded.is_empty() {
            text.push_str(&format!("\nSucceeded {target_kind}:\n"));
            for item in &self.succeeded {
                text.push_str(&item.target);
                text.push('\n');
            }
        }
        if !self.failed.is_empty() {
            text.push_str(&format!("\nFailed {target_kind} and their output:\n"));
            for item in &self.failed {
                text.push_str(&format!(
                    "{}\n{}\n",
                    item.target,
                    item.output.trim_end()
                ));
            }
        }
        text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApkMetadata {
    pub label: String,
    pub version_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenamePlan {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenameFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenameOutcome {
    pub renamed: Vec<RenamePlan>,
    pub unchanged: Vec<String>,
    pub failed: Vec<RenameFailure>,
}
