use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use tracing::{info, warn};
use zip::ZipArchive;

use crate::app::adb::parse::parse_aapt_badging;
use crate::app::adb::runner::{ProcessRunner, RunRequest};
use crate::app::error::AppError;
use crate::app::models::{ApkMetadata, RenameFailure, RenameOutcome, RenamePlan};

/// Source of the label and version name of an APK file.
pub trait ApkMetadataSource {
    fn inspect(&self, path: &Path) -> Result<ApkMetadata, String>;
}

/// Reads APK metadata with `aapt dump badging`, run through the process runner.
pub struct AaptMetadataSource {
    runner: ProcessRunner,
    program: String,
}

impl AaptMetadataSource {
    pub fn new(runner: ProcessRunner, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

impl ApkMetadataSource for AaptMetadataSource {
    fn inspect(&self, path: &Path) -> Result<ApkMetadata, String> {
        let (tx, rx) = mpsc::channel();
        let args = vec![
            "dump".to_string(),
            "badging".to_string(),
            path.to_string_lossy().to_string(),
        ];
        self.runner.run(
            RunRequest::new(self.program.clone(), args)
                .use_logging(false)
                .on_finished(move |code, output| {
                    let _ = tx.send((code, output));
                }),
        );
        let (code, output) = rx
            .recv()
            .map_err(|_| "aapt finished without reporting a result".to_string())?;
        if code != 0 {
            return Err(format!(
                "aapt exited with code {code}: {}",
                output.trim()
            ));
        }
        parse_aapt_badging(&output)
    }
}

pub fn is_apk_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("apk"))
}

pub fn check_apk_archive(path: &Path) -> Result<(), String> {
    let file = File::open(path).map_err(|err| format!("Failed to open APK: {err}"))?;
    ZipArchive::new(file).map_err(|err| format!("Invalid APK: {err}"))?;
    Ok(())
}

pub fn normalize_apk_path(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(trimmed)
}

/// Replaces characters that are not allowed in file names on common
/// filesystems.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim().to_string();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

pub fn renamed_file_name(meta: &ApkMetadata) -> String {
    format!(
        "{}_{}.apk",
        sanitize_file_name(&meta.label),
        sanitize_file_name(&meta.version_name)
    )
}

pub fn list_apk_files(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries =
        fs::read_dir(dir).map_err(|err| format!("Failed to read {}: {err}", dir.display()))?;
    let mut files = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_apk_file(path))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

/// Renames every APK in `dir` to `<label>_<versionName>.apk`. Per-file
/// problems are collected in the outcome; existing files are never
/// overwritten. With `dry_run` the plan is reported but nothing is moved.
pub fn rename_apks(
    dir: &Path,
    source: &dyn ApkMetadataSource,
    dry_run: bool,
    trace_id: &str,
) -> Result<RenameOutcome, AppError> {
    if !dir.is_dir() {
        return Err(AppError::validation(
            format!("APK directory not found: {}", dir.display()),
            trace_id,
        ));
    }
    let files = list_apk_files(dir).map_err(|err| AppError::system(err, trace_id))?;
    let mut outcome = RenameOutcome::default();
    let mut claimed = HashSet::<PathBuf>::new();

    for path in files {
        let shown = path.to_string_lossy().to_string();
        let planned = check_apk_archive(&path).and_then(|_| source.inspect(&path));
        let meta = match planned {
            Ok(meta) => meta,
            Err(err) => {
                warn!(trace_id = %trace_id, path = %shown, error = %err, "cannot inspect apk");
                outcome.failed.push(RenameFailure {
                    path: shown,
                    error: err,
                });
                continue;
            }
        };

        let new_name = renamed_file_name(&meta);
        let current_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if new_name == current_name {
            claimed.insert(path.clone());
            outcome.unchanged.push(shown);
            continue;
        }

        let target = dir.join(&new_name);
        if target.exists() || claimed.contains(&target) {
            outcome.failed.push(RenameFailure {
                path: shown,
                error: format!("Target already exists: {new_name}"),
            });
            continue;
        }

        if !dry_run {
            if let Err(err) = fs::rename(&path, &target) {
                outcome.failed.push(RenameFailure {
                    path: shown,
                    error: format!("Failed to rename: {err}"),
                });
                continue;
            }
            info!(trace_id = %trace_id, from = %current_name, to = %new_name, "renamed apk");
        }
        claimed.insert(target.clone());
        outcome.renamed.push(RenamePlan {
            from: shown,
            to: target.to_string_lossy().to_string(),
        });
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    struct FixedMetadata(HashMap<String, ApkMetadata>);

    impl ApkMetadataSource for FixedMetadata {
        fn inspect(&self, path: &Path) -> Result<ApkMetadata, String> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.0
                .get(&name)
                .cloned()
                .ok_or_else(|| format!("no metadata for {name}"))
        }
    }

    fn meta(label: &str, version: &str) -> ApkMetadata {
        ApkMetadata {
            label: label.to_string(),
            version_name: version.to_string(),
        }
    }

    fn write_apk(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).expect("apk");
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("AndroidManifest.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"manifest").unwrap();
        zip.finish().unwrap();
        path
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_file_name("Notes/Pro: Beta"), "Notes_Pro_ Beta");
        assert_eq!(sanitize_file_name("  ..  "), "_");
        assert_eq!(renamed_file_name(&meta("Maps", "11.2")), "Maps_11.2.apk");
    }

    #[test]
    fn renames_and_reports_per_file() {
        let tmp = TempDir::new().expect("tmp");
        write_apk(tmp.path(), "base.apk");
        write_apk(tmp.path(), "Notes_3.1.apk");
        write_apk(tmp.path(), "unknown.APK");
        fs::write(tmp.path().join("broken.apk"), b"not a zip").unwrap();
        fs::write(tmp.path().join("readme.txt"), b"ignored").unwrap();

        let source = FixedMetadata(HashMap::from([
            ("base.apk".to_string(), meta("Camera", "2.0")),
            ("Notes_3.1.apk".to_string(), meta("Notes", "3.1")),
            ("broken.apk".to_string(), meta("Broken", "1")),
        ]));
        let outcome = rename_apks(tmp.path(), &source, false, "t").expect("rename");

        assert_eq!(outcome.renamed.len(), 1);
        assert!(outcome.renamed[0].to.ends_with("Camera_2.0.apk"));
        assert!(tmp.path().join("Camera_2.0.apk").exists());
        assert!(!tmp.path().join("base.apk").exists());
        assert_eq!(outcome.unchanged.len(), 1);
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome
            .failed
            .iter()
            .any(|f| f.path.ends_with("broken.apk") && f.error.contains("Invalid APK")));
        assert!(outcome
            .failed
            .iter()
            .any(|f| f.path.ends_with("unknown.APK") && f.error.contains("no metadata")));
    }

    #[test]
    fn dry_run_detects_collisions_without_moving() {
        let tmp = TempDir::new().expect("tmp");
        write_apk(tmp.path(), "a.apk");
        write_apk(tmp.path(), "b.apk");
        let source = FixedMetadata(HashMap::from([
            ("a.apk".to_string(), meta("Same", "1.0")),
            ("b.apk".to_string(), meta("Same", "1.0")),
        ]));
        let outcome = rename_apks(tmp.path(), &source, true, "t").expect("plan");
        assert_eq!(outcome.renamed.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].error.contains("already exists"));
        assert!(tmp.path().join("a.apk").exists());
        assert!(!tmp.path().join("Same_1.0.apk").exists());
    }

    #[test]
    fn missing_directory_is_validation_error() {
        let source = FixedMetadata(HashMap::new());
        let err = rename_apks(Path::new("/no/such/apk/dir"), &source, true, "t").unwrap_err();
        assert!(err.is_validation());
    }

    #[cfg(unix)]
    #[test]
    fn aapt_source_parses_badging_from_tool() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().expect("tmp");
        let script = tmp.path().join("aapt");
        fs::write(
            &script,
            "#!/bin/sh\necho \"package: name='com.example.x' versionCode='7' versionName='7.0.1'\"\necho \"application-label:'Example'\"\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let apk = write_apk(tmp.path(), "x.apk");

        let source = AaptMetadataSource::new(
            ProcessRunner::new(None),
            script.to_string_lossy().to_string(),
        );
        assert_eq!(source.inspect(&apk).expect("meta"), meta("Example", "7.0.1"));

        let failing = AaptMetadataSource::new(ProcessRunner::new(None), "false");
        assert!(failing.inspect(&apk).unwrap_err().contains("code 1"));
    }
}
