use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::app::adb::apk::{rename_apks, AaptMetadataSource};
use crate::app::adb::locator::Tool;
use crate::app::commands;
use crate::app::config::{
    backup_config_path, config_path, load_config, load_config_from_path, save_config_to_path,
    AppConfig,
};
use crate::app::error::{new_trace_id, AppError};
use crate::app::logging::init_logging;
use crate::app::models::{BatchReport, PackageFilter};
use crate::app::state::AppState;

pub const USAGE: &str = "\
Usage: android_assistant [--config PATH] [--serial SERIAL] [--json] [--quiet] <command> [args]

Commands:
  devices [-l]                 list adb devices
  packages [-s] [-3]           list installed packages (system / third-party)
  install <apk>...             install APK files concurrently
  uninstall <package>...       uninstall packages concurrently
  force-stop <package>         adb shell am force-stop <package>
  kill-server | start-server   control the adb server
  reboot-bootloader            adb reboot bootloader
  fastboot-devices             list fastboot devices
  fastboot-reboot              fastboot reboot
  rename-apks [DIR] [--dry-run]
                               rename APKs to <label>_<versionName>.apk
  run <program> [args]...      run any program through the process runner
  save-config                  write the effective configuration (with overrides)
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Devices { long: bool },
    Packages { system_only: bool, third_party_only: bool },
    Install { apk_paths: Vec<String> },
    Uninstall { package_names: Vec<String> },
    ForceStop { package_name: String },
    KillServer,
    StartServer,
    RebootBootloader,
    FastbootDevices,
    FastbootReboot,
    RenameApks { dir: Option<PathBuf>, dry_run: bool },
    SaveConfig,
    Run { program: String, args: Vec<String> },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub serial: Option<String>,
    pub json: bool,
    pub quiet: bool,
    pub command: CliCommand,
}

pub fn parse_args<I>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let mut config_path = None;
    let mut serial = None;
    let mut json = false;
    let mut quiet = false;

    let mut it = args.into_iter();
    let command_name = loop {
        let Some(arg) = it.next() else {
            return Err("missing command".to_string());
        };
        match arg.as_str() {
            "--config" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--config requires a value".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            "--serial" => {
                serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--json" => json = true,
            "--quiet" => quiet = true,
            "-h" | "--help" | "help" => break "help".to_string(),
            other if other.starts_with("--") => return Err(format!("Unknown arg: {other}")),
            _ => break arg,
        }
    };
    let rest: Vec<String> = it.collect();

    let command = match command_name.as_str() {
        "help" => CliCommand::Help,
        "devices" => CliCommand::Devices {
            long: flags_only(&rest, &["-l"])?.contains(&"-l"),
        },
        "packages" => {
            let flags = flags_only(&rest, &["-s", "-3"])?;
            CliCommand::Packages {
                system_only: flags.contains(&"-s"),
                third_party_only: flags.contains(&"-3"),
            }
        }
        "install" => CliCommand::Install {
            apk_paths: require_values(rest, "install needs at least one APK path")?,
        },
        "uninstall" => CliCommand::Uninstall {
            package_names: require_values(rest, "uninstall needs at least one package name")?,
        },
        "force-stop" => {
            let mut values = require_values(rest, "force-stop needs a package name")?;
            if values.len() > 1 {
                return Err("force-stop takes exactly one package name".to_string());
            }
            CliCommand::ForceStop {
                package_name: values.remove(0),
            }
        }
        "kill-server" => no_args(rest, CliCommand::KillServer)?,
        "start-server" => no_args(rest, CliCommand::StartServer)?,
        "reboot-bootloader" => no_args(rest, CliCommand::RebootBootloader)?,
        "fastboot-devices" => no_args(rest, CliCommand::FastbootDevices)?,
        "fastboot-reboot" => no_args(rest, CliCommand::FastbootReboot)?,
        "save-config" => no_args(rest, CliCommand::SaveConfig)?,
        "rename-apks" => {
            let mut dir = None;
            let mut dry_run = false;
            for value in rest {
                if value == "--dry-run" {
                    dry_run = true;
                } else if dir.is_none() && !value.starts_with('-') {
                    dir = Some(PathBuf::from(value));
                } else {
                    return Err(format!("Unexpected rename-apks arg: {value}"));
                }
            }
            CliCommand::RenameApks { dir, dry_run }
        }
        "run" => {
            let mut values = require_values(rest, "run needs a program")?;
            let program = values.remove(0);
            CliCommand::Run {
                program,
                args: values,
            }
        }
        other => return Err(format!("Unknown command: {other}")),
    };

    Ok(CliArgs {
        config_path,
        serial,
        json,
        quiet,
        command,
    })
}

fn flags_only<'a>(rest: &'a [String], allowed: &[&str]) -> Result<Vec<&'a str>, String> {
    rest.iter()
        .map(|value| {
            if allowed.contains(&value.as_str()) {
                Ok(value.as_str())
            } else {
                Err(format!("Unexpected arg: {value}"))
            }
        })
        .collect()
}

fn require_values(rest: Vec<String>, message: &str) -> Result<Vec<String>, String> {
    if rest.is_empty() {
        Err(message.to_string())
    } else {
        Ok(rest)
    }
}

fn no_args(rest: Vec<String>, command: CliCommand) -> Result<CliCommand, String> {
    match rest.first() {
        Some(value) => Err(format!("Unexpected arg: {value}")),
        None => Ok(command),
    }
}

/// Entry point of the binary; returns the process exit status.
pub fn run() -> i32 {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}\n\n{USAGE}");
            return 2;
        }
    };
    if args.command == CliCommand::Help {
        print!("{USAGE}");
        return 0;
    }

    let trace_id = new_trace_id();
    let loaded = match args.config_path.as_deref() {
        Some(path) => load_config_from_path(path, &trace_id),
        None => load_config(&trace_id),
    };
    let config = match loaded {
        Ok(config) => apply_overrides(config, &args),
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };
    init_logging(&config.logging.log_level);

    let state = match AppState::new(config, &trace_id) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };
    match execute(&state, &args, &trace_id) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(err) => {
            eprintln!("{err}");
            if err.is_validation() {
                2
            } else {
                1
            }
        }
    }
}

pub fn apply_overrides(mut config: AppConfig, args: &CliArgs) -> AppConfig {
    if let Some(serial) = args.serial.as_ref() {
        config.tools.serial = serial.clone();
    }
    if args.quiet {
        config.logging.log_commands = false;
    }
    config
}

fn print_value<T: Serialize>(json: bool, value: &T, plain: impl FnOnce() -> String) {
    if json {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(err) => warn!(error = %err, "failed to serialize result"),
        }
    } else {
        let text = plain();
        if !text.is_empty() {
            println!("{}", text.trim_end());
        }
    }
}

fn print_report(json: bool, report: &BatchReport) {
    print_value(json, report, || report.summary());
}

#[derive(Serialize)]
struct ExitResult<'a> {
    exit_code: i32,
    output: &'a str,
}

/// Runs one command and blocks until every invocation it started (including
/// the package refresh after a batch) has completed. Returns whether all of
/// them succeeded.
pub fn execute(state: &Arc<AppState>, args: &CliArgs, trace_id: &str) -> Result<bool, AppError> {
    let ok = Arc::new(AtomicBool::new(true));
    let json = args.json;

    let exit_reporter = move |ok: Arc<AtomicBool>| {
        move |code: i32, output: String| {
            if code != 0 {
                ok.store(false, Ordering::SeqCst);
            }
            print_value(json, &ExitResult { exit_code: code, output: &output }, || {
                output.clone()
            });
        }
    };

    match &args.command {
        CliCommand::Help => {
            print!("{USAGE}");
        }
        CliCommand::Devices { long } => {
            let ok = Arc::clone(&ok);
            let long = *long || state.config.devices.long_format;
            commands::list_devices(state, long, trace_id, move |code, devices| {
                if code != 0 {
                    ok.store(false, Ordering::SeqCst);
                }
                print_value(json, &devices, || {
                    devices
                        .iter()
                        .map(|d| match d.model.as_deref() {
                            Some(model) => format!("{}\t{}\t{model}", d.serial, d.state),
                            None => format!("{}\t{}", d.serial, d.state),
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                });
            })?;
        }
        CliCommand::Packages {
            system_only,
            third_party_only,
        } => {
            let filter = PackageFilter {
                system_only: *system_only || state.config.packages.include_system,
                third_party_only: *third_party_only || state.config.packages.include_third_party,
            };
            let ok = Arc::clone(&ok);
            commands::list_packages(state, filter, trace_id, move |code, packages| {
                if code != 0 {
                    ok.store(false, Ordering::SeqCst);
                }
                print_value(json, &packages, || packages.join("\n"));
            })?;
        }
        CliCommand::Install { apk_paths } => {
            let on_done = batch_reporter(state, Arc::clone(&ok), json, trace_id);
            commands::install_apks(state, apk_paths, trace_id, on_done)?;
        }
        CliCommand::Uninstall { package_names } => {
            let on_done = batch_reporter(state, Arc::clone(&ok), json, trace_id);
            commands::uninstall_packages(state, package_names, trace_id, on_done)?;
        }
        CliCommand::ForceStop { package_name } => {
            commands::force_stop_package(
                state,
                package_name,
                trace_id,
                exit_reporter(Arc::clone(&ok)),
            )?;
        }
        CliCommand::KillServer => {
            commands::kill_server(state, trace_id, exit_reporter(Arc::clone(&ok)))?;
        }
        CliCommand::StartServer => {
            commands::start_server(state, trace_id, exit_reporter(Arc::clone(&ok)))?;
        }
        CliCommand::RebootBootloader => {
            commands::reboot_bootloader(state, trace_id, exit_reporter(Arc::clone(&ok)))?;
        }
        CliCommand::FastbootReboot => {
            commands::fastboot_reboot(state, trace_id, exit_reporter(Arc::clone(&ok)))?;
        }
        CliCommand::FastbootDevices => {
            let ok = Arc::clone(&ok);
            commands::fastboot_devices(state, trace_id, move |code, devices| {
                if code != 0 {
                    ok.store(false, Ordering::SeqCst);
                }
                print_value(json, &devices, || {
                    devices
                        .iter()
                        .map(|d| format!("{}\t{}", d.serial, d.mode))
                        .collect::<Vec<_>>()
                        .join("\n")
                });
            })?;
        }
        CliCommand::RenameApks { dir, dry_run } => {
            let dir = dir.clone().unwrap_or_else(|| default_apks_dir(&state.config));
            let aapt = state.program(Tool::Aapt, trace_id)?;
            let source = AaptMetadataSource::new(state.runner.clone(), aapt);
            let outcome = rename_apks(&dir, &source, *dry_run, trace_id)?;
            if !outcome.failed.is_empty() {
                ok.store(false, Ordering::SeqCst);
            }
            print_value(json, &outcome, || {
                let mut lines = Vec::new();
                for plan in &outcome.renamed {
                    lines.push(format!("{} -> {}", file_name(&plan.from), file_name(&plan.to)));
                }
                for failure in &outcome.failed {
                    lines.push(format!("{}: {}", file_name(&failure.path), failure.error));
                }
                lines.join("\n")
            });
        }
        CliCommand::SaveConfig => {
            let path = args.config_path.clone().unwrap_or_else(config_path);
            save_config_to_path(&state.config, &path, &backup_config_path(&path), trace_id)?;
            info!(trace_id = %trace_id, path = %path.display(), "configuration saved");
            print_value(json, &state.config, || format!("saved {}", path.display()));
        }
        CliCommand::Run { program, args: run_args } => {
            commands::run_program(
                state,
                program,
                run_args.clone(),
                trace_id,
                exit_reporter(Arc::clone(&ok)),
            )?;
        }
    }

    state.runner.wait_idle();
    Ok(ok.load(Ordering::SeqCst))
}

fn batch_reporter(
    state: &Arc<AppState>,
    ok: Arc<AtomicBool>,
    json: bool,
    trace_id: &str,
) -> impl FnOnce(BatchReport) + Send + 'static {
    let state = Arc::clone(state);
    let trace_id = trace_id.to_string();
    move |report: BatchReport| {
        if !report.all_succeeded() {
            ok.store(false, Ordering::SeqCst);
        }
        print_report(json, &report);
        if !state.config.packages.refresh_after_batch {
            return;
        }
        let filter = PackageFilter {
            system_only: state.config.packages.include_system,
            third_party_only: state.config.packages.include_third_party,
        };
        let refreshed = commands::list_packages(&state, filter, &trace_id, |code, packages| {
            info!(exit_code = code, count = packages.len(), "package list refreshed");
        });
        if let Err(err) = refreshed {
            warn!(trace_id = %err.trace_id, error = %err, "failed to refresh package list");
        }
    }
}

fn default_apks_dir(config: &AppConfig) -> PathBuf {
    let configured = config.apks_dir.trim();
    if configured.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(configured)
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parses_global_flags_and_command() {
        let parsed =
            parse_args(args(&["--serial", "emulator-5554", "--json", "devices", "-l"])).unwrap();
        assert_eq!(parsed.serial.as_deref(), Some("emulator-5554"));
        assert!(parsed.json);
        assert_eq!(parsed.command, CliCommand::Devices { long: true });
    }

    #[test]
    fn parses_batch_commands() {
        let parsed = parse_args(args(&["install", "a.apk", "b.apk"])).unwrap();
        assert_eq!(
            parsed.command,
            CliCommand::Install {
                apk_paths: args(&["a.apk", "b.apk"])
            }
        );
        assert!(parse_args(args(&["uninstall"])).is_err());
        let parsed = parse_args(args(&["packages", "-3", "-s"])).unwrap();
        assert_eq!(
            parsed.command,
            CliCommand::Packages {
                system_only: true,
                third_party_only: true
            }
        );
    }

    #[test]
    fn run_keeps_program_arguments_verbatim() {
        let parsed = parse_args(args(&["--quiet", "run", "adb", "shell", "--help"])).unwrap();
        assert!(parsed.quiet);
        assert_eq!(
            parsed.command,
            CliCommand::Run {
                program: "adb".to_string(),
                args: args(&["shell", "--help"])
            }
        );
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(parse_args(Vec::new()).is_err());
        assert!(parse_args(args(&["--serial"])).is_err());
        assert!(parse_args(args(&["--verbose", "devices"])).is_err());
        assert!(parse_args(args(&["--no-log", "devices"])).is_err());
        assert!(parse_args(args(&["kill-server", "now"])).is_err());
        assert!(parse_args(args(&["devices", "-x"])).is_err());
        assert!(parse_args(args(&["force-stop", "a.b", "c.d"])).is_err());
        assert!(parse_args(args(&["flash"])).unwrap_err().contains("Unknown command"));
    }

    #[test]
    fn parses_rename_options() {
        let parsed = parse_args(args(&["rename-apks", "--dry-run", "/tmp/apks"])).unwrap();
        assert_eq!(
            parsed.command,
            CliCommand::RenameApks {
                dir: Some(PathBuf::from("/tmp/apks")),
                dry_run: true
            }
        );
        assert_eq!(parse_args(args(&["--help"])).unwrap().command, CliCommand::Help);
    }

    #[test]
    fn overrides_apply_on_top_of_config() {
        let parsed = parse_args(args(&["--serial", "ABC", "--quiet", "kill-server"])).unwrap();
        let config = apply_overrides(AppConfig::default(), &parsed);
        assert_eq!(config.tools.serial, "ABC");
        assert!(!config.logging.log_commands);
    }

    #[cfg(unix)]
    #[test]
    fn execute_waits_for_completion_and_reports_status() {
        let state = Arc::new(AppState::with_sink(AppConfig::default(), None));
        let ok_args = parse_args(args(&["run", "sh", "-c", "echo done"])).unwrap();
        assert!(execute(&state, &ok_args, "t").unwrap());
        assert_eq!(state.runner.active_count(), 0);

        let failing = parse_args(args(&["run", "false"])).unwrap();
        assert!(!execute(&state, &failing, "t").unwrap());

        let missing = parse_args(args(&["run", "nonexistent-binary-xyz"])).unwrap();
        assert!(!execute(&state, &missing, "t").unwrap());
        assert_eq!(state.runner.issued(), 3);
    }

    #[test]
    fn quiet_flag_turns_off_command_logging() {
        let parsed = parse_args(args(&["--quiet", "kill-server"])).unwrap();
        assert!(parsed.quiet);
        assert_eq!(parsed.command, CliCommand::KillServer);
        let config = apply_overrides(AppConfig::default(), &parsed);
        assert!(!config.logging.log_commands);
    }

    #[cfg(unix)]
    #[test]
    fn configured_long_format_is_used_for_devices() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = tmp.path().join("adb");
        std::fs::write(
            &adb,
            "#!/bin/sh\necho \"$*\" >> \"$(dirname \"$0\")/calls.log\"\nprintf 'List of devices attached\\n'\n",
        )
        .expect("script");
        std::fs::set_permissions(&adb, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let mut config = AppConfig::default();
        config.tools.adb_path = adb.to_string_lossy().to_string();
        config.devices.long_format = true;
        let state = Arc::new(AppState::with_sink(config, None));
        let parsed = parse_args(args(&["devices"])).unwrap();
        assert!(execute(&state, &parsed, "t").unwrap());

        let calls = std::fs::read_to_string(tmp.path().join("calls.log")).expect("calls");
        assert_eq!(calls.trim(), "devices -l");
    }

    #[test]
    fn save_config_writes_effective_config_to_chosen_path() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let path = tmp.path().join("assistant.json");
        let path_arg = path.to_string_lossy().to_string();
        let parsed =
            parse_args(args(&["--config", &path_arg, "--serial", "XYZ", "save-config"])).unwrap();
        assert_eq!(parsed.command, CliCommand::SaveConfig);

        let config = apply_overrides(AppConfig::default(), &parsed);
        let state = Arc::new(AppState::with_sink(config, None));
        assert!(execute(&state, &parsed, "t").unwrap());
        assert!(execute(&state, &parsed, "t").unwrap());

        let saved = load_config_from_path(&path, "t").expect("load");
        assert_eq!(saved.tools.serial, "XYZ");
        assert!(backup_config_path(&path).exists());
        assert_eq!(state.runner.issued(), 0);
    }
}
