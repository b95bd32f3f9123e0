use tracing::info;

use crate::app::adb::apk::normalize_apk_path;
use crate::app::adb::locator::Tool;
use crate::app::adb::parse::{parse_adb_devices, parse_fastboot_devices, parse_package_list};
use crate::app::adb::runner::RunRequest;
use crate::app::batch::BatchTracker;
use crate::app::error::AppError;
use crate::app::models::{BatchAction, BatchReport, DeviceSummary, FastbootDevice, PackageFilter};
use crate::app::state::AppState;

fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

pub fn is_valid_package_name(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    // Segments separated by dots, each alnum/underscore, at least two of them.
    let mut count = 0usize;
    for part in trimmed.split('.') {
        count += 1;
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
    }
    count >= 2
}

fn adb_args(state: &AppState, args: &[&str]) -> Vec<String> {
    let mut full = state.config.serial_args();
    full.extend(args.iter().map(|arg| arg.to_string()));
    full
}

/// Runs `program` with `args` as-is. Returns the invocation's sequence number.
pub fn run_program<F>(
    state: &AppState,
    program: &str,
    args: Vec<String>,
    trace_id: &str,
    on_done: F,
) -> Result<u64, AppError>
where
    F: FnOnce(i32, String) + Send + 'static,
{
    ensure_non_empty(program, "program", trace_id)?;
    Ok(state
        .runner
        .run(RunRequest::new(program.trim(), args).on_finished(on_done)))
}

fn run_tool<F>(
    state: &AppState,
    tool: Tool,
    args: Vec<String>,
    trace_id: &str,
    on_done: F,
) -> Result<u64, AppError>
where
    F: FnOnce(i32, String) + Send + 'static,
{
    let program = state.program(tool, trace_id)?;
    Ok(state
        .runner
        .run(RunRequest::new(program, args).on_finished(on_done)))
}

pub fn kill_server<F>(state: &AppState, trace_id: &str, on_done: F) -> Result<u64, AppError>
where
    F: FnOnce(i32, String) + Send + 'static,
{
    run_tool(state, Tool::Adb, vec!["kill-server".to_string()], trace_id, on_done)
}

pub fn start_server<F>(state: &AppState, trace_id: &str, on_done: F) -> Result<u64, AppError>
where
    F: FnOnce(i32, String) + Send + 'static,
{
    run_tool(state, Tool::Adb, vec!["start-server".to_string()], trace_id, on_done)
}

pub fn reboot_bootloader<F>(state: &AppState, trace_id: &str, on_done: F) -> Result<u64, AppError>
where
    F: FnOnce(i32, String) + Send + 'static,
{
    let args = adb_args(state, &["reboot", "bootloader"]);
    run_tool(state, Tool::Adb, args, trace_id, on_done)
}

pub fn fastboot_reboot<F>(state: &AppState, trace_id: &str, on_done: F) -> Result<u64, AppError>
where
    F: FnOnce(i32, String) + Send + 'static,
{
    run_tool(state, Tool::Fastboot, vec!["reboot".to_string()], trace_id, on_done)
}

/// `adb devices [-l]`; the callback receives an empty list on a nonzero exit.
pub fn list_devices<F>(
    state: &AppState,
    long: bool,
    trace_id: &str,
    on_done: F,
) -> Result<u64, AppError>
where
    F: FnOnce(i32, Vec<DeviceSummary>) + Send + 'static,
{
    let mut args = vec!["devices".to_string()];
    if long {
        args.push("-l".to_string());
    }
    run_tool(state, Tool::Adb, args, trace_id, move |code, output| {
        let devices = if code == 0 {
            parse_adb_devices(&output)
        } else {
            Vec::new()
        };
        on_done(code, devices);
    })
}

pub fn fastboot_devices<F>(state: &AppState, trace_id: &str, on_done: F) -> Result<u64, AppError>
where
    F: FnOnce(i32, Vec<FastbootDevice>) + Send + 'static,
{
    run_tool(
        state,
        Tool::Fastboot,
        vec!["devices".to_string()],
        trace_id,
        move |code, output| {
            let devices = if code == 0 {
                parse_fastboot_devices(&output)
            } else {
                Vec::new()
            };
            on_done(code, devices);
        },
    )
}

/// `adb shell pm list packages [-s] [-3]`; names are sorted with the
/// `package:` prefix removed, and empty on a nonzero exit.
pub fn list_packages<F>(
    state: &AppState,
    filter: PackageFilter,
    trace_id: &str,
    on_done: F,
) -> Result<u64, AppError>
where
    F: FnOnce(i32, Vec<String>) + Send + 'static,
{
    let mut args = adb_args(state, &["shell", "pm", "list", "packages"]);
    args.extend(filter.args());
    run_tool(state, Tool::Adb, args, trace_id, move |code, output| {
        let packages = if code == 0 {
            parse_package_list(&output)
        } else {
            Vec::new()
        };
        on_done(code, packages);
    })
}

pub fn force_stop_package<F>(
    state: &AppState,
    package_name: &str,
    trace_id: &str,
    on_done: F,
) -> Result<u64, AppError>
where
    F: FnOnce(i32, String) + Send + 'static,
{
    ensure_non_empty(package_name, "package_name", trace_id)?;
    let package_name = package_name.trim();
    if !is_valid_package_name(package_name) {
        return Err(AppError::validation(
            format!("Invalid package name: {package_name}"),
            trace_id,
        ));
    }
    let args = adb_args(state, &["shell", "am", "force-stop", package_name]);
    run_tool(state, Tool::Adb, args, trace_id, on_done)
}

/// Starts one `adb install` per APK, all concurrently. `on_done` receives
/// the aggregated report once every install has finished. All paths are
/// checked before anything is spawned.
pub fn install_apks<F>(
    state: &AppState,
    apk_paths: &[String],
    trace_id: &str,
    on_done: F,
) -> Result<Vec<u64>, AppError>
where
    F: FnOnce(BatchReport) + Send + 'static,
{
    if apk_paths.is_empty() {
        return Err(AppError::validation("apk_paths is required", trace_id));
    }
    let mut targets = Vec::with_capacity(apk_paths.len());
    for raw in apk_paths {
        ensure_non_empty(raw, "apk_path", trace_id)?;
        let path = normalize_apk_path(raw);
        if !path.is_file() {
            return Err(AppError::validation(
                format!("APK file not found: {}", path.display()),
                trace_id,
            ));
        }
        targets.push(path.to_string_lossy().to_string());
    }
    let program = state.program(Tool::Adb, trace_id)?;
    info!(trace_id = %trace_id, count = targets.len(), "installing apks");

    let requests = targets
        .iter()
        .map(|target| {
            let mut args = adb_args(state, &["install"]);
            args.push(target.clone());
            args
        })
        .collect();
    Ok(run_batch(state, &program, BatchAction::Install, targets, requests, on_done))
}

/// Starts one `adb uninstall` per package, all concurrently.
pub fn uninstall_packages<F>(
    state: &AppState,
    package_names: &[String],
    trace_id: &str,
    on_done: F,
) -> Result<Vec<u64>, AppError>
where
    F: FnOnce(BatchReport) + Send + 'static,
{
    if package_names.is_empty() {
        return Err(AppError::validation("package_names is required", trace_id));
    }
    let mut targets = Vec::with_capacity(package_names.len());
    for raw in package_names {
        ensure_non_empty(raw, "package_name", trace_id)?;
        let name = raw.trim();
        if !is_valid_package_name(name) {
            return Err(AppError::validation(
                format!("Invalid package name: {name}"),
                trace_id,
            ));
        }
        targets.push(name.to_string());
    }
    let program = state.program(Tool::Adb, trace_id)?;
    info!(trace_id = %trace_id, count = targets.len(), "uninstalling packages");

    let requests = targets
        .iter()
        .map(|target| adb_args(state, &["uninstall", target.as_str()]))
        .collect();
    Ok(run_batch(state, &program, BatchAction::Uninstall, targets, requests, on_done))
}

fn run_batch<F>(
    state: &AppState,
    program: &str,
    action: BatchAction,
    targets: Vec<String>,
    requests: Vec<Vec<String>>,
    on_done: F,
) -> Vec<u64>
where
    F: FnOnce(BatchReport) + Send + 'static,
{
    let tracker = BatchTracker::new(action, &targets, on_done);
    requests
        .into_iter()
        .enumerate()
        .map(|(index, args)| {
            let tracker = tracker.clone();
            state.runner.run(
                RunRequest::new(program, args)
                    .on_finished(move |code, output| tracker.record(index, code, output)),
            )
        })
        .collect()
}
