use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{ApkMetadata, DeviceSummary, FastbootDevice};

const DEVICES_HEADER: &str = "List of devices attached";

fn devices_body_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)List of devices attached(.*)").ok()).as_ref()
}

fn version_name_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"versionName='([^']*)'").ok()).as_ref()
}

fn package_name_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^package:\s*name='([^']*)'").ok()).as_ref()
}

fn label_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^application-label(?:-([A-Za-z_\-]+))?:'(.*)'$").ok())
        .as_ref()
}

/// Parses `adb devices [-l]`. Daemon chatter (`* daemon started ...`) and
/// anything before the header line are ignored; without the header there
/// are no devices.
pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    let Some(body) = devices_body_re()
        .and_then(|re| re.captures(output))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
    else {
        return Vec::new();
    };

    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('*'))
        .filter(|line| !line.contains(DEVICES_HEADER))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let mut summary = DeviceSummary {
                serial: tokens[0].to_string(),
                state: tokens[1].to_string(),
                model: None,
                product: None,
                device: None,
                transport_id: None,
            };
            for token in tokens.iter().skip(2) {
                if let Some(value) = token.strip_prefix("model:") {
                    summary.model = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("product:") {
                    summary.product = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("device:") {
                    summary.device = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("transport_id:") {
                    summary.transport_id = Some(value.to_string());
                }
            }
            Some(summary)
        })
        .collect()
}

/// Parses `fastboot devices`, one `SERIAL<TAB>MODE` per line.
pub fn parse_fastboot_devices(output: &str) -> Vec<FastbootDevice> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('<') && !line.starts_with('*'))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?.to_string();
            let mode = tokens.next().unwrap_or("fastboot").to_string();
            Some(FastbootDevice { serial, mode })
        })
        .collect()
}

/// Parses `pm list packages` into sorted, de-duplicated package names.
/// Handles the `-f` form `package:/path/base.apk=com.example` as well.
pub fn parse_package_list(output: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for raw in output.lines() {
        let line = raw.trim();
        let Some(payload) = line.strip_prefix("package:") else {
            continue;
        };
        let name = match payload.rsplit_once('=') {
            Some((_, pkg)) => pkg.trim(),
            None => payload.trim(),
        };
        if !name.is_empty() {
            names.insert(name.to_string());
        }
    }
    names.into_iter().collect()
}

/// Extracts the application label and version name from
/// `aapt dump badging` output. The unlocalized label wins; otherwise the
/// first localized one, then the package name.
pub fn parse_aapt_badging(output: &str) -> Result<ApkMetadata, String> {
    let mut label: Option<String> = None;
    let mut localized: Option<String> = None;
    let mut package: Option<String> = None;
    let mut version_name: Option<String> = None;

    for raw in output.lines() {
        let line = raw.trim();
        if line.starts_with("package:") {
            if let Some(caps) = package_name_re().and_then(|re| re.captures(line)) {
                package = Some(caps[1].to_string());
            }
            if let Some(caps) = version_name_re().and_then(|re| re.captures(line)) {
                version_name = Some(caps[1].to_string());
            }
            continue;
        }
        if let Some(caps) = label_re().and_then(|re| re.captures(line)) {
            let value = caps[2].trim().to_string();
            if value.is_empty() {
                continue;
            }
            if caps.get(1).is_none() {
                label.get_or_insert(value);
            } else {
                localized.get_or_insert(value);
            }
        }
    }

    let label = label
        .or(localized)
        .or(package)
        .ok_or_else(|| "APK metadata has no application label".to_string())?;
    let version_name = version_name
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| "APK metadata has no versionName".to_string())?;
    Ok(ApkMetadata {
        label,
        version_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_adb_devices_long_output() {
        let output = "* daemon not running; starting now at tcp:5037\n* daemon started successfully\nList of devices attached\r\nR58M123ABC     device usb:1-1 product:beyond1 model:SM_G973F device:beyond1 transport_id:3\r\nemulator-5554\toffline\r\n\r\n";
        let devices = parse_adb_devices(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "R58M123ABC");
        assert_eq!(devices[0].state, "device");
        assert_eq!(devices[0].model.as_deref(), Some("SM_G973F"));
        assert_eq!(devices[0].transport_id.as_deref(), Some("3"));
        assert_eq!(devices[1].serial, "emulator-5554");
        assert_eq!(devices[1].state, "offline");
        assert!(devices[1].model.is_none());
    }

    #[test]
    fn parses_empty_device_list() {
        assert!(parse_adb_devices("List of devices attached\n\n").is_empty());
        assert!(parse_adb_devices("").is_empty());
    }

    #[test]
    fn output_without_header_has_no_devices() {
        let output = "adb: unable to connect for root: closed\nerror: no devices/emulators found\n";
        assert!(parse_adb_devices(output).is_empty());
    }

    #[test]
    fn parses_fastboot_devices() {
        let output = "0123456789ABCDEF\tfastboot\nHT7A1B234567\tfastbootd\n";
        let devices = parse_fastboot_devices(output);
        assert_eq!(
            devices,
            vec![
                FastbootDevice {
                    serial: "0123456789ABCDEF".to_string(),
                    mode: "fastboot".to_string()
                },
                FastbootDevice {
                    serial: "HT7A1B234567".to_string(),
                    mode: "fastbootd".to_string()
                },
            ]
        );
        assert!(parse_fastboot_devices("< waiting for any device >\n").is_empty());
    }

    #[test]
    fn parses_package_list() {
        let output = "package:com.android.settings\r\npackage:com.example.app\n\npackage:/data/app/x/base.apk=com.example.full\nWARNING: linker noise\npackage:com.example.app\n";
        assert_eq!(
            parse_package_list(output),
            vec!["com.android.settings", "com.example.app", "com.example.full"]
        );
    }

    #[test]
    fn parses_badging_label_and_version() {
        let output = "package: name='com.example.notes' versionCode='42' versionName='3.1.0' platformBuildVersionName='14'\nsdkVersion:'24'\napplication-label:'Notes'\napplication-label-zh-CN:'笔记'\napplication: label='Notes' icon='res/icon.png'\n";
        let meta = parse_aapt_badging(output).expect("metadata");
        assert_eq!(meta.label, "Notes");
        assert_eq!(meta.version_name, "3.1.0");
    }

    #[test]
    fn badging_falls_back_to_localized_label_then_package() {
        let localized = "package: name='com.example.a' versionName='1.0'\napplication-label-de:'Beispiel'\n";
        assert_eq!(parse_aapt_badging(localized).unwrap().label, "Beispiel");

        let bare = "package: name='com.example.b' versionCode='1' versionName='2.0'\n";
        assert_eq!(parse_aapt_badging(bare).unwrap().label, "com.example.b");
    }

    #[test]
    fn badging_without_version_is_an_error() {
        let output = "package: name='com.example.c' versionCode='1'\napplication-label:'C'\n";
        assert!(parse_aapt_badging(output).unwrap_err().contains("versionName"));
        assert!(parse_aapt_badging("garbage").is_err());
    }
}
