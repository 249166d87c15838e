//! Device operations exposed as agent tools. Every `pub fn ... -> String` here
//! is a tool boundary: it never fails, errors come back as `[Fail] ...` text.

use crate::config::Settings;
use crate::coords::{resolve_coordinate_text, Point};
use crate::error::{fail_message, success_message, BridgeError, BridgeResult};
use crate::extract::{extract, render_report, ExtractedElement};
use crate::hierarchy::{artifact_name, find_payload_start, SnapshotFetcher, DEVICE_TMP_DIR};
use crate::runner::DeviceBridge;
use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat, ImageReader};
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static MISSION_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Mission ID #.*?isKeepAlive: false\s*\}").expect("valid mission regex")
});
static BUNDLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bundle name \[(.*?)\]").expect("valid bundle regex"));
static MAIN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"main name \[(.*?)\]").expect("valid main name regex"));
static POWER_STATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Current State:\s*(\w+)").expect("valid power regex"));

const ABILITY_STARTED: &str = "start ability successfully";
pub const DEFAULT_SWIPE_SPEED: u32 = 1000;

/// Key codes understood by `uitest uiInput keyEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKey {
    Home,
    Back,
    Enter,
    PlayPause,
    Stop,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
    Power,
    Mute,
}

impl DeviceKey {
    pub const ALL: [DeviceKey; 11] = [
        DeviceKey::Home,
        DeviceKey::Back,
        DeviceKey::Enter,
        DeviceKey::PlayPause,
        DeviceKey::Stop,
        DeviceKey::Next,
        DeviceKey::Previous,
        DeviceKey::VolumeUp,
        DeviceKey::VolumeDown,
        DeviceKey::Power,
        DeviceKey::Mute,
    ];

    pub fn code(self) -> u32 {
        match self {
            DeviceKey::Home => 1,
            DeviceKey::Back => 2,
            DeviceKey::PlayPause => 10,
            DeviceKey::Stop => 11,
            DeviceKey::Next => 12,
            DeviceKey::Previous => 13,
            DeviceKey::VolumeUp => 16,
            DeviceKey::VolumeDown => 17,
            DeviceKey::Power => 18,
            DeviceKey::Mute => 22,
            DeviceKey::Enter => 2054,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceKey::Home => "home",
            DeviceKey::Back => "back",
            DeviceKey::Enter => "enter",
            DeviceKey::PlayPause => "play_pause",
            DeviceKey::Stop => "stop",
            DeviceKey::Next => "next",
            DeviceKey::Previous => "previous",
            DeviceKey::VolumeUp => "volume_up",
            DeviceKey::VolumeDown => "volume_down",
            DeviceKey::Power => "power",
            DeviceKey::Mute => "mute",
        }
    }

    /// Case-insensitive; `_`, `-` and spaces are ignored.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        DeviceKey::ALL
            .into_iter()
            .find(|key| key.name().replace('_', "") == normalized)
    }
}

/// Quote `text` for the device shell so spaces and quotes survive.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Foreground app from `aa dump -l` output.
pub fn parse_foreground_mission(output: &str) -> Option<(String, String)> {
    MISSION_BLOCK
        .find_iter(output)
        .map(|m| m.as_str())
        .filter(|block| block.contains("state #FOREGROUND"))
        .find_map(|block| {
            let bundle = BUNDLE_NAME.captures(block)?.get(1)?.as_str().to_string();
            let main = MAIN_NAME.captures(block)?.get(1)?.as_str().to_string();
            Some((bundle, main))
        })
}

/// Installed bundle names from `bm dump -a` output.
pub fn parse_app_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.starts_with("ID"))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// `(bundleName, mainAbility)` of the first HAP module in `bm dump -n` output.
pub fn parse_entry_ability(output: &str) -> BridgeResult<(String, String)> {
    let start = find_payload_start(output)
        .ok_or_else(|| BridgeError::Device("No such package".to_string()))?;
    let info: Value = serde_json::from_str(&output[start..])
        .map_err(|err| BridgeError::Device(format!("unreadable bundle info: {err}")))?;
    let field = |name: &str| {
        info.pointer(&format!("/hapModuleInfos/0/{name}"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| BridgeError::Device(format!("bundle info has no hapModuleInfos[0].{name}")))
    };
    Ok((field("bundleName")?, field("mainAbility")?))
}

pub fn parse_power_state(output: &str) -> Option<String> {
    POWER_STATE
        .captures(output)
        .map(|caps| caps[1].to_string())
}

fn render<T>(result: BridgeResult<T>, ok: impl FnOnce(T) -> String) -> String {
    match result {
        Ok(value) => ok(value),
        Err(err) => {
            debug!(error = %err, "tool call failed");
            fail_message(err)
        }
    }
}

#[derive(Clone)]
pub struct HarmonyDevice {
    bridge: Arc<dyn DeviceBridge>,
    settings: Settings,
}

impl HarmonyDevice {
    pub fn new(bridge: Arc<dyn DeviceBridge>, settings: Settings) -> Self {
        Self { bridge, settings }
    }

    fn shell(&self, command: &str) -> BridgeResult<String> {
        self.bridge
            .shell(command)
            .into_result(&format!("shell {command}"))
    }

    pub fn check_installed(&self) -> bool {
        self.bridge.run(&["version"]).ok
    }

    // ── UI layout ───────────────────────────────────────────────

    pub fn ui_layout(&self) -> BridgeResult<Vec<ExtractedElement>> {
        let snapshot = SnapshotFetcher::new(self.bridge.as_ref(), self.settings.snapshot_dir()).fetch();
        let root = snapshot.load(self.settings.keep_snapshots)?;
        let elements = extract(&root, self.settings.report_mode);
        info!(
            nodes = root.node_count(),
            elements = elements.len(),
            mode = ?self.settings.report_mode,
            "extracted ui layout"
        );
        Ok(elements)
    }

    /// Formatted element report, the "no elements" sentinel, or `[Fail] ...`.
    pub fn get_ui_layout(&self) -> String {
        render(self.ui_layout(), |elements| render_report(&elements))
    }

    // ── Input ───────────────────────────────────────────────────

    fn tap(&self, center: &str, action: &str) -> BridgeResult<Point> {
        let point = resolve_coordinate_text(center)?;
        self.shell(&format!("uitest uiInput {action} {} {}", point.x, point.y))?;
        Ok(point)
    }

    pub fn click(&self, center: &str) -> String {
        render(self.tap(center, "click"), |p| success_message(format!("clicked {p}")))
    }

    pub fn long_click(&self, center: &str) -> String {
        render(self.tap(center, "longClick"), |p| {
            success_message(format!("long clicked {p}"))
        })
    }

    pub fn input_text(&self, center: &str, text: &str) -> String {
        let result = resolve_coordinate_text(center).and_then(|point| {
            self.shell(&format!(
                "uitest uiInput inputText {} {} {}",
                point.x,
                point.y,
                shell_quote(text)
            ))?;
            self.shell(&format!("uitest uiInput keyEvent {}", DeviceKey::Enter.code()))?;
            Ok(point)
        });
        render(result, |p| success_message(format!("typed {text:?} at {p}")))
    }

    pub fn swipe(&self, from: Point, to: Point, speed: Option<u32>) -> String {
        let speed = speed.filter(|s| *s > 0).unwrap_or(DEFAULT_SWIPE_SPEED);
        let result = self.shell(&format!(
            "uitest uiInput swipe {} {} {} {} {speed}",
            from.x, from.y, to.x, to.y
        ));
        render(result, |_| success_message(format!("swiped {from} -> {to}")))
    }

    pub fn press_key(&self, name: &str) -> String {
        let result = DeviceKey::from_name(name)
            .ok_or_else(|| {
                let known: Vec<&str> = DeviceKey::ALL.iter().map(|k| k.name()).collect();
                BridgeError::Device(format!("unknown key {name:?}, expected one of {}", known.join(", ")))
            })
            .and_then(|key| {
                self.shell(&format!("uitest uiInput keyEvent {}", key.code()))?;
                Ok(key)
            });
        render(result, |key| success_message(format!("pressed {}", key.name())))
    }

    // ── Apps ────────────────────────────────────────────────────

    pub fn installed_apps(&self) -> BridgeResult<Vec<String>> {
        Ok(parse_app_list(&self.shell("bm dump -a")?))
    }

    pub fn list_app(&self) -> String {
        render(self.installed_apps(), |apps| apps.join("\n"))
    }

    pub fn current_app(&self) -> String {
        let result = self.shell("aa dump -l").and_then(|output| {
            parse_foreground_mission(&output)
                .ok_or_else(|| BridgeError::Device("no foreground application".to_string()))
        });
        render(result, |(bundle, ability)| format!("Bundle: {bundle}\nAbility: {ability}"))
    }

    /// Bundle names reach the device shell verbatim, so only names the
    /// device itself reports are accepted.
    fn ensure_installed(&self, bundle: &str) -> BridgeResult<()> {
        if self.installed_apps()?.iter().any(|app| app == bundle) {
            Ok(())
        } else {
            Err(BridgeError::Device(format!(
                "the given package {bundle} not installed. Use `list_app` to checkout the available apps"
            )))
        }
    }

    fn start_app(&self, bundle: &str) -> BridgeResult<String> {
        self.ensure_installed(bundle)?;
        let (bundle_name, ability) = parse_entry_ability(&self.shell(&format!("bm dump -n {bundle}"))?)?;
        let started = self.shell(&format!("aa start -b {bundle_name} -a {ability}"))?;
        if !started.contains(ABILITY_STARTED) {
            return Err(BridgeError::Device(started.trim().to_string()));
        }
        info!(bundle = %bundle_name, ability = %ability, "launched app");
        Ok(started)
    }

    pub fn launch_app(&self, bundle: &str) -> String {
        render(self.start_app(bundle.trim()), success_message)
    }

    pub fn stop_app(&self, bundle: &str) -> String {
        let bundle = bundle.trim();
        let result = self
            .ensure_installed(bundle)
            .and_then(|()| self.shell(&format!("aa force-stop {bundle}")));
        render(result, |out| {
            if out.trim().is_empty() {
                success_message(format!("stopped {bundle}"))
            } else {
                success_message(out)
            }
        })
    }

    // ── Power ───────────────────────────────────────────────────

    pub fn screen_state(&self) -> String {
        let result = self
            .shell("hidumper -s PowerManagerService -a -s")
            .and_then(|output| {
                parse_power_state(&output)
                    .ok_or_else(|| BridgeError::Device("power state not reported".to_string()))
            });
        render(result, |state| state)
    }

    pub fn wakeup(&self) -> String {
        render(self.shell("power-shell wakeup"), success_message)
    }

    // ── Screenshot ──────────────────────────────────────────────

    /// Capture the screen, pull it, and return a downscaled PNG.
    pub fn screenshot_png(&self) -> BridgeResult<Vec<u8>> {
        let dir = self.settings.screenshot_dir();
        let name = artifact_name("screenshot", "jpeg");
        let device_path = format!("{DEVICE_TMP_DIR}/{name}");
        let local_path = dir.join(&name);

        if let Err(err) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %err, "cannot create screenshot directory");
        }
        let capture = self.bridge.shell(&format!("snapshot_display -f {device_path}"));
        if !capture.ok {
            warn!(output = %capture.output.trim(), "screen capture failed");
        }
        let local_arg = local_path.display().to_string();
        let recv = self.bridge.run(&["file", "recv", &device_path, &local_arg]);
        if !recv.ok {
            warn!(output = %recv.output.trim(), "screenshot pull failed");
        }
        let cleanup = self.bridge.shell(&format!("rm -rf {device_path}"));
        if !cleanup.ok {
            debug!(output = %cleanup.output.trim(), "device screenshot cleanup failed");
        }

        let png = downscale_png(&local_path, self.settings.screenshot_scale());
        if !self.settings.keep_snapshots && local_path.exists() {
            if let Err(err) = fs::remove_file(&local_path) {
                warn!(path = %local_path.display(), error = %err, "failed to remove screenshot");
            }
        }
        png
    }
}

fn downscale_png(path: &Path, scale: f32) -> BridgeResult<Vec<u8>> {
    let unavailable = |err: &dyn std::fmt::Display| {
        BridgeError::Device(format!("screenshot unavailable ({}): {err}", path.display()))
    };
    let img = ImageReader::open(path)
        .map_err(|e| unavailable(&e))?
        .with_guessed_format()
        .map_err(|e| unavailable(&e))?
        .decode()
        .map_err(|e| unavailable(&e))?;
    let (w, h) = img.dimensions();
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    let resized = img.resize_exact(new_w, new_h, FilterType::Lanczos3);

    let mut buf = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| unavailable(&e))?;
    debug!(from = ?(w, h), to = ?(new_w, new_h), bytes = buf.len(), "encoded screenshot");
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::NO_ELEMENTS;
    use crate::hierarchy::fixtures;
    use crate::runner::testing::ScriptedBridge;
    use crate::runner::CommandOutcome;
    use serde_json::json;
    use tempfile::tempdir;

    const AA_DUMP: &str = "\
  Mission ID #12  mission name #[#com.example.notes:entry:EntryAbility]  lockedState #0
    app name [com.example.notes]
    main name [EntryAbility]
    bundle name [com.example.notes]
    state #BACKGROUND
    isKeepAlive: false
  }
  Mission ID #14  mission name #[#com.huawei.hmos.browser:entry:MainAbility]  lockedState #0
    app name [com.huawei.hmos.browser]
    main name [MainAbility]
    bundle name [com.huawei.hmos.browser]
    state #FOREGROUND
    isKeepAlive: false
  }
";

    const BM_DUMP_ALL: &str = "ID: 100:\n\tcom.example.notes\n\tcom.huawei.hmos.browser\n\n";

    fn device_with(
        dir: &Path,
        handler: impl Fn(&[String]) -> CommandOutcome + Send + Sync + 'static,
    ) -> (HarmonyDevice, Arc<ScriptedBridge>) {
        let bridge = Arc::new(ScriptedBridge::new(handler));
        let settings = Settings {
            work_dir: dir.to_path_buf(),
            ..Settings::default()
        };
        (HarmonyDevice::new(bridge.clone(), settings), bridge)
    }

    #[test]
    fn get_ui_layout_renders_report() {
        let dir = tempdir().unwrap();
        let payload = fixtures::ok_and_status_bar().to_string();
        let (device, _) = device_with(dir.path(), move |args| {
            if args[0] == "file" {
                fs::write(&args[3], &payload).unwrap();
            }
            CommandOutcome::success("")
        });
        assert_eq!(
            device.get_ui_layout(),
            "Element Type: Clickable\n    Text: OK\n    Center: (20, 20)\n    Bounds: [10,10][30,30]"
        );
        let leftovers = fs::read_dir(dir.path().join("snapshots")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn get_ui_layout_returns_sentinel_for_empty_screen() {
        let dir = tempdir().unwrap();
        let payload = fixtures::node(json!({}), vec![]).to_string();
        let (device, _) = device_with(dir.path(), move |args| {
            if args[0] == "file" {
                fs::write(&args[3], &payload).unwrap();
            }
            CommandOutcome::success("")
        });
        assert_eq!(device.get_ui_layout(), NO_ELEMENTS);
    }

    #[test]
    fn get_ui_layout_collapses_failures_into_text() {
        let dir = tempdir().unwrap();
        let (device, _) = device_with(dir.path(), |_| CommandOutcome::failure("Command timed out after 10 seconds"));
        let report = device.get_ui_layout();
        assert!(report.starts_with("[Fail] cannot parse layout snapshot"), "{report}");
    }

    #[test]
    fn get_ui_layout_reports_banner_only_dump() {
        let dir = tempdir().unwrap();
        let (device, _) = device_with(dir.path(), |args| {
            if args[0] == "file" {
                fs::write(&args[3], "[Fail]Error: dump layout failed").unwrap();
            }
            CommandOutcome::success("")
        });
        let report = device.get_ui_layout();
        assert!(report.starts_with("[Fail]"));
        assert!(report.contains("no JSON object found"));
    }

    #[test]
    fn click_resolves_coordinates() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |_| CommandOutcome::success("No Error"));
        assert_eq!(device.click("Center: (277, 168)"), "[Success] clicked (277, 168)");
        assert_eq!(device.long_click("10,20"), "[Success] long clicked (10, 20)");
        assert_eq!(
            bridge.joined_calls(),
            vec!["shell uitest uiInput click 277 168", "shell uitest uiInput longClick 10 20"]
        );
    }

    #[test]
    fn click_with_bad_text_never_reaches_device() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |_| CommandOutcome::success(""));
        let result = device.click("click here");
        assert!(result.starts_with("[Fail]"));
        assert!(result.contains("(277, 168)"));
        assert!(bridge.calls().is_empty());
    }

    #[test]
    fn click_reports_command_failure() {
        let dir = tempdir().unwrap();
        let (device, _) = device_with(dir.path(), |_| CommandOutcome::failure("device offline"));
        let result = device.click("(1, 2)");
        assert!(result.starts_with("[Fail] hdc command"));
        assert!(result.contains("device offline"));
    }

    #[test]
    fn input_text_quotes_and_submits() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |_| CommandOutcome::success(""));
        let result = device.input_text("(100, 200)", "it's here");
        assert!(result.starts_with("[Success]"));
        assert_eq!(
            bridge.joined_calls(),
            vec![
                r"shell uitest uiInput inputText 100 200 'it'\''s here'",
                "shell uitest uiInput keyEvent 2054",
            ]
        );
    }

    #[test]
    fn swipe_defaults_speed() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |_| CommandOutcome::success(""));
        device.swipe(Point::new(500, 2000), Point::new(500, 400), None);
        device.swipe(Point::new(0, 0), Point::new(1, 1), Some(300));
        assert_eq!(
            bridge.joined_calls(),
            vec![
                "shell uitest uiInput swipe 500 2000 500 400 1000",
                "shell uitest uiInput swipe 0 0 1 1 300",
            ]
        );
    }

    #[test]
    fn key_names_are_normalized() {
        assert_eq!(DeviceKey::from_name("Volume-Up"), Some(DeviceKey::VolumeUp));
        assert_eq!(DeviceKey::from_name("play pause"), Some(DeviceKey::PlayPause));
        assert_eq!(DeviceKey::from_name("HOME"), Some(DeviceKey::Home));
        assert_eq!(DeviceKey::from_name("rewind"), None);
    }

    #[test]
    fn press_key_sends_key_code() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |_| CommandOutcome::success(""));
        assert_eq!(device.press_key("volume_down"), "[Success] pressed volume_down");
        assert!(device.press_key("rewind").starts_with("[Fail] unknown key"));
        assert_eq!(bridge.joined_calls(), vec!["shell uitest uiInput keyEvent 17"]);
    }

    #[test]
    fn app_list_drops_header_lines() {
        assert_eq!(
            parse_app_list(BM_DUMP_ALL),
            vec!["com.example.notes", "com.huawei.hmos.browser"]
        );
    }

    #[test]
    fn foreground_mission_is_found() {
        assert_eq!(
            parse_foreground_mission(AA_DUMP),
            Some(("com.huawei.hmos.browser".to_string(), "MainAbility".to_string()))
        );
        assert_eq!(parse_foreground_mission("no missions"), None);
    }

    #[test]
    fn current_app_without_foreground_fails() {
        let dir = tempdir().unwrap();
        let (device, _) = device_with(dir.path(), |_| CommandOutcome::success("Mission ID #1 state #BACKGROUND isKeepAlive: false }"));
        assert_eq!(device.current_app(), "[Fail] no foreground application");
    }

    #[test]
    fn entry_ability_from_bundle_dump() {
        let output = r#"com.example.notes:
{"hapModuleInfos":[{"bundleName":"com.example.notes","mainAbility":"EntryAbility"}]}"#;
        assert_eq!(
            parse_entry_ability(output).unwrap(),
            ("com.example.notes".to_string(), "EntryAbility".to_string())
        );
        assert_eq!(
            parse_entry_ability("error: bundle missing").unwrap_err().to_string(),
            "No such package"
        );
        assert!(parse_entry_ability(r#"{"hapModuleInfos":[]}"#).is_err());
    }

    #[test]
    fn launch_app_starts_entry_ability() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |args| {
            let cmd = args.join(" ");
            if cmd.contains("bm dump -a") {
                CommandOutcome::success(BM_DUMP_ALL)
            } else if cmd.contains("bm dump -n") {
                CommandOutcome::success(
                    r#"{"hapModuleInfos":[{"bundleName":"com.example.notes","mainAbility":"EntryAbility"}]}"#,
                )
            } else {
                CommandOutcome::success("start ability successfully.\n")
            }
        });
        assert_eq!(device.launch_app("com.example.notes"), "[Success] start ability successfully.");
        assert_eq!(
            bridge.joined_calls().last().unwrap(),
            "shell aa start -b com.example.notes -a EntryAbility"
        );
    }

    #[test]
    fn launch_app_rejects_unknown_bundle() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |_| CommandOutcome::success(BM_DUMP_ALL));
        let result = device.launch_app("com.example.missing");
        assert!(result.starts_with("[Fail] the given package com.example.missing not installed"));
        assert_eq!(bridge.calls().len(), 1);
    }

    #[test]
    fn launch_app_reports_start_failure() {
        let dir = tempdir().unwrap();
        let (device, _) = device_with(dir.path(), |args| {
            let cmd = args.join(" ");
            if cmd.contains("bm dump -a") {
                CommandOutcome::success(BM_DUMP_ALL)
            } else if cmd.contains("bm dump -n") {
                CommandOutcome::success(
                    r#"{"hapModuleInfos":[{"bundleName":"com.example.notes","mainAbility":"EntryAbility"}]}"#,
                )
            } else {
                CommandOutcome::success("error: failed to start ability.")
            }
        });
        assert_eq!(device.launch_app("com.example.notes"), "[Fail] error: failed to start ability.");
    }

    #[test]
    fn stop_app_force_stops() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |args| {
            if args.join(" ").contains("bm dump -a") {
                CommandOutcome::success(BM_DUMP_ALL)
            } else {
                CommandOutcome::success("")
            }
        });
        assert_eq!(device.stop_app(" com.example.notes "), "[Success] stopped com.example.notes");
        assert_eq!(
            bridge.joined_calls(),
            vec!["shell bm dump -a", "shell aa force-stop com.example.notes"]
        );
    }

    #[test]
    fn stop_app_refuses_names_the_device_does_not_report() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |_| CommandOutcome::success(BM_DUMP_ALL));
        let result = device.stop_app("com.example.notes; reboot");
        assert!(result.starts_with("[Fail] the given package com.example.notes; reboot not installed"));
        assert_eq!(bridge.joined_calls(), vec!["shell bm dump -a"]);
    }

    #[test]
    fn screen_state_is_parsed() {
        assert_eq!(
            parse_power_state("PowerState:\n  Current State: AWAKE  Reason: 0").as_deref(),
            Some("AWAKE")
        );
        let dir = tempdir().unwrap();
        let (device, _) = device_with(dir.path(), |_| CommandOutcome::success("garbage"));
        assert_eq!(device.screen_state(), "[Fail] power state not reported");
    }

    #[test]
    fn wakeup_uses_power_shell() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |_| CommandOutcome::success("\n"));
        assert_eq!(device.wakeup(), "[Success]");
        assert_eq!(bridge.joined_calls(), vec!["shell power-shell wakeup"]);
    }

    #[test]
    fn screenshot_is_pulled_and_downscaled() {
        let dir = tempdir().unwrap();
        let (device, bridge) = device_with(dir.path(), |args| {
            if args[0] == "file" {
                let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(100, 50));
                img.save_with_format(&args[3], ImageFormat::Png).unwrap();
            }
            CommandOutcome::success("")
        });
        let png = device.screenshot_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.dimensions(), (30, 15));

        let calls = bridge.joined_calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("shell snapshot_display -f /data/local/tmp/screenshot-"));
        assert!(calls[2].starts_with("shell rm -rf /data/local/tmp/screenshot-"));
    }

    #[test]
    fn screenshot_survives_failed_device_cleanup_and_removes_local_copy() {
        let dir = tempdir().unwrap();
        let (device, _) = device_with(dir.path(), |args| {
            if args[0] == "file" {
                let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(10, 10));
                img.save_with_format(&args[3], ImageFormat::Png).unwrap();
            }
            if args.len() > 1 && args[1].starts_with("rm -rf") {
                CommandOutcome::failure("Permission denied")
            } else {
                CommandOutcome::success("")
            }
        });
        assert!(device.screenshot_png().is_ok());
        let leftovers = fs::read_dir(dir.path().join("screenshots")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn screenshot_failure_is_an_error() {
        let dir = tempdir().unwrap();
        let (device, _) = device_with(dir.path(), |_| CommandOutcome::failure("no device"));
        let err = device.screenshot_png().unwrap_err();
        assert!(err.to_string().starts_with("screenshot unavailable"));
    }
}
