use crate::extract::ReportMode;
use clap::{ArgAction, Args};
use std::path::PathBuf;
use std::time::Duration;

/// Connection and pipeline settings. Every flag can also come from the
/// environment so MCP client configs only need an `env` block.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// hdc executable name or path
    #[arg(long, env = "HDC_BIN", default_value = "hdc", global = true)]
    pub hdc_bin: String,
    /// Remote hdc server host (used together with --server-port)
    #[arg(long, env = "HDC_SERVER_HOST", global = true)]
    pub server_host: Option<String>,
    /// Remote hdc server port
    #[arg(long, env = "HDC_SERVER_PORT", global = true)]
    pub server_port: Option<u16>,
    /// Device connect key to target when several devices are attached
    #[arg(long, env = "HDC_TARGET", global = true)]
    pub target: Option<String>,
    /// Timeout in seconds for each hdc invocation
    #[arg(long = "timeout", env = "HDC_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub timeout_secs: u64,
    /// Local directory for layout snapshots and screenshots
    #[arg(long, env = "HARMONY_BRIDGE_DIR", default_value = ".harmony-bridge", global = true)]
    pub work_dir: PathBuf,
    /// Keep pulled layout snapshots instead of deleting them after parsing
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    pub keep_snapshots: bool,
    /// Element report mode
    #[arg(
        long,
        value_enum,
        env = "HARMONY_REPORT_MODE",
        default_value_t = ReportMode::Rich,
        global = true
    )]
    pub report_mode: ReportMode,
    /// Downscale factor applied to screenshots before returning them
    #[arg(long, default_value_t = 0.3, global = true)]
    pub screenshot_scale: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hdc_bin: "hdc".to_string(),
            server_host: None,
            server_port: None,
            target: None,
            timeout_secs: 10,
            work_dir: PathBuf::from(".harmony-bridge"),
            keep_snapshots: false,
            report_mode: ReportMode::Rich,
            screenshot_scale: 0.3,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// `host:port` for `hdc -s`, only when both halves are configured.
    pub fn server_address(&self) -> Option<String> {
        let host = self.server_host.as_deref().map(str::trim).filter(|h| !h.is_empty())?;
        let port = self.server_port?;
        Some(format!("{host}:{port}"))
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.work_dir.join("snapshots")
    }

    pub fn screenshot_dir(&self) -> PathBuf {
        self.work_dir.join("screenshots")
    }

    pub fn screenshot_scale(&self) -> f32 {
        if self.screenshot_scale.is_finite() && self.screenshot_scale > 0.0 {
            self.screenshot_scale.min(1.0)
        } else {
            0.3
        }
    }
}
