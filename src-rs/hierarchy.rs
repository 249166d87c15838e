//! Layout snapshots: dumping the device UI tree, pulling it to local disk, and
//! decoding it into a [`UiNode`] tree.
//!
//! A snapshot produced by `uitest dumpLayout` is a JSON document of nested
//! `{"attributes": {...}, "children": [...]}` objects. Some hdc builds print a
//! banner before the document, so decoding is two-phase: locate the first `{`
//! and strictly decode from there to the end.

use crate::error::{BridgeError, BridgeResult};
use crate::runner::DeviceBridge;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

pub const DEVICE_TMP_DIR: &str = "/data/local/tmp";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub key: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub text: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bounds: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub orig_bounds: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub clickable: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub checkable: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub checked: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub enabled: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub focused: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub scrollable: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub selected: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub long_clickable: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub background_color: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub background_image: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub blur: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub opacity: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub z_index: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub hit_test_behavior: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub host_window_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub accessibility_id: String,
    /// Only present on window-level containers.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_opt_string"
    )]
    pub bundle_name: Option<String>,
    /// Attributes newer dumpers emit that have no typed field yet.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl NodeAttributes {
    pub fn is_clickable(&self) -> bool {
        self.clickable.trim() == "true"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    pub attributes: NodeAttributes,
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

// Dumpers are not consistent about quoting scalars; a number or bool where a
// string is expected should not reject the whole snapshot.
fn scalar_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(deserializer)?))
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        other => Some(scalar_text(other)),
    })
}

/// Byte offset of the JSON payload inside raw dump output.
pub fn find_payload_start(raw: &str) -> Option<usize> {
    raw.find('{')
}

/// Decode raw snapshot text; the error is a human-readable reason.
///
/// Layout nesting is not bounded by serde_json's recursion limit. Deep
/// documents grow the stack on demand instead.
pub fn parse_snapshot_text(raw: &str) -> Result<UiNode, String> {
    let start = find_payload_start(raw).ok_or_else(|| "no JSON object found".to_string())?;
    let invalid = |err: serde_json::Error| format!("invalid layout JSON: {err}");

    let mut json = serde_json::Deserializer::from_str(&raw[start..]);
    json.disable_recursion_limit();
    let root = UiNode::deserialize(serde_stacker::Deserializer::new(&mut json)).map_err(invalid)?;
    json.end().map_err(invalid)?;
    Ok(root)
}

pub fn parse_snapshot_file(path: &Path) -> BridgeResult<UiNode> {
    let bytes = fs::read(path).map_err(|err| BridgeError::parse(path, format!("unreadable: {err}")))?;
    let raw = String::from_utf8_lossy(&bytes);
    let root = parse_snapshot_text(&raw).map_err(|reason| BridgeError::parse(path, reason))?;
    debug!(path = %path.display(), nodes = root.node_count(), "parsed layout snapshot");
    Ok(root)
}

/// A pulled layout dump. The path is unique to the fetch that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub local_path: PathBuf,
    pub device_path: String,
}

impl Snapshot {
    /// Parse the pulled file and, unless `keep`, delete it afterwards.
    pub fn load(&self, keep: bool) -> BridgeResult<UiNode> {
        debug!(device = %self.device_path, local = %self.local_path.display(), "loading snapshot");
        let parsed = parse_snapshot_file(&self.local_path);
        if !keep && self.local_path.exists() {
            if let Err(err) = fs::remove_file(&self.local_path) {
                warn!(path = %self.local_path.display(), error = %err, "failed to remove snapshot");
            }
        }
        parsed
    }
}

static ARTIFACT_SEQ: AtomicU64 = AtomicU64::new(0);

/// `<prefix>-<timestamp>-<pid>-<seq>.<ext>`, unique within and across processes.
pub fn artifact_name(prefix: &str, ext: &str) -> String {
    let seq = ARTIFACT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "{prefix}-{}-{}-{seq}.{ext}",
        Utc::now().format("%Y%m%d-%H%M%S"),
        std::process::id()
    )
}

pub struct SnapshotFetcher<'a> {
    bridge: &'a dyn DeviceBridge,
    local_dir: PathBuf,
}

impl<'a> SnapshotFetcher<'a> {
    pub fn new(bridge: &'a dyn DeviceBridge, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            bridge,
            local_dir: local_dir.into(),
        }
    }

    /// Dump the current layout on the device and pull it locally.
    ///
    /// Failures are logged but not returned: a dump or pull that went wrong
    /// leaves no file at `local_path`, and [`Snapshot::load`] reports that as a
    /// parse error. Callers detect a broken fetch there.
    pub fn fetch(&self) -> Snapshot {
        let name = artifact_name("layout", "json");
        let device_path = format!("{DEVICE_TMP_DIR}/{name}");
        let local_path = self.local_dir.join(&name);

        if let Err(err) = fs::create_dir_all(&self.local_dir) {
            warn!(dir = %self.local_dir.display(), error = %err, "cannot create snapshot directory");
        }

        let dump = self.bridge.shell(&format!("uitest dumpLayout -p {device_path}"));
        if !dump.ok {
            warn!(output = %dump.output.trim(), "layout dump failed");
        }

        let local_arg = local_path.display().to_string();
        let recv = self.bridge.run(&["file", "recv", &device_path, &local_arg]);
        if !recv.ok {
            warn!(output = %recv.output.trim(), "layout pull failed");
        }

        let cleanup = self.bridge.shell(&format!("rm -f {device_path}"));
        if !cleanup.ok {
            debug!(output = %cleanup.output.trim(), "device snapshot cleanup failed");
        }

        Snapshot {
            local_path,
            device_path,
        }
    }
}
