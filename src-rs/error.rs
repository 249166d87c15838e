use std::path::PathBuf;

pub const COORDINATE_EXAMPLE: &str = "(277, 168)";

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// An external hdc invocation failed or timed out.
    #[error("hdc command `{command}` failed: {output}")]
    Command { command: String, output: String },

    /// The layout snapshot was missing, unreadable, or not the expected JSON shape.
    #[error("cannot parse layout snapshot {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// Agent-supplied coordinate text had no `x, y` pair in it.
    #[error("the input should be given like `{example}`, got {input:?}")]
    Format { input: String, example: &'static str },

    /// The command ran but the device reported a logical failure.
    #[error("{0}")]
    Device(String),
}

impl BridgeError {
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BridgeError::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn format(input: &str) -> Self {
        BridgeError::Format {
            input: input.to_string(),
            example: COORDINATE_EXAMPLE,
        }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Render any error as the agent-facing failure string.
pub fn fail_message(err: impl std::fmt::Display) -> String {
    format!("[Fail] {err}")
}

pub fn success_message(detail: impl std::fmt::Display) -> String {
    let detail = detail.to_string();
    let detail = detail.trim();
    if detail.is_empty() {
        "[Success]".to_string()
    } else {
        format!("[Success] {detail}")
    }
}
