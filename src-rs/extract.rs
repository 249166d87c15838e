//! Reduce a layout tree to the flat element report handed to the agent.

use crate::coords::Point;
use crate::hierarchy::UiNode;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Window owner of the system status bar; its whole subtree is never reported.
pub const SYSTEM_SHELL_BUNDLE: &str = "com.ohos.sceneboard";

pub const NO_ELEMENTS: &str = "No clickable elements found with text or description";

const EDITABLE_TYPES: [&str; 3] = ["Text", "TextInput", "SearchField"];

static BOUNDS_CORNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+),(\d+)\]").expect("valid bounds regex"));

/// Which nodes make it into the report and how they are labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReportMode {
    /// Any node with text or a description, labelled Plaintext/Clickable/Editable.
    #[default]
    Rich,
    /// Older behavior: only `clickable == "true"` nodes, all labelled Clickable.
    ClickableOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElementKind {
    pub clickable: bool,
    pub editable: bool,
}

impl ElementKind {
    pub fn is_plaintext(&self) -> bool {
        !self.clickable && !self.editable
    }

    pub fn label(&self) -> String {
        if self.is_plaintext() {
            return "Plaintext".to_string();
        }
        let mut parts = Vec::new();
        if self.clickable {
            parts.push("Clickable");
        }
        if self.editable {
            parts.push("Editable");
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedElement {
    pub kind: ElementKind,
    pub key: String,
    pub text: String,
    pub description: String,
    pub bounds: String,
    pub center: Option<Point>,
}

impl ExtractedElement {
    pub fn render(&self) -> String {
        let mut lines = vec![format!("Element Type: {}", self.kind.label())];
        if !self.key.is_empty() {
            lines.push(format!("Key: {}", self.key));
        }
        if !self.text.is_empty() {
            lines.push(format!("Text: {}", self.text));
        }
        if !self.description.is_empty() {
            lines.push(format!("Description: {}", self.description));
        }
        if let Some(center) = self.center {
            lines.push(format!("Center: {center}"));
        }
        if !self.bounds.is_empty() {
            lines.push(format!("Bounds: {}", self.bounds));
        }
        lines.join("\n    ")
    }
}

/// Integer midpoint of a `[x1,y1][x2,y2]` rectangle. Anything other than
/// exactly two corners yields `None`.
pub fn bounds_center(bounds: &str) -> Option<Point> {
    let corners: Vec<(i64, i64)> = BOUNDS_CORNER
        .captures_iter(bounds)
        .map(|caps| Some((caps[1].parse::<i64>().ok()?, caps[2].parse::<i64>().ok()?)))
        .collect::<Option<Vec<_>>>()?;
    match corners.as_slice() {
        [(x1, y1), (x2, y2)] => Some(Point::new(
            x1.checked_add(*x2)?.div_euclid(2),
            y1.checked_add(*y2)?.div_euclid(2),
        )),
        _ => None,
    }
}

fn is_system_shell(node: &UiNode) -> bool {
    node.attributes
        .bundle_name
        .as_deref()
        .is_some_and(|bundle| bundle.trim() == SYSTEM_SHELL_BUNDLE)
}

fn classify(node: &UiNode, mode: ReportMode) -> Option<ExtractedElement> {
    let attrs = &node.attributes;
    let text = attrs.text.trim();
    let description = attrs.description.trim();
    let bounds = attrs.bounds.trim();
    let key = attrs.key.trim();
    let clickable = attrs.is_clickable();
    let editable = clickable && EDITABLE_TYPES.contains(&attrs.kind.trim());

    if text.is_empty() && description.is_empty() {
        return None;
    }

    let kind = match mode {
        ReportMode::Rich => {
            let keyed = !key.is_empty();
            ElementKind {
                clickable: clickable || keyed,
                editable: editable || keyed,
            }
        }
        ReportMode::ClickableOnly if clickable => ElementKind {
            clickable: true,
            editable: false,
        },
        ReportMode::ClickableOnly => return None,
    };

    Some(ExtractedElement {
        kind,
        key: key.to_string(),
        text: text.to_string(),
        description: description.to_string(),
        bounds: bounds.to_string(),
        center: bounds_center(bounds),
    })
}

/// Pre-order walk of `root`. Inclusion is decided per node; only the system
/// shell window prunes its descendants.
pub fn extract(root: &UiNode, mode: ReportMode) -> Vec<ExtractedElement> {
    let mut elements = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if is_system_shell(node) {
            continue;
        }
        if let Some(element) = classify(node, mode) {
            elements.push(element);
        }
        stack.extend(node.children.iter().rev());
    }
    elements
}

pub fn render_report(elements: &[ExtractedElement]) -> String {
    if elements.is_empty() {
        return NO_ELEMENTS.to_string();
    }
    elements
        .iter()
        .map(ExtractedElement::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}
