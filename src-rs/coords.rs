use crate::error::{BridgeError, BridgeResult};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static COORDINATE_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*,\s*(\d+)").expect("valid coordinate regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// First `x, y` pair anywhere in `text`. Parentheses are optional, so both a
/// rendered `Center: (277, 168)` line and a bare `277,168` work.
pub fn resolve_coordinate_text(text: &str) -> BridgeResult<Point> {
    let caps = COORDINATE_PAIR
        .captures(text)
        .ok_or_else(|| BridgeError::format(text))?;
    let x = caps[1].parse::<i64>().map_err(|_| BridgeError::format(text))?;
    let y = caps[2].parse::<i64>().map_err(|_| BridgeError::format(text))?;
    Ok(Point::new(x, y))
}
