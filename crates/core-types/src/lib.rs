//! Shared primitives for the Optics core: identifiers, element classification,
//! geometry and the values exchanged between element sources, detectors and
//! drivers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error raised when a textual value cannot be parsed into a core type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown direction '{0}' (expected up, down, left or right)")]
    Direction(String),
    #[error("unknown match rule '{0}' (expected any or all)")]
    MatchRule(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a test case, module or keyword node.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// How an element descriptor is interpreted when it is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    /// Visible text, matched natively or through OCR
    Text,
    /// Path to an image template
    Image,
    /// XPath expression evaluated against the page source
    XPath,
}

impl ElementKind {
    /// Classify an element descriptor.
    ///
    /// A descriptor ending in an image extension is an image template, one
    /// starting with `/`, `//` or `(` is an XPath, anything else is text.
    pub fn classify(element: &str) -> Self {
        let is_image = element
            .rsplit_once('.')
            .map(|(_, ext)| {
                let ext = ext.to_ascii_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false);
        if is_image {
            return ElementKind::Image;
        }
        if element.starts_with('/') || element.starts_with('(') {
            return ElementKind::XPath;
        }
        ElementKind::Text
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Text => "text",
            ElementKind::Image => "image",
            ElementKind::XPath => "xpath",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned box given by its top-left and bottom-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top_left: Point,
    pub bottom_right: Point,
}

impl BoundingBox {
    pub const fn new(top_left: Point, bottom_right: Point) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.top_left.x + (self.bottom_right.x - self.top_left.x) / 2,
            self.top_left.y + (self.bottom_right.y - self.top_left.y) / 2,
        )
    }
}

/// A captured screen image. Pixel layout is owned by the producing source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}

/// Opaque reference to a driver-native element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Where a strategy found an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LocationResult {
    Coordinates(Point),
    Element(ElementHandle),
}

impl LocationResult {
    pub fn as_point(&self) -> Option<Point> {
        match self {
            LocationResult::Coordinates(point) => Some(*point),
            LocationResult::Element(_) => None,
        }
    }

    pub fn as_element(&self) -> Option<&ElementHandle> {
        match self {
            LocationResult::Element(handle) => Some(handle),
            LocationResult::Coordinates(_) => None,
        }
    }
}

impl fmt::Display for LocationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationResult::Coordinates(point) => write!(f, "coordinates{point}"),
            LocationResult::Element(handle) => write!(f, "element({})", handle.id),
        }
    }
}

/// Family of a location strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    XPath,
    TextElement,
    TextDetection,
    ImageDetection,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::XPath => "xpath",
            StrategyKind::TextElement => "text_element",
            StrategyKind::TextDetection => "text_detection",
            StrategyKind::ImageDetection => "image_detection",
        }
    }
}

/// Identifies the strategy, and the backends behind it, that produced a
/// location result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyTag {
    pub kind: StrategyKind,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<String>,
}

impl StrategyTag {
    pub fn new(kind: StrategyKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            detector: None,
        }
    }

    pub fn with_detector(mut self, detector: impl Into<String>) -> Self {
        self.detector = Some(detector.into());
        self
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detector {
            Some(detector) => write!(f, "{}({}+{})", self.kind.name(), self.source, detector),
            None => write!(f, "{}({})", self.kind.name(), self.source),
        }
    }
}

/// Result of a detector looking for a reference inside a frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub found: bool,
    pub center: Option<Point>,
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn at(center: Point, bbox: Option<BoundingBox>) -> Self {
        Self {
            found: true,
            center: Some(center),
            bbox,
        }
    }

    /// Center of a positive detection, derived from the box when needed.
    pub fn location(&self) -> Option<Point> {
        if !self.found {
            return None;
        }
        self.center.or_else(|| self.bbox.map(|bbox| bbox.center()))
    }
}

/// One block of recognised text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub bbox: BoundingBox,
    pub text: String,
    pub confidence: f32,
}

/// Whether any or all of a set of elements must be present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchRule {
    #[default]
    Any,
    All,
}

impl FromStr for MatchRule {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(MatchRule::Any),
            "all" => Ok(MatchRule::All),
            other => Err(ParseError::MatchRule(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl FromStr for Direction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(ParseError::Direction(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Seconds since the Unix epoch, the timestamp unit carried by events.
pub fn epoch_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
