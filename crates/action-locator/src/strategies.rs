//! Element location strategies
//!
//! A strategy pairs one element source with, optionally, one detector and
//! handles a single element kind:
//! 1. XPath - native lookup through the source
//! 2. Text element - native lookup of visible text through the source
//! 3. Text detection - OCR over a frame captured by the source
//! 4. Image detection - template matching over a frame captured by the source

use std::sync::Arc;

use optics_core_types::{ElementKind, LocationResult, StrategyKind, StrategyTag};
use tracing::debug;

use crate::errors::BackendError;
use crate::ports::{ElementSource, ImageDetector, TextDetector};

/// One way of locating an element.
pub trait LocateStrategy: Send + Sync {
    fn tag(&self) -> StrategyTag;

    /// Whether this strategy can handle the element kind at all.
    fn supports(&self, kind: ElementKind) -> bool;

    /// Try to locate the element. `Ok(None)` is a clean miss.
    fn locate(&self, element: &str) -> Result<Option<LocationResult>, BackendError>;
}

/// XPath lookup through an element source
pub struct XPathStrategy {
    source: Arc<dyn ElementSource>,
}

impl XPathStrategy {
    pub fn new(source: Arc<dyn ElementSource>) -> Self {
        Self { source }
    }
}

impl LocateStrategy for XPathStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::new(StrategyKind::XPath, self.source.name())
    }

    fn supports(&self, kind: ElementKind) -> bool {
        kind == ElementKind::XPath
    }

    fn locate(&self, element: &str) -> Result<Option<LocationResult>, BackendError> {
        debug!(source = self.source.name(), "resolving xpath: {}", element);
        Ok(self
            .source
            .locate(element, None)?
            .map(LocationResult::Element))
    }
}

/// Visible-text lookup through an element source
pub struct TextElementStrategy {
    source: Arc<dyn ElementSource>,
}

impl TextElementStrategy {
    pub fn new(source: Arc<dyn ElementSource>) -> Self {
        Self { source }
    }
}

impl LocateStrategy for TextElementStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::new(StrategyKind::TextElement, self.source.name())
    }

    fn supports(&self, kind: ElementKind) -> bool {
        kind == ElementKind::Text
    }

    fn locate(&self, element: &str) -> Result<Option<LocationResult>, BackendError> {
        debug!(source = self.source.name(), "resolving text element: {}", element);
        Ok(self
            .source
            .locate(element, None)?
            .map(LocationResult::Element))
    }
}

/// OCR over a captured frame
pub struct TextDetectionStrategy {
    source: Arc<dyn ElementSource>,
    detector: Arc<dyn TextDetector>,
}

impl TextDetectionStrategy {
    pub fn new(source: Arc<dyn ElementSource>, detector: Arc<dyn TextDetector>) -> Self {
        Self { source, detector }
    }
}

impl LocateStrategy for TextDetectionStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::new(StrategyKind::TextDetection, self.source.name())
            .with_detector(self.detector.name())
    }

    fn supports(&self, kind: ElementKind) -> bool {
        kind == ElementKind::Text
    }

    fn locate(&self, element: &str) -> Result<Option<LocationResult>, BackendError> {
        let Some(frame) = self.source.capture()? else {
            debug!(source = self.source.name(), "no frame captured");
            return Ok(None);
        };
        let detection = self.detector.find_element(&frame, element, None)?;
        Ok(detection.location().map(LocationResult::Coordinates))
    }
}

/// Template matching over a captured frame
pub struct ImageDetectionStrategy {
    source: Arc<dyn ElementSource>,
    detector: Arc<dyn ImageDetector>,
}

impl ImageDetectionStrategy {
    pub fn new(source: Arc<dyn ElementSource>, detector: Arc<dyn ImageDetector>) -> Self {
        Self { source, detector }
    }
}

impl LocateStrategy for ImageDetectionStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::new(StrategyKind::ImageDetection, self.source.name())
            .with_detector(self.detector.name())
    }

    fn supports(&self, kind: ElementKind) -> bool {
        kind == ElementKind::Image
    }

    fn locate(&self, element: &str) -> Result<Option<LocationResult>, BackendError> {
        let Some(frame) = self.source.capture()? else {
            debug!(source = self.source.name(), "no frame captured");
            return Ok(None);
        };
        let detection = self.detector.find_element(&frame, element, None)?;
        Ok(detection.location().map(LocationResult::Coordinates))
    }
}
