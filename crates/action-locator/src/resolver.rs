//! Strategy manager: lazy, ordered resolution across every enabled strategy

use std::slice;
use std::sync::Arc;

use optics_core_types::{ElementKind, Frame, LocationResult, StrategyKind, StrategyTag};
use tracing::{debug, warn};

use crate::errors::{BackendError, LocatorError};
use crate::ports::{ElementSource, ImageDetector, TextDetector};
use crate::strategies::{
    ImageDetectionStrategy, LocateStrategy, TextDetectionStrategy, TextElementStrategy,
    XPathStrategy,
};

/// A location result together with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub strategy: StrategyTag,
    pub value: LocationResult,
}

/// Holds the strategies built from the enabled backends, in priority order.
///
/// For every element source, in configuration order, the native lookups come
/// first, then OCR through each text detector, then template matching through
/// each image detector.
pub struct StrategyManager {
    sources: Vec<Arc<dyn ElementSource>>,
    text_detectors: Vec<Arc<dyn TextDetector>>,
    image_detectors: Vec<Arc<dyn ImageDetector>>,
    strategies: Vec<Arc<dyn LocateStrategy>>,
}

impl StrategyManager {
    pub fn new(
        sources: Vec<Arc<dyn ElementSource>>,
        text_detectors: Vec<Arc<dyn TextDetector>>,
        image_detectors: Vec<Arc<dyn ImageDetector>>,
    ) -> Self {
        let mut strategies: Vec<Arc<dyn LocateStrategy>> = Vec::new();
        for source in &sources {
            strategies.push(Arc::new(XPathStrategy::new(Arc::clone(source))));
            strategies.push(Arc::new(TextElementStrategy::new(Arc::clone(source))));
            for detector in &text_detectors {
                strategies.push(Arc::new(TextDetectionStrategy::new(
                    Arc::clone(source),
                    Arc::clone(detector),
                )));
            }
            for detector in &image_detectors {
                strategies.push(Arc::new(ImageDetectionStrategy::new(
                    Arc::clone(source),
                    Arc::clone(detector),
                )));
            }
        }
        debug!(count = strategies.len(), "strategy manager built");
        Self {
            sources,
            text_detectors,
            image_detectors,
            strategies,
        }
    }

    /// Use an explicit strategy list instead of the derived ordering.
    pub fn with_strategies(
        sources: Vec<Arc<dyn ElementSource>>,
        strategies: Vec<Arc<dyn LocateStrategy>>,
    ) -> Self {
        Self {
            sources,
            text_detectors: Vec::new(),
            image_detectors: Vec::new(),
            strategies,
        }
    }

    pub fn strategies(&self) -> &[Arc<dyn LocateStrategy>] {
        &self.strategies
    }

    pub fn sources(&self) -> &[Arc<dyn ElementSource>] {
        &self.sources
    }

    /// Lazily yield every successful location of `element`.
    ///
    /// Each call starts a fresh pass. Strategies run only as the sequence is
    /// consumed, so a caller that stops after the first usable result never
    /// pays for the rest. Strategy errors are logged and count as a miss.
    pub fn locate<'a>(&'a self, element: &'a str) -> Locate<'a> {
        let kind = ElementKind::classify(element);
        debug!(element, kind = kind.name(), "locating element");
        Locate {
            element,
            kind,
            remaining: self.strategies.iter(),
        }
    }

    /// Locate the `index`-th occurrence of a text or image element.
    pub fn locate_with_index(&self, element: &str, index: usize) -> Result<Located, LocatorError> {
        if element.trim().is_empty() {
            return Err(LocatorError::InvalidElement("empty element".into()));
        }
        let kind = ElementKind::classify(element);
        let mut last: Option<BackendError> = None;

        match kind {
            ElementKind::XPath => {
                return Err(LocatorError::IndexUnsupported {
                    element: element.to_string(),
                    kind: kind.name(),
                })
            }
            ElementKind::Text => {
                for source in &self.sources {
                    match source.locate_using_index(element, index) {
                        Ok(Some(value)) => {
                            return Ok(Located {
                                strategy: StrategyTag::new(StrategyKind::TextElement, source.name()),
                                value,
                            })
                        }
                        Ok(None) => {}
                        Err(err) if err.is_unsupported() => {}
                        Err(err) => last = Some(err),
                    }
                    for detector in &self.text_detectors {
                        let found = source.capture().and_then(|frame| match frame {
                            Some(frame) => detector.find_element(&frame, element, Some(index)),
                            None => Ok(Default::default()),
                        });
                        match found.map(|detection| detection.location()) {
                            Ok(Some(point)) => {
                                return Ok(Located {
                                    strategy: StrategyTag::new(
                                        StrategyKind::TextDetection,
                                        source.name(),
                                    )
                                    .with_detector(detector.name()),
                                    value: LocationResult::Coordinates(point),
                                })
                            }
                            Ok(None) => {}
                            Err(err) => last = Some(err),
                        }
                    }
                }
            }
            ElementKind::Image => {
                for source in &self.sources {
                    for detector in &self.image_detectors {
                        let found = source.capture().and_then(|frame| match frame {
                            Some(frame) => detector.find_element(&frame, element, Some(index)),
                            None => Ok(Default::default()),
                        });
                        match found.map(|detection| detection.location()) {
                            Ok(Some(point)) => {
                                return Ok(Located {
                                    strategy: StrategyTag::new(
                                        StrategyKind::ImageDetection,
                                        source.name(),
                                    )
                                    .with_detector(detector.name()),
                                    value: LocationResult::Coordinates(point),
                                })
                            }
                            Ok(None) => {}
                            Err(err) => last = Some(err),
                        }
                    }
                }
            }
        }

        match last {
            Some(err) if !err.is_unsupported() => Err(err.into()),
            _ => Err(LocatorError::NotFound(format!("{element} (index {index})"))),
        }
    }

    /// First frame any source can capture. Best-effort: failures are logged.
    pub fn capture_frame(&self) -> Option<Frame> {
        for source in &self.sources {
            match source.capture() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(err) if err.is_unsupported() => {}
                Err(err) => debug!(source = source.name(), "capture failed: {err}"),
            }
        }
        None
    }
}

/// Lazy sequence returned by [`StrategyManager::locate`].
pub struct Locate<'a> {
    element: &'a str,
    kind: ElementKind,
    remaining: slice::Iter<'a, Arc<dyn LocateStrategy>>,
}

impl Iterator for Locate<'_> {
    type Item = Located;

    fn next(&mut self) -> Option<Self::Item> {
        for strategy in self.remaining.by_ref() {
            if !strategy.supports(self.kind) {
                continue;
            }
            let tag = strategy.tag();
            match strategy.locate(self.element) {
                Ok(Some(value)) => {
                    debug!(element = self.element, strategy = %tag, "located {}", value);
                    return Some(Located {
                        strategy: tag,
                        value,
                    });
                }
                Ok(None) => debug!(element = self.element, strategy = %tag, "no match"),
                Err(err) if err.is_unsupported() => {
                    debug!(element = self.element, strategy = %tag, "skipped: {err}")
                }
                Err(err) => warn!(element = self.element, strategy = %tag, "strategy failed: {err}"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optics_core_types::{Detection, ElementHandle, Point};
    use parking_lot::Mutex;

    /// Source that records every call and answers from a fixed table.
    struct ScriptedSource {
        name: &'static str,
        handles: Vec<&'static str>,
        calls: Arc<Mutex<Vec<String>>>,
        broken: bool,
    }

    impl ElementSource for ScriptedSource {
        fn name(&self) -> &str {
            self.name
        }

        fn capture(&self) -> Result<Option<Frame>, BackendError> {
            self.calls.lock().push(format!("{}:capture", self.name));
            Ok(Some(Frame::new(2, 2, vec![0u8; 4])))
        }

        fn locate(
            &self,
            element: &str,
            _index: Option<usize>,
        ) -> Result<Option<ElementHandle>, BackendError> {
            self.calls.lock().push(format!("{}:locate", self.name));
            if self.broken {
                return Err(BackendError::failed(self.name, "session lost"));
            }
            Ok(self
                .handles
                .contains(&element)
                .then(|| ElementHandle::new(format!("{}-{element}", self.name))))
        }
    }

    struct Templates;

    impl ImageDetector for Templates {
        fn name(&self) -> &str {
            "templates"
        }

        fn find_element(
            &self,
            _frame: &Frame,
            reference: &str,
            index: Option<usize>,
        ) -> Result<Detection, BackendError> {
            if reference.ends_with("login.png") {
                let offset = index.unwrap_or(0) as i32 * 100;
                Ok(Detection::at(Point::new(50 + offset, 60), None))
            } else {
                Ok(Detection::not_found())
            }
        }
    }

    fn source(
        name: &'static str,
        handles: Vec<&'static str>,
        calls: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn ElementSource> {
        Arc::new(ScriptedSource {
            name,
            handles,
            calls: Arc::clone(calls),
            broken: false,
        })
    }

    #[test]
    fn yields_every_success_in_configuration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let manager = StrategyManager::new(
            vec![
                source("first", vec!["Submit"], &calls),
                source("second", vec!["Submit"], &calls),
            ],
            Vec::new(),
            Vec::new(),
        );

        let found: Vec<Located> = manager.locate("Submit").collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].strategy.source, "first");
        assert_eq!(found[1].strategy.source, "second");
    }

    #[test]
    fn sequence_is_lazy() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let manager = StrategyManager::new(
            vec![
                source("first", vec!["Submit"], &calls),
                source("second", vec!["Submit"], &calls),
            ],
            Vec::new(),
            Vec::new(),
        );

        let first = manager.locate("Submit").next();
        assert!(first.is_some());
        assert_eq!(*calls.lock(), vec!["first:locate"]);
    }

    #[test]
    fn failing_strategy_is_a_miss() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let broken: Arc<dyn ElementSource> = Arc::new(ScriptedSource {
            name: "broken",
            handles: vec!["//button"],
            calls: Arc::clone(&calls),
            broken: true,
        });
        let manager = StrategyManager::new(
            vec![broken, source("healthy", vec!["//button"], &calls)],
            Vec::new(),
            Vec::new(),
        );

        let found: Vec<Located> = manager.locate("//button").collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].strategy.kind, StrategyKind::XPath);
        assert_eq!(found[0].strategy.source, "healthy");
    }

    #[test]
    fn image_elements_only_reach_image_strategies() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let manager = StrategyManager::new(
            vec![source("screen", Vec::new(), &calls)],
            Vec::new(),
            vec![Arc::new(Templates)],
        );

        let found: Vec<Located> = manager.locate("assets/login.png").collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, LocationResult::Coordinates(Point::new(50, 60)));
        assert_eq!(*calls.lock(), vec!["screen:capture"]);
        assert_eq!(manager.locate("assets/other.png").count(), 0);
    }

    #[test]
    fn indexed_lookup_rejects_xpath() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let manager = StrategyManager::new(
            vec![source("screen", Vec::new(), &calls)],
            Vec::new(),
            vec![Arc::new(Templates)],
        );

        assert!(matches!(
            manager.locate_with_index("//a", 1),
            Err(LocatorError::IndexUnsupported { .. })
        ));
        let located = manager.locate_with_index("login.png", 2).unwrap();
        assert_eq!(located.value, LocationResult::Coordinates(Point::new(250, 60)));
        assert!(matches!(
            manager.locate_with_index("Missing", 0),
            Err(LocatorError::NotFound(_))
        ));
    }
}
