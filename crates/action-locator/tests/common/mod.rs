//! Scripted backends shared by the locator integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use optics_core_types::{Detection, Direction, ElementHandle, Frame, Point};
use optics_locator::{BackendError, Driver, ElementSource, ImageDetector, TextDetector};
use parking_lot::Mutex;

/// Driver that records every call. Element handles listed in `rejected`
/// fail, as do coordinate calls when `reject_coordinates` is set.
#[derive(Default)]
pub struct RecordingDriver {
    pub calls: Mutex<Vec<String>>,
    pub rejected: HashSet<String>,
    pub reject_coordinates: bool,
    pub texts: HashMap<String, String>,
    pub coordinates_only: bool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, handle: &str) -> Self {
        self.rejected.insert(handle.to_string());
        self
    }

    pub fn rejecting_coordinates(mut self) -> Self {
        self.reject_coordinates = true;
        self
    }

    pub fn coordinates_only(mut self) -> Self {
        self.coordinates_only = true;
        self
    }

    pub fn with_text(mut self, handle: &str, text: &str) -> Self {
        self.texts.insert(handle.to_string(), text.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn element_call(&self, call: &str, element: &ElementHandle) -> Result<(), BackendError> {
        if self.coordinates_only {
            return Err(BackendError::unsupported("recording", "element calls"));
        }
        self.record(format!("{call}:{}", element.id));
        if self.rejected.contains(&element.id) {
            return Err(BackendError::failed("recording", format!("stale element {}", element.id)));
        }
        Ok(())
    }

    fn point_call(&self, call: &str, point: Point) -> Result<(), BackendError> {
        self.record(format!("{call}:{point}"));
        if self.reject_coordinates {
            return Err(BackendError::failed("recording", format!("tap at {point} missed")));
        }
        Ok(())
    }
}

impl Driver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn press_element(
        &self,
        element: &ElementHandle,
        _repeat: u32,
        _event: Option<&str>,
    ) -> Result<(), BackendError> {
        self.element_call("press_element", element)
    }

    fn press_coordinates(&self, point: Point, _event: Option<&str>) -> Result<(), BackendError> {
        self.point_call("press_coordinates", point)
    }

    fn swipe(
        &self,
        start: Point,
        direction: Direction,
        _length: i32,
        _event: Option<&str>,
    ) -> Result<(), BackendError> {
        self.point_call(&format!("swipe_{direction}"), start)
    }

    fn swipe_percentage(
        &self,
        _percent_x: f64,
        _percent_y: f64,
        direction: Direction,
        _length_percent: f64,
        _event: Option<&str>,
    ) -> Result<(), BackendError> {
        self.record(format!("swipe_percentage:{direction}"));
        Ok(())
    }

    fn scroll(
        &self,
        direction: Direction,
        _duration_ms: u32,
        _event: Option<&str>,
    ) -> Result<(), BackendError> {
        self.record(format!("scroll:{direction}"));
        Ok(())
    }

    fn enter_text(&self, text: &str, _event: Option<&str>) -> Result<(), BackendError> {
        self.record(format!("enter_text:{text}"));
        Ok(())
    }

    fn enter_text_element(
        &self,
        element: &ElementHandle,
        text: &str,
        _event: Option<&str>,
    ) -> Result<(), BackendError> {
        self.element_call(&format!("enter_text_element[{text}]"), element)
    }

    fn get_text_element(&self, element: &ElementHandle) -> Result<String, BackendError> {
        self.element_call("get_text_element", element)?;
        Ok(self.texts.get(&element.id).cloned().unwrap_or_default())
    }
}

/// Element source answering native lookups from a table and, optionally,
/// capturing frames.
pub struct ScriptedSource {
    pub name: &'static str,
    pub handles: HashMap<String, String>,
    pub captures: bool,
}

impl ScriptedSource {
    pub fn native(name: &'static str, handles: &[(&str, &str)]) -> Self {
        Self {
            name,
            handles: handles
                .iter()
                .map(|(element, handle)| (element.to_string(), handle.to_string()))
                .collect(),
            captures: false,
        }
    }

    pub fn screen(name: &'static str) -> Self {
        Self {
            name,
            handles: HashMap::new(),
            captures: true,
        }
    }
}

impl ElementSource for ScriptedSource {
    fn name(&self) -> &str {
        self.name
    }

    fn capture(&self) -> Result<Option<Frame>, BackendError> {
        if !self.captures {
            return Err(BackendError::unsupported(self.name, "capture"));
        }
        Ok(Some(Frame::new(1080, 1920, vec![0u8; 8])))
    }

    fn locate(
        &self,
        element: &str,
        _index: Option<usize>,
    ) -> Result<Option<ElementHandle>, BackendError> {
        if self.captures {
            return Err(BackendError::unsupported(self.name, "locate"));
        }
        Ok(self.handles.get(element).map(ElementHandle::new))
    }
}

/// Detector answering from a table of references to centers.
pub struct ScriptedDetector {
    pub name: &'static str,
    pub hits: HashMap<String, Point>,
}

impl ScriptedDetector {
    pub fn new(name: &'static str, hits: &[(&str, Point)]) -> Self {
        Self {
            name,
            hits: hits
                .iter()
                .map(|(reference, point)| (reference.to_string(), *point))
                .collect(),
        }
    }

    fn detect(&self, reference: &str) -> Detection {
        match self.hits.get(reference) {
            Some(point) => Detection::at(*point, None),
            None => Detection::not_found(),
        }
    }
}

impl TextDetector for ScriptedDetector {
    fn name(&self) -> &str {
        self.name
    }

    fn find_element(
        &self,
        _frame: &Frame,
        text: &str,
        _index: Option<usize>,
    ) -> Result<Detection, BackendError> {
        Ok(self.detect(text))
    }
}

impl ImageDetector for ScriptedDetector {
    fn name(&self) -> &str {
        self.name
    }

    fn find_element(
        &self,
        _frame: &Frame,
        reference: &str,
        _index: Option<usize>,
    ) -> Result<Detection, BackendError> {
        Ok(self.detect(reference))
    }
}

pub fn arc<T: 'static>(value: T) -> Arc<T> {
    Arc::new(value)
}
