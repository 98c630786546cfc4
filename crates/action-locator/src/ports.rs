//! Capability ports implemented by concrete backends.
//!
//! The locator never branches on backend type: element sources, drivers and
//! detectors are held as trait objects and every capability a backend does
//! not implement falls back to [`BackendError::Unsupported`].

use std::time::Duration;

use optics_core_types::{
    Detection, Direction, ElementHandle, Frame, LocationResult, MatchRule, Point, TextBlock,
};

use crate::errors::BackendError;

/// Something that can observe the screen: a page-source parser, a
/// screenshot grabber, a camera feed.
pub trait ElementSource: Send + Sync {
    fn name(&self) -> &str;

    /// Grab the current screen. `Ok(None)` when nothing could be captured.
    fn capture(&self) -> Result<Option<Frame>, BackendError> {
        Err(BackendError::unsupported(self.name(), "capture"))
    }

    /// Find a driver-native element by text or XPath.
    fn locate(
        &self,
        element: &str,
        index: Option<usize>,
    ) -> Result<Option<ElementHandle>, BackendError> {
        let _ = (element, index);
        Err(BackendError::unsupported(self.name(), "locate"))
    }

    fn locate_using_index(
        &self,
        element: &str,
        index: usize,
    ) -> Result<Option<LocationResult>, BackendError> {
        let _ = (element, index);
        Err(BackendError::unsupported(self.name(), "locate_using_index"))
    }

    /// Check element presence, returning the verdict and the epoch second at
    /// which it was reached.
    fn assert_elements(
        &self,
        elements: &[String],
        timeout: Duration,
        rule: MatchRule,
    ) -> Result<(bool, f64), BackendError> {
        let _ = (elements, timeout, rule);
        Err(BackendError::unsupported(self.name(), "assert_elements"))
    }

    fn get_interactive_elements(&self) -> Result<Vec<ElementHandle>, BackendError> {
        Err(BackendError::unsupported(self.name(), "get_interactive_elements"))
    }
}

/// Input driver for a device or browser session.
///
/// Every method takes an optional event name used by telemetry to correlate
/// the interaction with a user-level step.
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn press_element(
        &self,
        element: &ElementHandle,
        repeat: u32,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        let _ = (element, repeat, event);
        Err(BackendError::unsupported(self.name(), "press_element"))
    }

    fn press_coordinates(&self, point: Point, event: Option<&str>) -> Result<(), BackendError> {
        let _ = (point, event);
        Err(BackendError::unsupported(self.name(), "press_coordinates"))
    }

    /// Press at a position given as fractions of the screen size.
    fn press_percentage_coordinates(
        &self,
        percent_x: f64,
        percent_y: f64,
        repeat: u32,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        let _ = (percent_x, percent_y, repeat, event);
        Err(BackendError::unsupported(self.name(), "press_percentage_coordinates"))
    }

    fn swipe(
        &self,
        start: Point,
        direction: Direction,
        length: i32,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        let _ = (start, direction, length, event);
        Err(BackendError::unsupported(self.name(), "swipe"))
    }

    /// Swipe starting at a position given as percentages of the screen size.
    fn swipe_percentage(
        &self,
        percent_x: f64,
        percent_y: f64,
        direction: Direction,
        length_percent: f64,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        let _ = (percent_x, percent_y, direction, length_percent, event);
        Err(BackendError::unsupported(self.name(), "swipe_percentage"))
    }

    fn swipe_element(
        &self,
        element: &ElementHandle,
        direction: Direction,
        length: i32,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        let _ = (element, direction, length, event);
        Err(BackendError::unsupported(self.name(), "swipe_element"))
    }

    fn scroll(
        &self,
        direction: Direction,
        duration_ms: u32,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        let _ = (direction, duration_ms, event);
        Err(BackendError::unsupported(self.name(), "scroll"))
    }

    /// Type into whatever currently has focus.
    fn enter_text(&self, text: &str, event: Option<&str>) -> Result<(), BackendError> {
        let _ = (text, event);
        Err(BackendError::unsupported(self.name(), "enter_text"))
    }

    fn enter_text_element(
        &self,
        element: &ElementHandle,
        text: &str,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        let _ = (element, text, event);
        Err(BackendError::unsupported(self.name(), "enter_text_element"))
    }

    fn press_keycode(&self, keycode: &str, event: Option<&str>) -> Result<(), BackendError> {
        let _ = (keycode, event);
        Err(BackendError::unsupported(self.name(), "press_keycode"))
    }

    fn clear_text(&self, event: Option<&str>) -> Result<(), BackendError> {
        let _ = event;
        Err(BackendError::unsupported(self.name(), "clear_text"))
    }

    fn clear_text_element(
        &self,
        element: &ElementHandle,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        let _ = (element, event);
        Err(BackendError::unsupported(self.name(), "clear_text_element"))
    }

    fn get_text_element(&self, element: &ElementHandle) -> Result<String, BackendError> {
        let _ = element;
        Err(BackendError::unsupported(self.name(), "get_text_element"))
    }

    /// End the driver session. Called once when a session closes.
    fn terminate(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// OCR backend.
pub trait TextDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Look for `text` in the frame; `index` selects among repeated matches.
    fn find_element(
        &self,
        frame: &Frame,
        text: &str,
        index: Option<usize>,
    ) -> Result<Detection, BackendError>;

    fn element_exist(&self, frame: &Frame, text: &str) -> Result<Option<Point>, BackendError> {
        Ok(self.find_element(frame, text, None)?.location())
    }

    /// Full text of the frame plus the individual recognised blocks.
    fn detect_text(&self, frame: &Frame) -> Result<(String, Vec<TextBlock>), BackendError> {
        let _ = frame;
        Err(BackendError::unsupported(self.name(), "detect_text"))
    }
}

/// Template matching backend.
pub trait ImageDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Look for the template stored at `reference` in the frame.
    fn find_element(
        &self,
        frame: &Frame,
        reference: &str,
        index: Option<usize>,
    ) -> Result<Detection, BackendError>;

    fn element_exist(&self, frame: &Frame, reference: &str) -> Result<Option<Point>, BackendError> {
        Ok(self.find_element(frame, reference, None)?.location())
    }

    fn detect_text(&self, frame: &Frame) -> Result<(String, Vec<TextBlock>), BackendError> {
        let _ = frame;
        Err(BackendError::unsupported(self.name(), "detect_text"))
    }
}
