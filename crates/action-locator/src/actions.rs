//! High-level action keywords
//!
//! Element-taking actions run through the self-healing pipeline. A located
//! coordinate is acted on through coordinate calls, a located driver element
//! through the element-native calls.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use optics_core_types::{Direction, LocationResult, MatchRule, Point};
use tracing::{debug, info};

use crate::errors::{ActionError, BackendError};
use crate::healer::{CandidateError, DiagnosticSink, SelfHealer};
use crate::ports::Driver;
use crate::resolver::{Located, StrategyManager};
use crate::verifier::Verifier;

const SCROLL_DURATION_MS: u32 = 1000;

/// Pacing of the "until element appears" loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionTiming {
    /// Budget for each presence check inside a loop
    pub presence_timeout: Duration,
    /// Pause after each gesture before checking again
    pub settle: Duration,
    /// Poll interval of presence checks
    pub poll: Duration,
}

impl Default for ActionTiming {
    fn default() -> Self {
        Self {
            presence_timeout: Duration::from_secs(3),
            settle: Duration::from_secs(3),
            poll: Duration::from_millis(500),
        }
    }
}

pub struct ActionKeyword {
    driver: Arc<dyn Driver>,
    healer: SelfHealer,
    verifier: Verifier,
    timing: ActionTiming,
}

impl ActionKeyword {
    pub fn new(driver: Arc<dyn Driver>, manager: Arc<StrategyManager>) -> Self {
        let timing = ActionTiming::default();
        Self {
            driver,
            healer: SelfHealer::new(Arc::clone(&manager)),
            verifier: Verifier::new(manager).with_poll_interval(timing.poll),
            timing,
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.healer = self.healer.with_diagnostics(sink);
        self
    }

    pub fn with_timing(mut self, timing: ActionTiming) -> Self {
        self.verifier = Verifier::new(Arc::clone(self.healer.manager())).with_poll_interval(timing.poll);
        self.timing = timing;
        self
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn healer(&self) -> &SelfHealer {
        &self.healer
    }

    // Press actions

    pub fn press_element(
        &self,
        element: &str,
        repeat: u32,
        offset_x: i32,
        offset_y: i32,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        self.healer.run("press_element", element, |located| match &located.value {
            LocationResult::Coordinates(point) => {
                let target = point.offset(offset_x, offset_y);
                debug!("pressing at coordinates {target}");
                for _ in 0..repeat.max(1) {
                    self.driver.press_coordinates(target, event)?;
                }
                Ok(())
            }
            LocationResult::Element(handle) => {
                debug!("pressing element '{element}'");
                self.driver.press_element(handle, repeat.max(1), event)
            }
        })
    }

    /// Press at a position relative to the screen size. Values above 1 are
    /// read as percentages, values up to 1 as fractions.
    pub fn press_by_percentage(
        &self,
        percent_x: f64,
        percent_y: f64,
        repeat: u32,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        self.healer.capture_diagnostic("press_by_percentage");
        let fx = as_fraction(percent_x)?;
        let fy = as_fraction(percent_y)?;

        match self.driver.press_percentage_coordinates(fx, fy, repeat.max(1), event) {
            Err(err) if err.is_unsupported() => {}
            other => return other.map_err(ActionError::from),
        }

        let frame = self.healer.manager().capture_frame().ok_or_else(|| {
            ActionError::Unsupported(
                "press_by_percentage needs driver support or a capturable screen".into(),
            )
        })?;
        let target = Point::new(
            (f64::from(frame.width) * fx).round() as i32,
            (f64::from(frame.height) * fy).round() as i32,
        );
        debug!("pressing {fx:.2}x{fy:.2} of the screen at {target}");
        for _ in 0..repeat.max(1) {
            self.driver.press_coordinates(target, event)?;
        }
        Ok(())
    }

    pub fn press_by_coordinates(
        &self,
        x: i32,
        y: i32,
        repeat: u32,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        self.healer.capture_diagnostic("press_by_coordinates");
        for _ in 0..repeat.max(1) {
            self.driver.press_coordinates(Point::new(x, y), event)?;
        }
        Ok(())
    }

    /// Press the `index`-th occurrence of a text or image element.
    pub fn press_element_with_index(
        &self,
        element: &str,
        index: usize,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        self.healer.capture_diagnostic("press_element_with_index");
        let located = self.healer.manager().locate_with_index(element, index)?;
        debug!(strategy = %located.strategy, "pressing '{element}' at index {index}");
        match &located.value {
            LocationResult::Coordinates(point) => self.driver.press_coordinates(*point, event)?,
            LocationResult::Element(handle) => self.driver.press_element(handle, 1, event)?,
        }
        Ok(())
    }

    /// Wait for the element, then press it.
    pub fn detect_and_press(
        &self,
        element: &str,
        timeout: Duration,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        let elements = [element.to_string()];
        if !self.verifier.assert_presence(&elements, timeout, MatchRule::Any)? {
            return Err(ActionError::Timeout {
                what: element.to_string(),
                timeout,
            });
        }
        self.healer.run("detect_and_press", element, |located| match &located.value {
            LocationResult::Coordinates(point) => {
                debug!("pressing detected element at {point}");
                self.driver.press_coordinates(*point, event)
            }
            LocationResult::Element(handle) => self.driver.press_element(handle, 1, event),
        })
    }

    // Swipe and scroll actions

    pub fn swipe(
        &self,
        x: i32,
        y: i32,
        direction: Direction,
        length: i32,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        self.healer.capture_diagnostic("swipe");
        self.driver.swipe(Point::new(x, y), direction, length, event)?;
        Ok(())
    }

    pub fn swipe_until_element_appears(
        &self,
        element: &str,
        direction: Direction,
        timeout: Duration,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        self.healer.capture_diagnostic("swipe_until_element_appears");
        self.gesture_until_present(element, timeout, || {
            self.driver.swipe_percentage(10.0, 50.0, direction, 25.0, event)
        })
    }

    pub fn swipe_from_element(
        &self,
        element: &str,
        direction: Direction,
        length: i32,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        self.healer.run("swipe_from_element", element, |located| {
            self.swipe_from(located, direction, length, event)
        })
    }

    pub fn scroll(&self, direction: Direction, event: Option<&str>) -> Result<(), ActionError> {
        self.healer.capture_diagnostic("scroll");
        self.driver.scroll(direction, SCROLL_DURATION_MS, event)?;
        Ok(())
    }

    pub fn scroll_until_element_appears(
        &self,
        element: &str,
        direction: Direction,
        timeout: Duration,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        self.healer.capture_diagnostic("scroll_until_element_appears");
        self.gesture_until_present(element, timeout, || {
            self.driver.scroll(direction, SCROLL_DURATION_MS, event)
        })
    }

    pub fn scroll_from_element(
        &self,
        element: &str,
        direction: Direction,
        length: i32,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        self.healer.run("scroll_from_element", element, |located| {
            self.swipe_from(located, direction, length, event)
        })
    }

    // Text input actions

    pub fn enter_text(&self, element: &str, text: &str, event: Option<&str>) -> Result<(), ActionError> {
        self.healer
            .run("enter_text", element, |located| self.type_into(located, element, text, event))
    }

    pub fn enter_number(
        &self,
        element: &str,
        number: &str,
        event: Option<&str>,
    ) -> Result<(), ActionError> {
        if number.trim().parse::<f64>().is_err() {
            return Err(ActionError::invalid(format!("'{number}' is not a number")));
        }
        let number = number.trim();
        self.healer
            .run("enter_number", element, |located| self.type_into(located, element, number, event))
    }

    pub fn press_keycode(&self, keycode: &str, event: Option<&str>) -> Result<(), ActionError> {
        self.healer.capture_diagnostic("press_keycode");
        self.driver.press_keycode(keycode, event)?;
        Ok(())
    }

    pub fn clear_element_text(&self, element: &str, event: Option<&str>) -> Result<(), ActionError> {
        self.healer.run("clear_element_text", element, |located| match &located.value {
            LocationResult::Coordinates(point) => {
                debug!("clearing text at {point}");
                self.driver.press_coordinates(*point, event)?;
                self.driver.clear_text(event)
            }
            LocationResult::Element(handle) => {
                debug!("clearing text from element '{element}'");
                self.driver.clear_text_element(handle, event)
            }
        })
    }

    /// Read the text of an element. Only driver-native elements carry text,
    /// so vision-located candidates are skipped.
    pub fn get_text(&self, element: &str) -> Result<String, ActionError> {
        let text = self.healer.run("get_text", element, |located| match &located.value {
            LocationResult::Element(handle) => {
                self.driver.get_text_element(handle).map_err(CandidateError::from)
            }
            LocationResult::Coordinates(_) => Err(CandidateError::Skip(format!(
                "{} located coordinates, which carry no text",
                located.strategy
            ))),
        })?;
        info!(element, "read text: {text}");
        Ok(text)
    }

    pub fn sleep(&self, duration: Duration) {
        debug!(?duration, "sleeping");
        thread::sleep(duration);
    }

    fn swipe_from(
        &self,
        located: &Located,
        direction: Direction,
        length: i32,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        match &located.value {
            LocationResult::Coordinates(point) => {
                debug!("swiping from {point}");
                self.driver.swipe(*point, direction, length, event)
            }
            LocationResult::Element(handle) => {
                self.driver.swipe_element(handle, direction, length, event)
            }
        }
    }

    fn type_into(
        &self,
        located: &Located,
        element: &str,
        text: &str,
        event: Option<&str>,
    ) -> Result<(), BackendError> {
        match &located.value {
            LocationResult::Coordinates(point) => {
                debug!("entering text at {point}");
                self.driver.press_coordinates(*point, event)?;
                self.driver.enter_text(text, event)
            }
            LocationResult::Element(handle) => {
                debug!("entering text into element '{element}'");
                self.driver.enter_text_element(handle, text, event)
            }
        }
    }

    fn gesture_until_present<G>(
        &self,
        element: &str,
        timeout: Duration,
        mut gesture: G,
    ) -> Result<(), ActionError>
    where
        G: FnMut() -> Result<(), BackendError>,
    {
        let elements = [element.to_string()];
        let started = Instant::now();
        loop {
            let check = self.timing.presence_timeout.min(timeout);
            if self.verifier.assert_presence(&elements, check, MatchRule::Any)? {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(ActionError::Timeout {
                    what: element.to_string(),
                    timeout,
                });
            }
            gesture()?;
            thread::sleep(self.timing.settle);
        }
    }
}

fn as_fraction(value: f64) -> Result<f64, ActionError> {
    let fraction = if value > 1.0 { value / 100.0 } else { value };
    if !(0.0..=1.0).contains(&fraction) {
        return Err(ActionError::invalid(format!(
            "screen position {value} is outside 0-100%"
        )));
    }
    Ok(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractions_and_percentages() {
        assert_eq!(as_fraction(0.5).unwrap(), 0.5);
        assert_eq!(as_fraction(25.0).unwrap(), 0.25);
        assert!(as_fraction(250.0).is_err());
        assert!(as_fraction(-0.1).is_err());
    }
}
