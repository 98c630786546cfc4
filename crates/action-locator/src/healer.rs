//! Self-healing action pipeline
//!
//! Every element-taking action runs through the same ordered stages:
//! diagnostic capture, strategy resolution, invocation against each candidate
//! in turn, and outcome recording. The first candidate the action accepts
//! wins; later strategies are never consulted for that call.

use std::sync::Arc;

use optics_core_types::Frame;
use tracing::{debug, error, info, warn};

use crate::errors::{ActionError, BackendError};
use crate::resolver::{Located, StrategyManager};

/// Receives the frame captured before an action resolves its element.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, action: &str, frame: &Frame) -> Result<(), BackendError>;
}

/// Why one candidate did not serve an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateError {
    /// The candidate's location kind cannot serve this action; move on
    /// without counting it as a backend failure.
    Skip(String),
    Backend(BackendError),
}

impl From<BackendError> for CandidateError {
    fn from(err: BackendError) -> Self {
        CandidateError::Backend(err)
    }
}

pub struct SelfHealer {
    manager: Arc<StrategyManager>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
}

impl SelfHealer {
    pub fn new(manager: Arc<StrategyManager>) -> Self {
        Self {
            manager,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn manager(&self) -> &Arc<StrategyManager> {
        &self.manager
    }

    /// Capture a diagnostic frame for `action`. Never fails.
    pub fn capture_diagnostic(&self, action: &str) {
        let Some(sink) = &self.diagnostics else {
            return;
        };
        let Some(frame) = self.manager.capture_frame() else {
            debug!(action, "no frame available for diagnostics");
            return;
        };
        if let Err(err) = sink.record(action, &frame) {
            warn!(action, "diagnostic capture failed: {err}");
        }
    }

    /// Run `invoke` against each located candidate of `element` until one
    /// succeeds.
    ///
    /// An unsupported operation ends the run at once with that error: the
    /// capability gap is the driver's, so every further candidate would
    /// repeat the same side effects and fail the same way.
    pub fn run<T, E, F>(&self, action: &str, element: &str, mut invoke: F) -> Result<T, ActionError>
    where
        E: Into<CandidateError>,
        F: FnMut(&Located) -> Result<T, E>,
    {
        self.capture_diagnostic(action);

        let mut last: Option<BackendError> = None;
        let mut attempts = 0usize;
        for candidate in self.manager.locate(element) {
            attempts += 1;
            match invoke(&candidate).map_err(Into::into) {
                Ok(value) => {
                    if attempts > 1 {
                        info!(
                            action,
                            element,
                            strategy = %candidate.strategy,
                            attempts,
                            "action healed by fallback strategy"
                        );
                    } else {
                        debug!(action, element, strategy = %candidate.strategy, "action succeeded");
                    }
                    return Ok(value);
                }
                Err(CandidateError::Skip(reason)) => {
                    debug!(action, element, strategy = %candidate.strategy, "candidate skipped: {reason}");
                }
                Err(CandidateError::Backend(err)) if err.is_unsupported() => {
                    error!(
                        action,
                        element,
                        strategy = %candidate.strategy,
                        "action not supported: {err}"
                    );
                    return Err(ActionError::Backend(err));
                }
                Err(CandidateError::Backend(err)) => {
                    error!(
                        action,
                        element,
                        strategy = %candidate.strategy,
                        "action failed: {err}"
                    );
                    last = Some(err);
                }
            }
        }

        warn!(action, element, attempts, "all strategies exhausted");
        Err(ActionError::StrategyExhausted {
            element: element.to_string(),
            action: action.to_string(),
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ElementSource;
    use optics_core_types::ElementHandle;
    use parking_lot::Mutex;

    struct Screen;

    impl ElementSource for Screen {
        fn name(&self) -> &str {
            "screen"
        }

        fn capture(&self) -> Result<Option<Frame>, BackendError> {
            Ok(Some(Frame::new(1, 1, vec![7u8])))
        }

        fn locate(
            &self,
            _element: &str,
            _index: Option<usize>,
        ) -> Result<Option<ElementHandle>, BackendError> {
            Ok(Some(ElementHandle::new("only")))
        }
    }

    #[derive(Default)]
    struct BrokenSink {
        calls: Mutex<Vec<String>>,
    }

    impl DiagnosticSink for BrokenSink {
        fn record(&self, action: &str, _frame: &Frame) -> Result<(), BackendError> {
            self.calls.lock().push(action.to_string());
            Err(BackendError::failed("disk", "full"))
        }
    }

    #[test]
    fn diagnostic_failures_never_fail_the_action() {
        let manager = Arc::new(StrategyManager::new(vec![Arc::new(Screen)], Vec::new(), Vec::new()));
        let sink = Arc::new(BrokenSink::default());
        let healer = SelfHealer::new(manager).with_diagnostics(sink.clone());

        let value = healer
            .run("get_text", "Welcome", |located| {
                Ok::<_, BackendError>(located.value.as_element().map(|handle| handle.id.clone()))
            })
            .unwrap();
        assert_eq!(value.as_deref(), Some("only"));
        assert_eq!(*sink.calls.lock(), vec!["get_text"]);
    }

    #[test]
    fn nothing_located_is_still_one_aggregated_error() {
        let manager = Arc::new(StrategyManager::new(Vec::new(), Vec::new(), Vec::new()));
        let healer = SelfHealer::new(manager);
        let err = healer
            .run("press_element", "Ghost", |_| Ok::<_, BackendError>(())).unwrap_err();
        match err {
            ActionError::StrategyExhausted { element, last, .. } => {
                assert_eq!(element, "Ghost");
                assert!(last.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
