//! Presence checks over element sources

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use optics_core_types::MatchRule;
use tracing::{debug, warn};

use crate::errors::ActionError;
use crate::resolver::{Located, StrategyManager};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct Verifier {
    manager: Arc<StrategyManager>,
    poll: Duration,
}

impl Verifier {
    pub fn new(manager: Arc<StrategyManager>) -> Self {
        Self {
            manager,
            poll: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Check whether `elements` are present under `rule` within `timeout`.
    ///
    /// The first element source that implements its own presence check
    /// decides. Without one, the strategies are polled until the rule holds
    /// or the timeout expires.
    pub fn assert_presence(
        &self,
        elements: &[String],
        timeout: Duration,
        rule: MatchRule,
    ) -> Result<bool, ActionError> {
        if elements.is_empty() {
            return Err(ActionError::invalid("assert_presence needs at least one element"));
        }

        for source in self.manager.sources() {
            match source.assert_elements(elements, timeout, rule) {
                Ok((found, at)) => {
                    debug!(source = source.name(), found, at, "presence asserted by source");
                    return Ok(found);
                }
                Err(err) if err.is_unsupported() => {}
                Err(err) => warn!(source = source.name(), "presence check failed: {err}"),
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            let verdict = match rule {
                MatchRule::Any => elements.iter().any(|element| self.is_present(element)),
                MatchRule::All => elements.iter().all(|element| self.is_present(element)),
            };
            if verdict {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(?elements, ?rule, "elements not present before timeout");
                return Ok(false);
            }
            thread::sleep(self.poll.min(deadline - now));
        }
    }

    /// Single pass over the strategies.
    pub fn is_present(&self, element: &str) -> bool {
        self.manager.locate(element).next().is_some()
    }

    /// Poll until `element` is located, or fail with a timeout.
    pub fn wait_for_element(&self, element: &str, timeout: Duration) -> Result<Located, ActionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(located) = self.manager.locate(element).next() {
                return Ok(located);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ActionError::Timeout {
                    what: element.to_string(),
                    timeout,
                });
            }
            thread::sleep(self.poll.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendError;
    use crate::ports::ElementSource;
    use optics_core_types::ElementHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Element appears after a number of lookups.
    struct Eventually {
        after: usize,
        lookups: AtomicUsize,
    }

    impl ElementSource for Eventually {
        fn name(&self) -> &str {
            "eventually"
        }

        fn locate(
            &self,
            element: &str,
            _index: Option<usize>,
        ) -> Result<Option<ElementHandle>, BackendError> {
            let seen = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((element == "Home" && seen > self.after).then(|| ElementHandle::new("home")))
        }
    }

    struct Decides;

    impl ElementSource for Decides {
        fn name(&self) -> &str {
            "decides"
        }

        fn assert_elements(
            &self,
            elements: &[String],
            _timeout: Duration,
            rule: MatchRule,
        ) -> Result<(bool, f64), BackendError> {
            Ok((rule == MatchRule::All && elements.len() == 2, 1.0))
        }
    }

    fn verifier(source: Arc<dyn ElementSource>) -> Verifier {
        let manager = Arc::new(StrategyManager::new(vec![source], Vec::new(), Vec::new()));
        Verifier::new(manager).with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn wait_polls_until_element_appears() {
        let verifier = verifier(Arc::new(Eventually {
            after: 2,
            lookups: AtomicUsize::new(0),
        }));
        let located = verifier.wait_for_element("Home", Duration::from_secs(2)).unwrap();
        assert_eq!(located.value.as_element().map(|h| h.id.as_str()), Some("home"));
    }

    #[test]
    fn wait_times_out() {
        let verifier = verifier(Arc::new(Eventually {
            after: usize::MAX,
            lookups: AtomicUsize::new(0),
        }));
        let err = verifier
            .wait_for_element("Home", Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, ActionError::Timeout { .. }));
    }

    #[test]
    fn source_presence_check_takes_precedence() {
        let verifier = verifier(Arc::new(Decides));
        let elements = vec!["A".to_string(), "B".to_string()];
        assert!(verifier
            .assert_presence(&elements, Duration::from_millis(10), MatchRule::All)
            .unwrap());
        assert!(!verifier
            .assert_presence(&elements, Duration::from_millis(10), MatchRule::Any)
            .unwrap());
    }

    #[test]
    fn fallback_rule_any_versus_all() {
        let verifier = verifier(Arc::new(Eventually {
            after: 0,
            lookups: AtomicUsize::new(0),
        }));
        let elements = vec!["Home".to_string(), "Away".to_string()];
        assert!(verifier
            .assert_presence(&elements, Duration::from_millis(10), MatchRule::Any)
            .unwrap());
        assert!(!verifier
            .assert_presence(&elements, Duration::from_millis(10), MatchRule::All)
            .unwrap());
        assert!(verifier
            .assert_presence(&[], Duration::from_millis(10), MatchRule::Any)
            .is_err());
    }
}
