//! Keyword registry: maps suite keyword names onto action handlers
//!
//! Suites name keywords in prose ("Press Element"); handlers are registered
//! under the normalised form (`press_element`) and receive the raw string
//! parameters of the step.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use optics_core_types::{Direction, MatchRule};
use tracing::info;

use crate::actions::ActionKeyword;
use crate::errors::ActionError;

pub type KeywordHandler = fn(&ActionKeyword, &[String]) -> Result<(), ActionError>;

/// Lower-case, underscore separated form of a keyword name.
pub fn normalize_keyword(name: &str) -> String {
    name.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Clone, Default)]
pub struct KeywordRegistry {
    handlers: HashMap<String, KeywordHandler>,
}

impl KeywordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in action and verifier keyword.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("press_element", press_element);
        registry.register("press_by_percentage", press_by_percentage);
        registry.register("press_by_coordinates", press_by_coordinates);
        registry.register("press_element_with_index", press_element_with_index);
        registry.register("detect_and_press", detect_and_press);
        registry.register("swipe", swipe);
        registry.register("swipe_until_element_appears", swipe_until_element_appears);
        registry.register("swipe_from_element", swipe_from_element);
        registry.register("scroll", scroll);
        registry.register("scroll_until_element_appears", scroll_until_element_appears);
        registry.register("scroll_from_element", scroll_from_element);
        registry.register("enter_text", enter_text);
        registry.register("enter_number", enter_number);
        registry.register("press_keycode", press_keycode);
        registry.register("clear_element_text", clear_element_text);
        registry.register("get_text", get_text);
        registry.register("sleep", sleep);
        registry.register("assert_presence", assert_presence);
        registry.register("wait_for_element", wait_for_element);
        registry
    }

    /// Register a handler; a previous handler under the same name is replaced.
    pub fn register(&mut self, name: &str, handler: KeywordHandler) {
        self.handlers.insert(normalize_keyword(name), handler);
    }

    pub fn get(&self, name: &str) -> Option<KeywordHandler> {
        self.handlers.get(&normalize_keyword(name)).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&normalize_keyword(name))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for KeywordRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordRegistry")
            .field("keywords", &self.names())
            .finish()
    }
}

/// A resolved keyword, ready to be invoked with step parameters.
#[derive(Clone)]
pub struct BoundKeyword {
    name: String,
    handler: KeywordHandler,
    actions: Option<Arc<ActionKeyword>>,
}

impl BoundKeyword {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the keyword is attached to a live session.
    pub fn is_attached(&self) -> bool {
        self.actions.is_some()
    }

    pub fn call(&self, params: &[String]) -> Result<(), ActionError> {
        let Some(actions) = &self.actions else {
            return Err(ActionError::Unsupported(format!(
                "keyword '{}' is not attached to a session",
                self.name
            )));
        };
        (self.handler)(actions, params)
    }
}

impl fmt::Debug for BoundKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundKeyword")
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Keyword lookup for one session. A detached binding resolves names without
/// being able to act, which is all a dry run needs.
#[derive(Clone)]
pub struct KeywordBinding {
    registry: Arc<KeywordRegistry>,
    actions: Option<Arc<ActionKeyword>>,
}

impl KeywordBinding {
    pub fn new(registry: Arc<KeywordRegistry>, actions: Arc<ActionKeyword>) -> Self {
        Self {
            registry,
            actions: Some(actions),
        }
    }

    pub fn detached(registry: Arc<KeywordRegistry>) -> Self {
        Self {
            registry,
            actions: None,
        }
    }

    pub fn registry(&self) -> &KeywordRegistry {
        &self.registry
    }

    pub fn resolve(&self, name: &str) -> Option<BoundKeyword> {
        let normalized = normalize_keyword(name);
        let handler = self.registry.handlers.get(&normalized).copied()?;
        Some(BoundKeyword {
            name: normalized,
            handler,
            actions: self.actions.clone(),
        })
    }
}

/// Positional view over a step's string parameters.
struct Params<'a> {
    keyword: &'static str,
    values: &'a [String],
}

impl<'a> Params<'a> {
    fn new(keyword: &'static str, values: &'a [String]) -> Self {
        Self { keyword, values }
    }

    fn optional(&self, index: usize) -> Option<&'a str> {
        self.values
            .get(index)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, index: usize, name: &str) -> Result<&'a str, ActionError> {
        self.optional(index).ok_or_else(|| {
            ActionError::invalid(format!("{} requires parameter '{name}'", self.keyword))
        })
    }

    fn parse<T: FromStr>(&self, index: usize, name: &str) -> Result<T, ActionError>
    where
        T::Err: fmt::Display,
    {
        let raw = self.required(index, name)?;
        raw.parse::<T>().map_err(|err| {
            ActionError::invalid(format!("{}: bad {name} '{raw}': {err}", self.keyword))
        })
    }

    fn parse_or<T: FromStr>(&self, index: usize, name: &str, default: T) -> Result<T, ActionError>
    where
        T::Err: fmt::Display,
    {
        match self.optional(index) {
            Some(_) => self.parse(index, name),
            None => Ok(default),
        }
    }

    fn seconds(&self, index: usize, name: &str, default: Option<f64>) -> Result<Duration, ActionError> {
        let secs = match default {
            Some(default) => self.parse_or(index, name, default)?,
            None => self.parse(index, name)?,
        };
        Duration::try_from_secs_f64(secs).map_err(|err| {
            ActionError::invalid(format!("{}: bad {name} '{secs}': {err}", self.keyword))
        })
    }

    fn event(&self, index: usize) -> Option<&'a str> {
        self.optional(index)
    }
}

fn press_element(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("press_element", params);
    actions.press_element(
        p.required(0, "element")?,
        p.parse_or(1, "repeat", 1)?,
        p.parse_or(2, "offset_x", 0)?,
        p.parse_or(3, "offset_y", 0)?,
        p.event(4),
    )
}

fn press_by_percentage(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("press_by_percentage", params);
    actions.press_by_percentage(
        p.parse(0, "percent_x")?,
        p.parse(1, "percent_y")?,
        p.parse_or(2, "repeat", 1)?,
        p.event(3),
    )
}

fn press_by_coordinates(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("press_by_coordinates", params);
    actions.press_by_coordinates(
        p.parse(0, "x")?,
        p.parse(1, "y")?,
        p.parse_or(2, "repeat", 1)?,
        p.event(3),
    )
}

fn press_element_with_index(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("press_element_with_index", params);
    actions.press_element_with_index(
        p.required(0, "element")?,
        p.parse_or(1, "index", 0)?,
        p.event(2),
    )
}

fn detect_and_press(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("detect_and_press", params);
    actions.detect_and_press(
        p.required(0, "element")?,
        p.seconds(1, "timeout", None)?,
        p.event(2),
    )
}

fn swipe(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("swipe", params);
    actions.swipe(
        p.parse(0, "x")?,
        p.parse(1, "y")?,
        p.parse_or(2, "direction", Direction::Right)?,
        p.parse_or(3, "swipe_length", 50)?,
        p.event(4),
    )
}

fn swipe_until_element_appears(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("swipe_until_element_appears", params);
    actions.swipe_until_element_appears(
        p.required(0, "element")?,
        p.parse(1, "direction")?,
        p.seconds(2, "timeout", None)?,
        p.event(3),
    )
}

fn swipe_from_element(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("swipe_from_element", params);
    actions.swipe_from_element(
        p.required(0, "element")?,
        p.parse(1, "direction")?,
        p.parse(2, "swipe_length")?,
        p.event(3),
    )
}

fn scroll(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("scroll", params);
    actions.scroll(p.parse(0, "direction")?, p.event(1))
}

fn scroll_until_element_appears(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("scroll_until_element_appears", params);
    actions.scroll_until_element_appears(
        p.required(0, "element")?,
        p.parse(1, "direction")?,
        p.seconds(2, "timeout", None)?,
        p.event(3),
    )
}

fn scroll_from_element(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("scroll_from_element", params);
    actions.scroll_from_element(
        p.required(0, "element")?,
        p.parse(1, "direction")?,
        p.parse(2, "scroll_length")?,
        p.event(3),
    )
}

fn enter_text(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("enter_text", params);
    // Text is taken verbatim so intentional whitespace survives.
    let text = params
        .get(1)
        .ok_or_else(|| ActionError::invalid("enter_text requires parameter 'text'"))?;
    actions.enter_text(p.required(0, "element")?, text, p.event(2))
}

fn enter_number(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("enter_number", params);
    actions.enter_number(p.required(0, "element")?, p.required(1, "number")?, p.event(2))
}

fn press_keycode(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("press_keycode", params);
    actions.press_keycode(p.required(0, "keycode")?, p.event(1))
}

fn clear_element_text(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("clear_element_text", params);
    actions.clear_element_text(p.required(0, "element")?, p.event(1))
}

fn get_text(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("get_text", params);
    actions.get_text(p.required(0, "element")?).map(|_| ())
}

fn sleep(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("sleep", params);
    actions.sleep(p.seconds(0, "duration", None)?);
    Ok(())
}

fn assert_presence(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("assert_presence", params);
    let elements: Vec<String> = p
        .required(0, "elements")?
        .split(',')
        .map(str::trim)
        .filter(|element| !element.is_empty())
        .map(str::to_string)
        .collect();
    let timeout = p.seconds(1, "timeout", Some(10.0))?;
    let rule: MatchRule = p.parse_or(2, "rule", MatchRule::Any)?;
    if actions.verifier().assert_presence(&elements, timeout, rule)? {
        info!(?elements, ?rule, "presence asserted");
        Ok(())
    } else {
        Err(ActionError::Failed(format!(
            "elements {elements:?} not present ({rule:?}) within {timeout:?}"
        )))
    }
}

fn wait_for_element(actions: &ActionKeyword, params: &[String]) -> Result<(), ActionError> {
    let p = Params::new("wait_for_element", params);
    let located = actions
        .verifier()
        .wait_for_element(p.required(0, "element")?, p.seconds(1, "timeout", Some(10.0))?)?;
    info!(strategy = %located.strategy, "element appeared: {}", located.value);
    Ok(())
}
