//! Seams between the execution tree and the actions its keywords invoke

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use optics_locator::{normalize_keyword, ActionError, BoundKeyword, KeywordBinding};

/// Something a keyword node can invoke with its parameters.
///
/// Calls are blocking; the engine runs them on the blocking thread pool.
pub trait KeywordAction: Send + Sync {
    fn call(&self, params: &[String]) -> Result<(), ActionError>;
}

/// Maps keyword names to actions.
pub trait KeywordResolver: Send + Sync {
    fn resolve(&self, keyword: &str) -> Option<Arc<dyn KeywordAction>>;
}

impl KeywordAction for BoundKeyword {
    fn call(&self, params: &[String]) -> Result<(), ActionError> {
        BoundKeyword::call(self, params)
    }
}

impl KeywordResolver for KeywordBinding {
    fn resolve(&self, keyword: &str) -> Option<Arc<dyn KeywordAction>> {
        KeywordBinding::resolve(self, keyword).map(|bound| Arc::new(bound) as Arc<dyn KeywordAction>)
    }
}

/// Adapts a closure into a [`KeywordAction`].
pub struct KeywordFn<F>(pub F);

impl<F> KeywordAction for KeywordFn<F>
where
    F: Fn(&[String]) -> Result<(), ActionError> + Send + Sync,
{
    fn call(&self, params: &[String]) -> Result<(), ActionError> {
        (self.0)(params)
    }
}

/// Resolver over an explicit table of actions, keyed by normalised name.
#[derive(Clone, Default)]
pub struct ActionTable {
    actions: HashMap<String, Arc<dyn KeywordAction>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, action: Arc<dyn KeywordAction>) -> &mut Self {
        self.actions.insert(normalize_keyword(name), action);
        self
    }

    pub fn insert_fn<F>(&mut self, name: &str, action: F) -> &mut Self
    where
        F: Fn(&[String]) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(KeywordFn(action)))
    }
}

impl KeywordResolver for ActionTable {
    fn resolve(&self, keyword: &str) -> Option<Arc<dyn KeywordAction>> {
        self.actions.get(&normalize_keyword(keyword)).cloned()
    }
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.actions.keys().collect();
        names.sort();
        f.debug_struct("ActionTable").field("keywords", &names).finish()
    }
}
