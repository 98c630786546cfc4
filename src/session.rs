//! Backend registry and device sessions
//!
//! Backends are looked up by the names used in configuration. A session
//! builds every enabled backend in declaration order, wires them into a
//! strategy manager and exposes the bound keyword surface.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use optics_core_types::SessionId;
use optics_event_bus::SyncEventManager;
use optics_locator::{
    ActionKeyword, BackendError, Driver, ElementSource, ImageDetector,
    KeywordBinding, KeywordRegistry, StrategyManager, TextDetector,
};
use tracing::{debug, info, warn};

use crate::config::{BackendKind, DependencyConfig, OpticsConfig};
use crate::diagnostics::ScreenshotSink;
use crate::errors::{ConfigError, SessionError};

type Factory<T> = Arc<dyn Fn(&DependencyConfig) -> Result<Arc<T>, BackendError> + Send + Sync>;

/// Factories for concrete backends, keyed by configuration name.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    drivers: HashMap<String, Factory<dyn Driver>>,
    element_sources: HashMap<String, Factory<dyn ElementSource>>,
    text_detectors: HashMap<String, Factory<dyn TextDetector>>,
    image_detectors: HashMap<String, Factory<dyn ImageDetector>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_driver<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&DependencyConfig) -> Result<Arc<dyn Driver>, BackendError> + Send + Sync + 'static,
    {
        self.drivers.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_element_source<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&DependencyConfig) -> Result<Arc<dyn ElementSource>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.element_sources.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_text_detector<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&DependencyConfig) -> Result<Arc<dyn TextDetector>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.text_detectors.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_image_detector<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&DependencyConfig) -> Result<Arc<dyn ImageDetector>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.image_detectors.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: BackendKind, name: &str) -> bool {
        match kind {
            BackendKind::Driver => self.drivers.contains_key(name),
            BackendKind::ElementSource => self.element_sources.contains_key(name),
            BackendKind::TextDetector => self.text_detectors.contains_key(name),
            BackendKind::ImageDetector => self.image_detectors.contains_key(name),
        }
    }

    /// Enabled backends in `config` that nothing here can build.
    pub fn missing(&self, config: &OpticsConfig) -> Vec<(BackendKind, String)> {
        BackendKind::ALL
            .into_iter()
            .flat_map(|kind| {
                config
                    .enabled(kind)
                    .into_iter()
                    .filter(move |name| !self.contains(kind, name))
                    .map(move |name| (kind, name.to_string()))
            })
            .collect()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<T: ?Sized>(map: &HashMap<String, Factory<T>>) -> Vec<&str> {
            let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
            names.sort_unstable();
            names
        }
        f.debug_struct("BackendRegistry")
            .field("drivers", &names(&self.drivers))
            .field("element_sources", &names(&self.element_sources))
            .field("text_detectors", &names(&self.text_detectors))
            .field("image_detectors", &names(&self.image_detectors))
            .finish()
    }
}

fn instantiate<T: ?Sized>(
    kind: BackendKind,
    config: &OpticsConfig,
    factories: &HashMap<String, Factory<T>>,
) -> Result<Vec<Arc<T>>, SessionError> {
    let mut built = Vec::new();
    for (name, settings) in config.enabled_entries(kind) {
        let factory = factories.get(name).ok_or_else(|| SessionError::UnknownBackend {
            kind: kind.as_str(),
            name: name.to_string(),
        })?;
        let backend = factory(settings).map_err(|source| SessionError::Backend {
            kind: kind.as_str(),
            name: name.to_string(),
            source,
        })?;
        debug!(%kind, backend = %name, "backend started");
        built.push(backend);
    }
    Ok(built)
}

/// A live device session: one driver, the enabled element sources and
/// detectors, and the keyword surface built over them.
pub struct Session {
    id: SessionId,
    config: Arc<OpticsConfig>,
    driver: Arc<dyn Driver>,
    manager: Arc<StrategyManager>,
    binding: Arc<KeywordBinding>,
    bus: Arc<SyncEventManager>,
    closed: AtomicBool,
}

impl Session {
    pub fn open(
        config: Arc<OpticsConfig>,
        registry: &BackendRegistry,
        bus: Arc<SyncEventManager>,
    ) -> Result<Self, SessionError> {
        config.validate_for_execution()?;

        let mut drivers = instantiate(BackendKind::Driver, &config, &registry.drivers)?.into_iter();
        let driver = drivers
            .next()
            .ok_or_else(|| ConfigError::invalid("no driver enabled in 'driver_sources'"))?;
        for extra in drivers {
            warn!(driver = extra.name(), "only the first enabled driver is used");
        }
        let sources = instantiate(BackendKind::ElementSource, &config, &registry.element_sources)?;
        let text_detectors =
            instantiate(BackendKind::TextDetector, &config, &registry.text_detectors)?;
        let image_detectors =
            instantiate(BackendKind::ImageDetector, &config, &registry.image_detectors)?;

        let manager = Arc::new(StrategyManager::new(sources, text_detectors, image_detectors));
        let mut actions = ActionKeyword::new(Arc::clone(&driver), Arc::clone(&manager));
        if config.save_screenshots {
            let sink = ScreenshotSink::new(config.screenshots_dir());
            debug!(dir = %sink.dir().display(), "saving diagnostic screenshots");
            actions = actions.with_diagnostics(Arc::new(sink));
        }
        let binding = Arc::new(KeywordBinding::new(
            Arc::new(KeywordRegistry::builtin()),
            Arc::new(actions),
        ));

        let id = SessionId::new();
        info!(session = %id, driver = driver.name(), "session opened");
        Ok(Self {
            id,
            config,
            driver,
            manager,
            binding,
            bus,
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &OpticsConfig {
        &self.config
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn strategy_manager(&self) -> &Arc<StrategyManager> {
        &self.manager
    }

    /// Keyword resolver bound to this session's actions.
    pub fn keywords(&self) -> Arc<KeywordBinding> {
        Arc::clone(&self.binding)
    }

    pub fn bus(&self) -> &Arc<SyncEventManager> {
        &self.bus
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Terminate the driver session and shut the bus down. Driver failures
    /// are logged; only a bus failure is reported. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.driver.terminate() {
            warn!(session = %self.id, "failed to terminate driver: {err}");
        }
        self.bus.shutdown()?;
        info!(session = %self.id, "session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(err) = self.close() {
                warn!(session = %self.id, "error while closing session: {err}");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("driver", &self.driver.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use parking_lot::Mutex;

    struct RecordingDriver {
        terminated: Arc<Mutex<u32>>,
    }

    impl Driver for RecordingDriver {
        fn name(&self) -> &str {
            "fake-driver"
        }

        fn terminate(&self) -> Result<(), BackendError> {
            *self.terminated.lock() += 1;
            Ok(())
        }
    }

    struct BlankSource;

    impl ElementSource for BlankSource {
        fn name(&self) -> &str {
            "blank"
        }
    }

    fn config() -> OpticsConfig {
        let mut config = OpticsConfig::default();
        config.driver_sources = vec![BTreeMap::from([(
            "fake".to_string(),
            DependencyConfig::enabled(),
        )])];
        config.elements_sources = vec![BTreeMap::from([(
            "blank".to_string(),
            DependencyConfig::enabled(),
        )])];
        config
    }

    fn bus() -> Arc<SyncEventManager> {
        Arc::new(SyncEventManager::new(Duration::from_secs(5)).unwrap())
    }

    #[test]
    fn unregistered_backend_is_a_configuration_error() {
        let registry = BackendRegistry::new();
        assert_eq!(registry.missing(&config()).len(), 2);

        let err = Session::open(Arc::new(config()), &registry, bus()).unwrap_err();
        assert!(matches!(err, SessionError::UnknownBackend { kind: "driver", .. }));
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn open_builds_backends_and_close_terminates_once() {
        let terminated = Arc::new(Mutex::new(0));
        let mut registry = BackendRegistry::new();
        let counter = Arc::clone(&terminated);
        registry
            .register_driver("fake", move |_| {
                Ok(Arc::new(RecordingDriver {
                    terminated: Arc::clone(&counter),
                }) as Arc<dyn Driver>)
            })
            .register_element_source("blank", |_| Ok(Arc::new(BlankSource) as Arc<dyn ElementSource>));
        assert!(registry.missing(&config()).is_empty());

        let session = Session::open(Arc::new(config()), &registry, bus()).unwrap();
        assert_eq!(session.driver().name(), "fake-driver");
        assert_eq!(session.strategy_manager().sources().len(), 1);
        assert!(session.keywords().resolve("Press Element").is_some());

        session.close().unwrap();
        session.close().unwrap();
        assert!(session.is_closed());
        drop(session);
        assert_eq!(*terminated.lock(), 1);
    }

    #[test]
    fn failing_factory_reports_the_backend() {
        let mut registry = BackendRegistry::new();
        registry
            .register_driver("fake", |_| Err(BackendError::failed("fake", "no device attached")))
            .register_element_source("blank", |_| Ok(Arc::new(BlankSource) as Arc<dyn ElementSource>));
        let err = Session::open(Arc::new(config()), &registry, bus()).unwrap_err();
        assert!(matches!(err, SessionError::Backend { kind: "driver", .. }));
    }
}
