use std::sync::Arc;

use optics_cli::{BackendRegistry, OpticsConfig};

pub struct CliContext {
    config: Arc<OpticsConfig>,
    registry: BackendRegistry,
}

impl CliContext {
    /// The stock binary registers no backends, so `execute` stops at the
    /// first enabled backend it cannot build.
    pub fn new(config: OpticsConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: BackendRegistry::new(),
        }
    }

    pub fn shared_config(&self) -> Arc<OpticsConfig> {
        Arc::clone(&self.config)
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }
}
