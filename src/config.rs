//! Layered configuration
//!
//! Built-in defaults are overlaid by the global file
//! (`~/.optics/global_config.yaml`), then the project's `config.yaml`, then
//! any `OPTICS__`-prefixed environment variables. Mappings merge key by key
//! with the later layer winning; sequences are replaced wholesale.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use optics_flow::EngineConfig;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::errors::ConfigError;

pub const GLOBAL_CONFIG_DIR: &str = ".optics";
pub const GLOBAL_CONFIG_FILE: &str = "global_config.yaml";
pub const PROJECT_CONFIG_FILE: &str = "config.yaml";
pub const ENV_PREFIX: &str = "OPTICS__";
pub const DEFAULT_OUTPUT_DIR: &str = "execution_output";
pub const SCREENSHOTS_DIR: &str = "screenshots";
pub const DEFAULT_EVENTS_FILE: &str = "execution_events.jsonl";

const ENV_SEPARATOR: &str = "__";

/// Capability a configured backend provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Driver,
    ElementSource,
    TextDetector,
    ImageDetector,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Driver,
        BackendKind::ElementSource,
        BackendKind::TextDetector,
        BackendKind::ImageDetector,
    ];

    /// Key of the backend list in the configuration file
    pub fn config_key(&self) -> &'static str {
        match self {
            BackendKind::Driver => "driver_sources",
            BackendKind::ElementSource => "elements_sources",
            BackendKind::TextDetector => "text_detection",
            BackendKind::ImageDetector => "image_detection",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Driver => "driver",
            BackendKind::ElementSource => "element source",
            BackendKind::TextDetector => "text detector",
            BackendKind::ImageDetector => "image detector",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of one backend entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub capabilities: BTreeMap<String, Value>,
}

impl DependencyConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn capability(&self, key: &str) -> Option<&Value> {
        self.capabilities.get(key).filter(|value| !value.is_null())
    }
}

/// Ordered list of single-entry maps, `name -> settings`. Declaration order
/// is the order in which backends are tried.
pub type DependencyList = Vec<BTreeMap<String, DependencyConfig>>;

fn entry(name: &str, config: DependencyConfig) -> BTreeMap<String, DependencyConfig> {
    BTreeMap::from([(name.to_string(), config)])
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Attempt budget of every node
    pub max_attempts: u32,
    pub pause_poll_interval_ms: u64,
    pub keyword_timeout_secs: u64,
    /// Bound on every call made through the synchronous bus bridge
    pub bridge_timeout_secs: u64,
    pub halt_on_failure: bool,
    pub retry_backoff_ms: u64,
    /// Run the first setup/teardown case around every regular test case
    pub per_case_setup_teardown: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pause_poll_interval_ms: 500,
            keyword_timeout_secs: 300,
            bridge_timeout_secs: 30,
            halt_on_failure: true,
            retry_backoff_ms: 0,
            per_case_setup_teardown: false,
        }
    }
}

impl ExecutionSettings {
    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn keyword_timeout(&self) -> Duration {
        Duration::from_secs(self.keyword_timeout_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_max_attempts(self.max_attempts)
            .with_pause_poll_interval(self.pause_poll_interval())
            .with_keyword_timeout(self.keyword_timeout())
            .with_halt_on_failure(self.halt_on_failure)
            .with_retry_backoff(self.retry_backoff())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticsConfig {
    /// Log to the console
    pub console: bool,
    pub driver_sources: DependencyList,
    pub elements_sources: DependencyList,
    pub text_detection: DependencyList,
    pub image_detection: DependencyList,
    pub file_log: bool,
    pub json_log: bool,
    pub json_path: Option<PathBuf>,
    pub log_level: String,
    pub log_path: Option<PathBuf>,
    pub project_path: Option<PathBuf>,
    /// Save a screenshot before every element action
    pub save_screenshots: bool,
    /// Test cases to run; setup and teardown cases always run
    pub include: Vec<String>,
    /// Test cases to leave out
    pub exclude: Vec<String>,
    pub execution: ExecutionSettings,
}

impl Default for OpticsConfig {
    fn default() -> Self {
        let appium_capabilities = ["deviceName", "platformName", "automationName", "appPackage", "appActivity"]
            .into_iter()
            .map(|key| (key.to_string(), Value::Null))
            .collect();

        Self {
            console: true,
            driver_sources: vec![
                entry(
                    "appium",
                    DependencyConfig {
                        enabled: false,
                        url: Some("http://127.0.0.1:4723".to_string()),
                        capabilities: appium_capabilities,
                    },
                ),
                entry("ble", DependencyConfig::disabled()),
            ],
            elements_sources: vec![
                entry("appium_find_element", DependencyConfig::enabled()),
                entry("appium_page_source", DependencyConfig::disabled()),
                entry("device_screenshot", DependencyConfig::disabled()),
                entry("webcam_screenshot", DependencyConfig::disabled()),
            ],
            text_detection: vec![
                entry("easyocr", DependencyConfig::disabled()),
                entry("pytesseract", DependencyConfig::disabled()),
                entry("google_vision", DependencyConfig::disabled()),
            ],
            image_detection: vec![entry("templatematch", DependencyConfig::disabled())],
            file_log: false,
            json_log: false,
            json_path: None,
            log_level: "info".to_string(),
            log_path: None,
            project_path: None,
            save_screenshots: true,
            include: Vec::new(),
            exclude: Vec::new(),
            execution: ExecutionSettings::default(),
        }
    }
}

impl OpticsConfig {
    pub fn backends(&self, kind: BackendKind) -> &DependencyList {
        match kind {
            BackendKind::Driver => &self.driver_sources,
            BackendKind::ElementSource => &self.elements_sources,
            BackendKind::TextDetector => &self.text_detection,
            BackendKind::ImageDetector => &self.image_detection,
        }
    }

    /// Names of the enabled backends of one kind, in declaration order.
    pub fn enabled(&self, kind: BackendKind) -> Vec<&str> {
        self.enabled_entries(kind).map(|(name, _)| name).collect()
    }

    /// Settings of an enabled backend.
    pub fn dependency(&self, kind: BackendKind, name: &str) -> Option<&DependencyConfig> {
        self.enabled_entries(kind)
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, config)| config)
    }

    pub(crate) fn enabled_entries(
        &self,
        kind: BackendKind,
    ) -> impl Iterator<Item = (&str, &DependencyConfig)> {
        self.backends(kind)
            .iter()
            .flat_map(|item| item.iter())
            .filter(|(_, config)| config.enabled)
            .map(|(name, config)| (name.as_str(), config))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.max_attempts == 0 {
            return Err(ConfigError::invalid("execution.max_attempts must be at least 1"));
        }
        if self.execution.pause_poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "execution.pause_poll_interval_ms must be greater than 0",
            ));
        }
        if !self.include.is_empty() && !self.exclude.is_empty() {
            return Err(ConfigError::invalid(
                "provide either an include or an exclude list, not both",
            ));
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::invalid(format!(
                "unknown log_level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Checks needed before acting on a device: at least one driver and one
    /// element source must be enabled.
    pub fn validate_for_execution(&self) -> Result<(), ConfigError> {
        self.validate()?;
        for kind in [BackendKind::Driver, BackendKind::ElementSource] {
            if self.enabled(kind).is_empty() {
                return Err(ConfigError::invalid(format!(
                    "no {kind} enabled in '{}'",
                    kind.config_key()
                )));
            }
        }
        Ok(())
    }

    /// Directory receiving log files and event exports.
    pub fn output_dir(&self) -> PathBuf {
        match (&self.log_path, &self.project_path) {
            (Some(path), _) => path.clone(),
            (None, Some(project)) => project.join(DEFAULT_OUTPUT_DIR),
            (None, None) => PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }

    /// Destination of the JSON-lines event log.
    /// Where diagnostic screenshots are written.
    pub fn screenshots_dir(&self) -> PathBuf {
        self.output_dir().join(SCREENSHOTS_DIR)
    }

    pub fn events_path(&self) -> PathBuf {
        self.json_path
            .clone()
            .unwrap_or_else(|| self.output_dir().join(DEFAULT_EVENTS_FILE))
    }
}

pub fn default_global_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR).join(GLOBAL_CONFIG_FILE))
}

#[derive(Debug, Clone)]
struct Layer {
    path: PathBuf,
    required: bool,
}

/// Collects configuration layers and merges them into an [`OpticsConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    layers: Vec<Layer>,
    project_path: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global file, then the project's `config.yaml`, then the process
    /// environment.
    pub fn standard(project: Option<&Path>) -> Self {
        let mut loader = Self::new();
        if let Some(global) = default_global_path() {
            loader = loader.with_file(global);
        }
        if let Some(project) = project {
            loader = loader.with_project(project);
        }
        loader.with_env(std::env::vars())
    }

    /// Add an optional layer; a missing file is skipped.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.layers.push(Layer {
            path: path.into(),
            required: false,
        });
        self
    }

    /// Add a layer that must exist.
    pub fn with_required_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.layers.push(Layer {
            path: path.into(),
            required: true,
        });
        self
    }

    pub fn with_project(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self = self.with_file(dir.join(PROJECT_CONFIG_FILE));
        self.project_path = Some(dir);
        self
    }

    /// Environment variables to consider; only `OPTICS__` keys are kept.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .filter(|(key, _)| key.starts_with(ENV_PREFIX)),
        );
        self
    }

    pub fn load(&self) -> Result<OpticsConfig, ConfigError> {
        let mut merged = serde_yaml::to_value(OpticsConfig::default())
            .map_err(|err| ConfigError::invalid(err.to_string()))?;

        for layer in &self.layers {
            match read_layer(layer)? {
                Some(value) => {
                    deep_merge(&mut merged, value);
                    info!("Loaded configuration from: {}", layer.path.display());
                }
                None => debug!(path = %layer.path.display(), "config layer not present"),
            }
        }

        for (key, raw) in &self.env {
            apply_env_override(&mut merged, key, raw)?;
            debug!(%key, "applied environment override");
        }

        let mut config: OpticsConfig =
            serde_yaml::from_value(merged).map_err(|err| ConfigError::invalid(err.to_string()))?;
        if config.project_path.is_none() {
            config.project_path = self.project_path.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn read_layer(layer: &Layer) -> Result<Option<Value>, ConfigError> {
    if !layer.path.exists() {
        if layer.required {
            return Err(ConfigError::Read {
                path: layer.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }
        return Ok(None);
    }

    let content = fs::read_to_string(&layer.path).map_err(|source| ConfigError::Read {
        path: layer.path.clone(),
        source,
    })?;
    let value: Value = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: layer.path.clone(),
        source,
    })?;
    match value {
        Value::Null => Ok(None),
        Value::Mapping(_) => Ok(Some(value)),
        _ => Err(ConfigError::invalid(format!(
            "{} must contain a mapping at the top level",
            layer.path.display()
        ))),
    }
}

/// Merge `overlay` into `base`. Nested mappings merge recursively; any other
/// value in `overlay` replaces the one in `base`.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                let both_mappings =
                    value.is_mapping() && base_map.get(&key).is_some_and(Value::is_mapping);
                if both_mappings {
                    if let Some(existing) = base_map.get_mut(&key) {
                        deep_merge(existing, value);
                    }
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// `OPTICS__EXECUTION__MAX_ATTEMPTS=5` sets `execution.max_attempts`. Values
/// are read as YAML scalars so numbers and booleans keep their type.
fn apply_env_override(root: &mut Value, key: &str, raw: &str) -> Result<(), ConfigError> {
    let Some(path) = key.strip_prefix(ENV_PREFIX) else {
        return Ok(());
    };
    let segments: Vec<String> = path
        .split(ENV_SEPARATOR)
        .map(|segment| segment.trim().to_ascii_lowercase())
        .collect();
    if segments.iter().any(String::is_empty) {
        return Err(ConfigError::EnvOverride {
            key: key.to_string(),
            reason: "empty path segment".to_string(),
        });
    }

    let value = serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    let mut cursor = root;
    for segment in parents {
        let Value::Mapping(map) = cursor else {
            return Err(ConfigError::EnvOverride {
                key: key.to_string(),
                reason: format!("parent of '{segment}' is not a mapping"),
            });
        };
        cursor = map
            .entry(Value::String(segment.clone()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
    match cursor {
        Value::Mapping(map) => {
            map.insert(Value::String(last.clone()), value);
            Ok(())
        }
        _ => Err(ConfigError::EnvOverride {
            key: key.to_string(),
            reason: format!("parent of '{last}' is not a mapping"),
        }),
    }
}
