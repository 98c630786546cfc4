//! Event and command records carried on the bus

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use optics_core_types::epoch_seconds;
use serde::{Deserialize, Serialize};

/// Status reported for a test case, module or keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    NotRun,
    Running,
    Pass,
    Fail,
    Error,
    Skipped,
    Retrying,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::NotRun => "NOT_RUN",
            EventStatus::Running => "RUNNING",
            EventStatus::Pass => "PASS",
            EventStatus::Fail => "FAIL",
            EventStatus::Error => "ERROR",
            EventStatus::Skipped => "SKIPPED",
            EventStatus::Retrying => "RETRYING",
        }
    }

    /// Whether the status closes the entity's execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Pass | EventStatus::Fail | EventStatus::Error | EventStatus::Skipped
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    TestCase,
    Module,
    Keyword,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::TestCase => "test_case",
            EntityType::Module => "module",
            EntityType::Keyword => "keyword",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable status record published by the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub name: String,
    pub status: EventStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    /// Creation time in seconds since the Unix epoch
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    /// Elapsed execution time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
}

impl Event {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        name: impl Into<String>,
        status: EventStatus,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            name: name.into(),
            status,
            message: String::new(),
            parent_id: None,
            extra: BTreeMap::new(),
            timestamp: epoch_seconds(),
            args: None,
            start_time: None,
            end_time: None,
            elapsed: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    /// Attach timing; `elapsed` is derived when both ends are known.
    pub fn with_timing(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self.elapsed = match (start, end) {
            (Some(start), Some(end)) => Some((end - start).max(0.0)),
            _ => None,
        };
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Retry,
    Add,
    Skip,
    Pause,
    Resume,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Retry => "Retry",
            CommandKind::Add => "Add",
            CommandKind::Skip => "Skip",
            CommandKind::Pause => "Pause",
            CommandKind::Resume => "Resume",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(CommandKind::Retry),
            "add" => Ok(CommandKind::Add),
            "skip" => Ok(CommandKind::Skip),
            "pause" => Ok(CommandKind::Pause),
            "resume" => Ok(CommandKind::Resume),
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

/// Immutable control instruction issued by an external controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command: CommandKind,
    pub entity_id: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Command {
    pub fn new(command: CommandKind, entity_id: impl Into<String>) -> Self {
        Self {
            command,
            entity_id: entity_id.into(),
            params: Vec::new(),
            parent_id: None,
        }
    }

    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }
}
