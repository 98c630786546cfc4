//! Diagnostic screenshots taken before each element action

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use optics_core_types::Frame;
use optics_locator::{BackendError, DiagnosticSink};
use tracing::debug;

const SINK_NAME: &str = "screenshots";
const FRAME_EXTENSION: &str = "frame";

/// Writes every captured frame to `<dir>/<timestamp>-<seq>-<action>.frame`.
///
/// The bytes are stored as the element source produced them.
#[derive(Debug)]
pub struct ScreenshotSink {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl ScreenshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(&self, action: &str) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S-%6f");
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{timestamp}-{sequence:04}-{}.{FRAME_EXTENSION}",
            sanitize(action)
        )
    }
}

impl DiagnosticSink for ScreenshotSink {
    fn record(&self, action: &str, frame: &Frame) -> Result<(), BackendError> {
        if frame.is_empty() {
            return Err(BackendError::failed(SINK_NAME, "captured frame is empty"));
        }
        fs::create_dir_all(&self.dir)
            .map_err(|err| BackendError::failed(SINK_NAME, format!("{}: {err}", self.dir.display())))?;
        let path = self.dir.join(self.file_name(action));
        fs::write(&path, &frame.data[..])
            .map_err(|err| BackendError::failed(SINK_NAME, format!("{}: {err}", path.display())))?;
        debug!(action, path = %path.display(), "screenshot saved");
        Ok(())
    }
}

/// Keep letters, digits, spaces and underscores.
fn sanitize(action: &str) -> String {
    action
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ' ')
        .collect()
}
