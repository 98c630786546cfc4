//! Runs a project folder end to end

use std::path::PathBuf;
use std::sync::Arc;

use optics_core_types::SessionId;
use optics_event_bus::{BusError, SyncEventManager};
use optics_flow::{
    execution_queue, filter_test_cases, ExecutionEngine, ExecutionRequest, HierarchyBuilder,
    KeywordResolver, RunMode, RunReport, SuiteData, SuiteExecutor, TestCaseData,
};
use optics_locator::{KeywordBinding, KeywordRegistry};
use tracing::{info, warn};

use crate::config::OpticsConfig;
use crate::errors::RunError;
use crate::session::{BackendRegistry, Session};
use crate::suite_reader;

/// What to run.
#[derive(Debug, Clone)]
pub struct ProjectRun {
    pub folder: PathBuf,
    pub mode: RunMode,
    /// Run only this test case, plus setup and teardown cases
    pub test_case: Option<String>,
}

impl ProjectRun {
    pub fn new(folder: impl Into<PathBuf>, mode: RunMode) -> Self {
        Self {
            folder: folder.into(),
            mode,
            test_case: None,
        }
    }

    pub fn with_test_case(mut self, name: Option<String>) -> Self {
        self.test_case = name.map(|name| name.trim().to_string()).filter(|name| !name.is_empty());
        self
    }
}

/// Owns the bus for the duration of one run. Subscribers are registered on
/// the bus before [`Runner::run`]; the bus is shut down when the run ends.
pub struct Runner {
    config: Arc<OpticsConfig>,
    registry: BackendRegistry,
    bus: Arc<SyncEventManager>,
}

impl Runner {
    pub fn new(config: Arc<OpticsConfig>, registry: BackendRegistry, bus: Arc<SyncEventManager>) -> Self {
        Self {
            config,
            registry,
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<SyncEventManager> {
        &self.bus
    }

    pub async fn run(self, run: &ProjectRun) -> Result<RunReport, RunError> {
        let suite = suite_reader::read_project(&run.folder)?;
        let cases = filter_test_cases(&suite.test_cases, &self.config.include, &self.config.exclude)?;
        let selection: Vec<String> = run.test_case.iter().cloned().collect();
        let queue = execution_queue(
            &cases,
            &selection,
            self.config.execution.per_case_setup_teardown,
        )?;

        let session = match run.mode {
            RunMode::Batch => {
                let config = Arc::clone(&self.config);
                let registry = self.registry.clone();
                let bus = Arc::clone(&self.bus);
                Some(off_runtime(move || Ok(Session::open(config, &registry, bus)?)).await?)
            }
            RunMode::DryRun => None,
        };
        let (session_id, resolver): (SessionId, Arc<dyn KeywordResolver>) = match &session {
            Some(session) => (
                session.id().clone(),
                session.keywords() as Arc<dyn KeywordResolver>,
            ),
            None => (
                SessionId::new(),
                Arc::new(KeywordBinding::detached(Arc::new(KeywordRegistry::builtin())))
                    as Arc<dyn KeywordResolver>,
            ),
        };

        let outcome = self.execute(run, session_id, resolver, &suite, &queue).await;

        let manager = self.bus.manager();
        if !manager.wait_idle(self.config.execution.bridge_timeout()).await {
            warn!(
                pending = manager.pending_events(),
                "timed out waiting for event delivery"
            );
        }
        let bus = Arc::clone(&self.bus);
        let closed = off_runtime(move || match session {
            Some(session) => Ok(session.close()?),
            None => Ok(bus.shutdown()?),
        })
        .await;

        let report = outcome?;
        closed?;
        Ok(report)
    }

    async fn execute(
        &self,
        run: &ProjectRun,
        session_id: SessionId,
        resolver: Arc<dyn KeywordResolver>,
        suite: &SuiteData,
        queue: &[TestCaseData],
    ) -> Result<RunReport, RunError> {
        let tree = HierarchyBuilder::new(Arc::clone(&resolver))
            .with_max_attempts(self.config.execution.max_attempts)
            .build(suite, queue)?;

        let bus = Arc::clone(&self.bus);
        off_runtime(move || Ok(bus.start()?)).await?;
        let engine = ExecutionEngine::new(
            self.bus.manager(),
            resolver,
            self.config.execution.engine_config(),
        );
        let request = ExecutionRequest::new(session_id, run.mode, tree);
        engine.validate(&request)?;

        info!(
            folder = %run.folder.display(),
            mode = %run.mode,
            test_cases = queue.len(),
            "starting run"
        );
        Ok(engine.execute(request).await?)
    }
}

/// Run blocking work (bridge calls, backend start-up and teardown) on the
/// blocking pool instead of an async worker thread.
async fn off_runtime<T, F>(work: F) -> Result<T, RunError>
where
    F: FnOnce() -> Result<T, RunError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        RunError::Bus(BusError::BridgeUnavailable(format!(
            "blocking bus call did not complete: {err}"
        )))
    })?
}
