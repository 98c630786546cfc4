//! Execution engine: walks the tree, applies retry/skip/pause policy and
//! reports every transition on the event bus.
//!
//! Traversal is depth-first and strictly sequential. Before each node starts
//! the engine drains the command queue without waiting; commands therefore
//! only ever take effect at node boundaries, never while an action runs.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_recursion::async_recursion;
use async_trait::async_trait;
use optics_core_types::{epoch_seconds, NodeId, SessionId};
use optics_event_bus::{Command, CommandKind, Event, EventManager};
use optics_locator::ActionError;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::errors::FlowError;
use crate::keyword::{KeywordAction, KeywordResolver};
use crate::model::{ExecutionTree, NodeIndex, NodeKind, NodeState, DEFAULT_MAX_ATTEMPTS};
use crate::strategies::{DefaultFailureHandler, FailureDecision, FailureHandler};
use crate::summary::RunSummary;

pub const DEFAULT_PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_KEYWORD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Keywords invoke their actions
    Batch,
    /// Keywords are checked for a resolved action but never invoked
    DryRun,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Batch => "batch",
            RunMode::DryRun => "dry_run",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "batch" => Ok(RunMode::Batch),
            "dry_run" => Ok(RunMode::DryRun),
            other => Err(FlowError::configuration(format!("unknown run mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempt budget for nodes added at run time
    pub max_attempts: u32,
    /// Sleep between command polls while paused
    pub pause_poll_interval: Duration,
    /// Upper bound on a single keyword invocation
    pub keyword_timeout: Duration,
    /// Stop a container at its first failed child
    pub halt_on_failure: bool,
    /// Base delay between attempts of one keyword
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pause_poll_interval: DEFAULT_PAUSE_POLL_INTERVAL,
            keyword_timeout: DEFAULT_KEYWORD_TIMEOUT,
            halt_on_failure: true,
            retry_backoff: Duration::ZERO,
        }
    }
}

impl EngineConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }

    pub fn with_keyword_timeout(mut self, keyword_timeout: Duration) -> Self {
        self.keyword_timeout = keyword_timeout;
        self
    }

    pub fn with_halt_on_failure(mut self, halt: bool) -> Self {
        self.halt_on_failure = halt;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// One run of a built tree.
#[derive(Debug)]
pub struct ExecutionRequest {
    pub session_id: SessionId,
    pub mode: RunMode,
    /// Run only the test case with this name (plus setup and teardown cases)
    pub test_case: Option<String>,
    pub tree: ExecutionTree,
}

impl ExecutionRequest {
    pub fn new(session_id: SessionId, mode: RunMode, tree: ExecutionTree) -> Self {
        Self {
            session_id,
            mode,
            test_case: None,
            tree,
        }
    }

    pub fn with_test_case(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.test_case = (!name.trim().is_empty()).then_some(name);
        self
    }
}

/// Final tree of a run together with its outcome counts.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub tree: ExecutionTree,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }
}

/// Suite executor trait
#[async_trait]
pub trait SuiteExecutor: Send + Sync {
    /// Execute a request to completion. Node failures end up in the report;
    /// only setup problems are returned as errors.
    async fn execute(&self, request: ExecutionRequest) -> Result<RunReport, FlowError>;

    /// Validate a request before traversal
    fn validate(&self, request: &ExecutionRequest) -> Result<(), FlowError>;
}

/// Mutable state of one run.
struct Run {
    tree: ExecutionTree,
    session_id: SessionId,
    mode: RunMode,
    selected: HashSet<NodeIndex>,
    paused: bool,
    /// Containers currently executing, outermost first
    in_progress: Vec<NodeIndex>,
    /// Commands seen while paused, applied after RESUME
    deferred: VecDeque<Command>,
}

enum Attempt {
    Passed,
    Failed(ActionError),
    /// Timed out or panicked; never retried
    Crashed(String),
}

pub struct ExecutionEngine {
    events: Arc<EventManager>,
    resolver: Arc<dyn KeywordResolver>,
    failure_handler: Arc<dyn FailureHandler>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        events: Arc<EventManager>,
        resolver: Arc<dyn KeywordResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            events,
            resolver,
            failure_handler: Arc::new(DefaultFailureHandler::new(config.retry_backoff)),
            config,
        }
    }

    pub fn with_failure_handler(mut self, failure_handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = failure_handler;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Test cases the request selects, in tree order.
    fn select_roots(request: &ExecutionRequest) -> Vec<NodeIndex> {
        let roots = request.tree.roots().iter().copied();
        match request.test_case.as_deref() {
            None => roots.collect(),
            Some(wanted) => {
                let wanted = wanted.trim().to_lowercase();
                roots
                    .filter(|root| {
                        let name = request.tree.node(*root).name.to_lowercase();
                        name == wanted || name.contains("setup") || name.contains("teardown")
                    })
                    .collect()
            }
        }
    }

    #[async_recursion]
    async fn execute_node(&self, run: &mut Run, index: NodeIndex) -> Result<(), FlowError> {
        match run.tree.node(index).kind {
            NodeKind::Keyword => self.run_keyword(run, index).await,
            NodeKind::TestCase | NodeKind::Module => self.run_container(run, index).await,
        }
    }

    async fn run_container(&self, run: &mut Run, index: NodeIndex) -> Result<(), FlowError> {
        let previous = run.tree.transition(index, NodeState::Running)?;
        run.tree.node_mut(index).start_time = Some(epoch_seconds());
        self.emit(run, index, previous, "");
        debug!(node_id = %run.tree.node(index).id, name = %run.tree.node(index).name, "entering");

        self.run_children(run, index).await?;

        let derived = run.tree.derived_state(index);
        let reason = failure_reason(&run.tree, index);
        let previous = run.tree.transition(index, derived)?;
        let node = run.tree.node_mut(index);
        node.end_time = Some(epoch_seconds());
        node.last_failure_reason = reason.clone();
        self.emit(run, index, previous, reason.unwrap_or_default());
        Ok(())
    }

    /// Run the container's NOT_RUN children in order, stopping at the first
    /// failure when halting is on.
    #[async_recursion]
    async fn run_children(&self, run: &mut Run, index: NodeIndex) -> Result<(), FlowError> {
        run.in_progress.push(index);
        let outcome = self.run_children_inner(run, index).await;
        run.in_progress.retain(|open| *open != index);
        outcome
    }

    async fn run_children_inner(&self, run: &mut Run, index: NodeIndex) -> Result<(), FlowError> {
        loop {
            self.drain_commands(run).await?;
            let next = run
                .tree
                .children(index)
                .iter()
                .copied()
                .find(|child| run.tree.node(*child).state == NodeState::NotRun);
            let Some(child) = next else {
                return Ok(());
            };
            self.execute_node(run, child).await?;

            if self.config.halt_on_failure && run.tree.node(child).state.is_failure() {
                info!(
                    node_id = %run.tree.node(index).id,
                    failed = %run.tree.node(child).name,
                    "halting after failure"
                );
                return Ok(());
            }
        }
    }

    async fn run_keyword(&self, run: &mut Run, index: NodeIndex) -> Result<(), FlowError> {
        let previous = run.tree.transition(index, NodeState::Running)?;
        run.tree.node_mut(index).start_time = Some(epoch_seconds());
        self.emit(run, index, previous, "");

        let Some(action) = run.tree.node(index).action.clone() else {
            let reason = format!("keyword not found: {}", run.tree.node(index).name);
            warn!(node_id = %run.tree.node(index).id, "{reason}");
            return self.finish_keyword(run, index, NodeState::CompletedFailed, Some(reason));
        };

        if run.mode == RunMode::DryRun {
            return self.finish_keyword(run, index, NodeState::CompletedPassed, None);
        }

        loop {
            match self.invoke(run, index, Arc::clone(&action)).await {
                Attempt::Passed => {
                    return self.finish_keyword(run, index, NodeState::CompletedPassed, None);
                }
                Attempt::Crashed(reason) => {
                    return self.finish_keyword(run, index, NodeState::Error, Some(reason));
                }
                Attempt::Failed(error) => {
                    let node = run.tree.node(index);
                    let id = node.id.to_string();
                    let (attempt, max_attempts) = (node.attempt_count, node.max_attempts);
                    let decision = self
                        .failure_handler
                        .handle_failure(&id, &error, attempt, max_attempts)
                        .await;

                    match decision {
                        FailureDecision::Retry { backoff } if attempt < max_attempts => {
                            run.tree.node_mut(index).last_failure_reason = Some(error.to_string());
                            let previous = run.tree.transition(index, NodeState::Retrying)?;
                            self.emit(run, index, previous, error.to_string());
                            if !backoff.is_zero() {
                                sleep(backoff).await;
                            }
                            let previous = run.tree.transition(index, NodeState::Running)?;
                            self.emit(run, index, previous, "");
                        }
                        FailureDecision::Retry { .. } => {
                            let exceeded = FlowError::RetryBudgetExceeded {
                                node: id,
                                attempts: attempt,
                                last: error.to_string(),
                            };
                            return self.finish_keyword(
                                run,
                                index,
                                NodeState::CompletedFailed,
                                Some(exceeded.to_string()),
                            );
                        }
                        FailureDecision::Fail(reason) => {
                            return self.finish_keyword(
                                run,
                                index,
                                NodeState::CompletedFailed,
                                Some(reason),
                            );
                        }
                        FailureDecision::Abort(reason) => {
                            return self.finish_keyword(run, index, NodeState::Error, Some(reason));
                        }
                    }
                }
            }
        }
    }

    fn finish_keyword(
        &self,
        run: &mut Run,
        index: NodeIndex,
        state: NodeState,
        reason: Option<String>,
    ) -> Result<(), FlowError> {
        let previous = run.tree.transition(index, state)?;
        let node = run.tree.node_mut(index);
        node.end_time = Some(epoch_seconds());
        if reason.is_some() {
            node.last_failure_reason = reason.clone();
        }
        let message = match (state, reason) {
            (_, Some(reason)) => reason,
            (NodeState::CompletedPassed, None) if run.mode == RunMode::DryRun => "dry run".to_string(),
            _ => String::new(),
        };
        self.emit(run, index, previous, message);
        Ok(())
    }

    /// Run one attempt on the blocking pool, bounded by the keyword timeout.
    ///
    /// A blocking call cannot be cancelled. On timeout the attempt is recorded
    /// as an error, but the engine still waits for the call to return so the
    /// next node never overlaps it on the device.
    async fn invoke(&self, run: &Run, index: NodeIndex, action: Arc<dyn KeywordAction>) -> Attempt {
        let node = run.tree.node(index);
        let params = node.params.clone();
        debug!(node_id = %node.id, keyword = %node.name, attempt = node.attempt_count, "invoking keyword");

        let mut call = tokio::task::spawn_blocking(move || action.call(&params));
        match timeout(self.config.keyword_timeout, &mut call).await {
            Ok(Ok(Ok(()))) => Attempt::Passed,
            Ok(Ok(Err(error))) => Attempt::Failed(error),
            Ok(Err(join_error)) => {
                Attempt::Crashed(FlowError::Bridge(format!("keyword panicked: {join_error}")).to_string())
            }
            Err(_) => {
                warn!(
                    node_id = %node.id,
                    "keyword still running after {:?}, waiting for it to return",
                    self.config.keyword_timeout
                );
                if let Err(join_error) = call.await {
                    warn!(node_id = %node.id, "timed out keyword panicked: {join_error}");
                }
                Attempt::Crashed(
                    ActionError::Timeout {
                        what: node.name.clone(),
                        timeout: self.config.keyword_timeout,
                    }
                    .to_string(),
                )
            }
        }
    }

    /// Apply every queued command. Returns once the queue is empty and the
    /// run is not paused.
    async fn drain_commands(&self, run: &mut Run) -> Result<(), FlowError> {
        loop {
            let deferred = if run.paused { None } else { run.deferred.pop_front() };
            let command = match deferred.or_else(|| self.events.get_command()) {
                Some(command) => command,
                None if run.paused => {
                    sleep(self.config.pause_poll_interval).await;
                    continue;
                }
                None => return Ok(()),
            };
            self.apply_command(run, command).await?;
        }
    }

    async fn apply_command(&self, run: &mut Run, command: Command) -> Result<(), FlowError> {
        debug!(?command, paused = run.paused, "applying command");
        let kind = command.command;
        match kind {
            CommandKind::Pause if run.paused => debug!("already paused"),
            CommandKind::Pause => {
                run.paused = true;
                info!("execution paused");
            }
            CommandKind::Resume if run.paused => {
                run.paused = false;
                info!("execution resumed");
            }
            CommandKind::Resume => debug!("resume ignored, execution is not paused"),
            _ if run.paused => run.deferred.push_back(command),
            CommandKind::Skip => self.skip(run, &command.entity_id),
            CommandKind::Retry => self.retry(run, &command.entity_id).await?,
            CommandKind::Add => self.add(run, command).await?,
        }
        Ok(())
    }

    fn skip(&self, run: &mut Run, entity_id: &str) {
        let Some(target) = run.tree.get(entity_id) else {
            warn!(entity_id, "skip target not found");
            return;
        };
        if run.tree.node(target).state != NodeState::NotRun {
            warn!(
                entity_id,
                state = %run.tree.node(target).state,
                "skip ignored, node already started"
            );
            return;
        }
        for index in run.tree.subtree(target) {
            if run.tree.node(index).state != NodeState::NotRun {
                continue;
            }
            match run.tree.transition(index, NodeState::Skipped) {
                Ok(previous) => self.emit(run, index, previous, "skipped by command"),
                Err(err) => warn!("skip failed: {err}"),
            }
        }
        info!(entity_id, "node skipped");
    }

    async fn retry(&self, run: &mut Run, entity_id: &str) -> Result<(), FlowError> {
        let Some(target) = run.tree.get(entity_id) else {
            warn!(entity_id, "retry target not found");
            return Ok(());
        };
        if run.in_progress.contains(&target) {
            warn!(entity_id, "retry ignored, node is currently executing");
            return Ok(());
        }

        let previous = run.tree.node(target).state;
        run.tree.reset_subtree(target);
        self.emit(run, target, previous, "reset for retry");
        info!(entity_id, previous = %previous, "node queued for retry");

        if !self.will_be_reached(run, target) {
            self.run_detached(run, target).await?;
        }
        Ok(())
    }

    async fn add(&self, run: &mut Run, command: Command) -> Result<(), FlowError> {
        let Some(module) = command.parent_id.as_deref().and_then(|id| run.tree.get(id)) else {
            warn!(parent_id = ?command.parent_id, "add ignored, module not found");
            return Ok(());
        };
        if run.tree.node(module).kind != NodeKind::Module {
            warn!(parent_id = ?command.parent_id, "add ignored, parent is not a module");
            return Ok(());
        }
        let Some((keyword, params)) = command.params.split_first() else {
            warn!("add ignored, no keyword given");
            return Ok(());
        };
        let after = if command.entity_id.trim().is_empty() {
            None
        } else {
            match run.tree.get(&command.entity_id) {
                Some(after) => Some(after),
                None => {
                    warn!(entity_id = %command.entity_id, "add ignored, anchor keyword not found");
                    return Ok(());
                }
            }
        };

        let action = self.resolver.resolve(keyword);
        if action.is_none() {
            warn!(keyword = %keyword, "added keyword has no registered action");
        }
        let index = match run.tree.insert_keyword(
            module,
            after,
            NodeId::new(),
            keyword.clone(),
            params.to_vec(),
            action,
            self.config.max_attempts,
        ) {
            Ok(index) => index,
            Err(err) => {
                warn!("add ignored: {err}");
                return Ok(());
            }
        };
        self.emit(run, index, NodeState::NotRun, "added");
        info!(node_id = %run.tree.node(index).id, keyword = %keyword, "keyword added");

        if !self.will_be_reached(run, index) {
            self.run_detached(run, index).await?;
        }
        Ok(())
    }

    /// Whether normal traversal will still start this NOT_RUN node.
    fn will_be_reached(&self, run: &Run, index: NodeIndex) -> bool {
        let mut current = index;
        while let Some(parent) = run.tree.parent_of(current) {
            if run.in_progress.contains(&parent) {
                return true;
            }
            if run.tree.node(parent).state != NodeState::NotRun {
                return false;
            }
            current = parent;
        }
        run.selected.contains(&current)
    }

    /// Execute a node outside normal traversal, then bring its finished
    /// ancestors in line with the new outcome. A container that halted at the
    /// re-run node picks up its remaining NOT_RUN children once it passes.
    async fn run_detached(&self, run: &mut Run, index: NodeIndex) -> Result<(), FlowError> {
        self.execute_node(run, index).await?;
        let mut rerun = index;
        for ancestor in run.tree.ancestors(index) {
            if run.in_progress.contains(&ancestor) || !run.tree.node(ancestor).state.is_terminal() {
                break;
            }
            let halted_here = self.config.halt_on_failure && run.tree.node(rerun).state.is_failure();
            if !halted_here {
                self.run_children(run, ancestor).await?;
            }
            rerun = ancestor;

            let derived = run.tree.derived_state(ancestor);
            if derived == run.tree.node(ancestor).state {
                continue;
            }
            let reason = failure_reason(&run.tree, ancestor);
            let previous = run.tree.settle(ancestor, derived);
            let node = run.tree.node_mut(ancestor);
            node.last_failure_reason = reason;
            node.end_time = Some(epoch_seconds());
            self.emit(run, ancestor, previous, "re-evaluated after retry");
        }
        Ok(())
    }

    fn emit(&self, run: &Run, index: NodeIndex, previous: NodeState, message: impl Into<String>) {
        let node = run.tree.node(index);
        let parent_id = run
            .tree
            .parent_of(index)
            .map(|parent| run.tree.node(parent).id.to_string());
        let mut event = Event::new(
            node.kind.entity_type(),
            node.id.to_string(),
            node.name.clone(),
            node.state.event_status(),
        )
        .with_message(message)
        .with_parent(parent_id)
        .with_extra("previous_state", previous.as_str())
        .with_extra("attempt", node.attempt_count.to_string())
        .with_extra("max_attempts", node.max_attempts.to_string())
        .with_extra("session_id", run.session_id.to_string())
        .with_timing(node.start_time, node.end_time);
        if node.kind == NodeKind::Keyword {
            event = event.with_args(node.params.clone());
        }
        if let Err(err) = self.events.publish_event(event) {
            warn!(node_id = %node.id, "failed to publish event: {err}");
        }
    }
}

/// Reason recorded on a container: the first failed child's, or the number
/// of children that never ran.
fn failure_reason(tree: &ExecutionTree, index: NodeIndex) -> Option<String> {
    let failed = tree.children(index).iter().find_map(|child| {
        let node = tree.node(*child);
        node.state.is_failure().then(|| {
            format!(
                "{} '{}' {}: {}",
                node.kind.entity_type(),
                node.name,
                node.state,
                node.last_failure_reason.as_deref().unwrap_or("no reason recorded")
            )
        })
    });
    failed.or_else(|| {
        let unfinished = tree
            .children(index)
            .iter()
            .filter(|child| !tree.node(**child).state.is_terminal())
            .count();
        (unfinished > 0).then(|| format!("{unfinished} child node(s) did not run"))
    })
}

#[async_trait]
impl SuiteExecutor for ExecutionEngine {
    async fn execute(&self, request: ExecutionRequest) -> Result<RunReport, FlowError> {
        self.validate(&request)?;
        let selected: HashSet<NodeIndex> = Self::select_roots(&request).into_iter().collect();
        info!(
            session_id = %request.session_id,
            mode = %request.mode,
            test_cases = selected.len(),
            "starting execution"
        );

        let mut run = Run {
            tree: request.tree,
            session_id: request.session_id,
            mode: request.mode,
            selected,
            paused: false,
            in_progress: Vec::new(),
            deferred: VecDeque::new(),
        };

        loop {
            self.drain_commands(&mut run).await?;
            let next = run.tree.roots().iter().copied().find(|root| {
                run.selected.contains(root) && run.tree.node(*root).state == NodeState::NotRun
            });
            let Some(root) = next else {
                break;
            };
            self.execute_node(&mut run, root).await?;
        }

        let summary = RunSummary::from_tree(&run.tree);
        if summary.is_success() {
            info!(session_id = %run.session_id, "execution finished: {}", summary.test_cases);
        } else {
            warn!(
                session_id = %run.session_id,
                failures = summary.failures.len(),
                "execution finished with failures: {}",
                summary.test_cases
            );
        }
        Ok(RunReport {
            summary,
            tree: run.tree,
        })
    }

    fn validate(&self, request: &ExecutionRequest) -> Result<(), FlowError> {
        if request.tree.roots().is_empty() {
            return Err(FlowError::configuration("execution tree has no test cases"));
        }
        if let Some(wanted) = request.test_case.as_deref() {
            let wanted = wanted.trim().to_lowercase();
            let found = request
                .tree
                .roots()
                .iter()
                .any(|root| request.tree.node(*root).name.to_lowercase() == wanted);
            if !found {
                return Err(FlowError::configuration(format!(
                    "test case '{wanted}' not found"
                )));
            }
        }
        Ok(())
    }
}
