//! End-to-end runs of the execution engine against an in-process bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use optics_core_types::{Detection, ElementHandle, Frame, Point, SessionId};
use optics_event_bus::{CommandKind, EventManager, EventRecorder, EventStatus};
use optics_flow::{
    ActionTable, EngineConfig, ExecutionEngine, ExecutionRequest, ExecutionTree, HierarchyBuilder,
    KeywordAction, KeywordFn, NodeIndex, NodeKind, NodeState, RunMode, Step, SuiteData,
    SuiteExecutor,
};
use optics_locator::{
    ActionError, ActionKeyword, BackendError, Driver, ElementSource, ImageDetector, KeywordBinding,
    KeywordRegistry, StrategyManager,
};
use parking_lot::Mutex;

type Log = Arc<Mutex<Vec<String>>>;

struct Harness {
    events: Arc<EventManager>,
    recorder: Arc<EventRecorder>,
}

impl Harness {
    async fn new() -> Self {
        let events = Arc::new(EventManager::new());
        let recorder = Arc::new(EventRecorder::new());
        events.subscribe("recorder", recorder.clone());
        events.start().await;
        Self { events, recorder }
    }

    fn engine(&self, config: EngineConfig) -> ExecutionEngine {
        self.engine_with(Arc::new(ActionTable::new()), config)
    }

    fn engine_with(&self, table: Arc<ActionTable>, config: EngineConfig) -> ExecutionEngine {
        ExecutionEngine::new(Arc::clone(&self.events), table, config)
    }

    async fn settle(&self) {
        assert!(self.events.wait_idle(Duration::from_secs(2)).await);
    }
}

fn config() -> EngineConfig {
    EngineConfig::default().with_pause_poll_interval(Duration::from_millis(10))
}

/// Action that appends `label` to the log, then answers with `outcome(n)`
/// where `n` counts its own calls from 1.
fn recorded<F>(log: &Log, label: &'static str, outcome: F) -> Arc<dyn KeywordAction>
where
    F: Fn(usize) -> Result<(), ActionError> + Send + Sync + 'static,
{
    let log = Arc::clone(log);
    let calls = Mutex::new(0usize);
    Arc::new(KeywordFn(move |_params: &[String]| {
        log.lock().push(label.to_string());
        let mut calls = calls.lock();
        *calls += 1;
        outcome(*calls)
    }))
}

fn passing(log: &Log, label: &'static str) -> Arc<dyn KeywordAction> {
    recorded(log, label, |_| Ok(()))
}

fn calls(log: &Log, label: &str) -> usize {
    log.lock().iter().filter(|entry| *entry == label).count()
}

fn request(tree: ExecutionTree, mode: RunMode) -> ExecutionRequest {
    ExecutionRequest::new(SessionId::new(), mode, tree)
}

fn index(tree: &ExecutionTree, id: &str) -> NodeIndex {
    tree.get(id).unwrap()
}

#[tokio::test]
async fn failing_keyword_spends_its_whole_budget() {
    let h = Harness::new().await;
    let log = Log::default();
    let mut tree = ExecutionTree::new();
    let tc = tree.add_test_case("tc".into(), "Login", 1).unwrap();
    let m = tree.add_module(tc, "m".into(), "EnterCredentials", 1).unwrap();
    let action = recorded(&log, "press", |_| Err(ActionError::Failed("tap missed".into())));
    tree.add_keyword(m, "k".into(), "Press Element", vec!["OK".into()], Some(action), 3)
        .unwrap();

    let report = h.engine(config()).execute(request(tree, RunMode::Batch)).await.unwrap();
    h.settle().await;

    assert_eq!(
        h.recorder.statuses_for("k"),
        vec![
            EventStatus::Running,
            EventStatus::Retrying,
            EventStatus::Running,
            EventStatus::Retrying,
            EventStatus::Running,
            EventStatus::Fail,
        ]
    );
    let k = report.tree.node(index(&report.tree, "k"));
    assert_eq!(k.state, NodeState::CompletedFailed);
    assert_eq!(k.attempt_count, 3);
    assert!(k.last_failure_reason.as_deref().unwrap().contains("3 attempt(s)"));
    assert_eq!(calls(&log, "press"), 3);

    assert_eq!(report.tree.node(tc).state, NodeState::CompletedFailed);
    assert_eq!(report.summary.keywords.failed, 1);
    assert!(!report.is_success());

    let last = h.recorder.events().into_iter().rfind(|e| e.entity_id == "k").unwrap();
    assert_eq!(last.extra["attempt"], "3");
    assert_eq!(last.extra["previous_state"], "RUNNING");
    assert_eq!(last.parent_id.as_deref(), Some("m"));
    assert_eq!(last.args.as_deref(), Some(&["OK".to_string()][..]));
    assert!(last.elapsed.is_some());
}

#[tokio::test]
async fn skip_before_start_never_invokes() {
    let h = Harness::new().await;
    let log = Log::default();
    let mut tree = ExecutionTree::new();
    let tc = tree.add_test_case("tc".into(), "Search", 1).unwrap();
    let m1 = tree.add_module(tc, "m1".into(), "Open", 1).unwrap();
    tree.add_keyword(m1, "k1".into(), "Open App", Vec::new(), Some(passing(&log, "k1")), 3)
        .unwrap();
    tree.add_keyword(m1, "k2".into(), "Dismiss Popup", Vec::new(), Some(passing(&log, "k2")), 3)
        .unwrap();
    let m2 = tree.add_module(tc, "m2".into(), "Query", 1).unwrap();
    tree.add_keyword(m2, "k3".into(), "Enter Text", Vec::new(), Some(passing(&log, "k3")), 3)
        .unwrap();

    h.events
        .publish_command(CommandKind::Skip, "k2", Vec::new(), Some("m1".into()))
        .unwrap();
    h.events
        .publish_command(CommandKind::Skip, "m2", Vec::new(), None)
        .unwrap();

    let report = h.engine(config()).execute(request(tree, RunMode::Batch)).await.unwrap();
    h.settle().await;

    assert_eq!(calls(&log, "k1"), 1);
    assert_eq!(calls(&log, "k2"), 0);
    assert_eq!(calls(&log, "k3"), 0);
    assert_eq!(h.recorder.statuses_for("k2"), vec![EventStatus::Skipped]);
    assert_eq!(h.recorder.statuses_for("k3"), vec![EventStatus::Skipped]);
    assert_eq!(report.tree.node(m2).state, NodeState::Skipped);
    assert_eq!(report.tree.node(tc).state, NodeState::CompletedPassed);
    assert_eq!(report.summary.keywords.skipped, 2);
    assert!(report.is_success());
}

#[tokio::test]
async fn pause_holds_traversal_until_resume() {
    let h = Harness::new().await;
    let log = Log::default();
    let bus = Arc::clone(&h.events);
    let pauser: Arc<dyn KeywordAction> = Arc::new(KeywordFn(move |_params: &[String]| {
        bus.publish_command(CommandKind::Pause, "", Vec::new(), None)
            .map_err(|err| ActionError::Failed(err.to_string()))
    }));

    let mut tree = ExecutionTree::new();
    let tc = tree.add_test_case("tc".into(), "Checkout", 1).unwrap();
    let m = tree.add_module(tc, "m".into(), "Pay", 1).unwrap();
    tree.add_keyword(m, "k1".into(), "Open Cart", Vec::new(), Some(pauser), 3)
        .unwrap();
    tree.add_keyword(m, "k2".into(), "Press Pay", Vec::new(), Some(passing(&log, "k2")), 3)
        .unwrap();
    let engine = Arc::new(h.engine(config()));
    let run = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.execute(request(tree, RunMode::Batch)).await }
    });

    for _ in 0..200 {
        if h.recorder.statuses_for("k1").contains(&EventStatus::Pass) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.settle().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = h.recorder.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.recorder.len(), seen, "no events while paused");
    assert_eq!(calls(&log, "k2"), 0);

    h.events
        .publish_command(CommandKind::Skip, "k2", Vec::new(), None)
        .unwrap();
    h.events
        .publish_command(CommandKind::Resume, "", Vec::new(), None)
        .unwrap();
    let report = run.await.unwrap().unwrap();
    h.settle().await;

    // The skip seen while paused is applied after the resume.
    assert_eq!(calls(&log, "k2"), 0);
    assert_eq!(report.tree.node(index(&report.tree, "k2")).state, NodeState::Skipped);
    assert_eq!(report.tree.node(tc).state, NodeState::CompletedPassed);
}

#[tokio::test]
async fn resume_continues_from_the_paused_node() {
    let h = Harness::new().await;
    let log = Log::default();
    let mut tree = ExecutionTree::new();
    let tc = tree.add_test_case("tc".into(), "Checkout", 1).unwrap();
    let m = tree.add_module(tc, "m".into(), "Pay", 1).unwrap();
    tree.add_keyword(m, "k1".into(), "Press Pay", Vec::new(), Some(passing(&log, "k1")), 3)
        .unwrap();

    h.events
        .publish_command(CommandKind::Pause, "", Vec::new(), None)
        .unwrap();
    let engine = Arc::new(h.engine(config()));
    let run = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.execute(request(tree, RunMode::Batch)).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.settle().await;
    assert!(h.recorder.is_empty());
    h.events
        .publish_command(CommandKind::Resume, "", Vec::new(), None)
        .unwrap();

    let report = run.await.unwrap().unwrap();
    assert_eq!(calls(&log, "k1"), 1);
    assert!(report.is_success());
}

#[tokio::test]
async fn add_inserts_keywords_where_asked() {
    let h = Harness::new().await;
    let log = Log::default();
    let mut table = ActionTable::new();
    {
        let log = Arc::clone(&log);
        table.insert_fn("Mark", move |params| {
            log.lock().push(format!("mark:{}", params.join(",")));
            Ok(())
        });
    }

    let mut tree = ExecutionTree::new();
    let tc = tree.add_test_case("tc".into(), "Login", 1).unwrap();
    let m = tree.add_module(tc, "m".into(), "EnterCredentials", 1).unwrap();
    tree.add_keyword(m, "k1".into(), "Open", Vec::new(), Some(passing(&log, "k1")), 3)
        .unwrap();
    tree.add_keyword(m, "k2".into(), "Close", Vec::new(), Some(passing(&log, "k2")), 3)
        .unwrap();

    h.events
        .publish_command(
            CommandKind::Add,
            "k1",
            vec!["Mark".into(), "added".into()],
            Some("m".into()),
        )
        .unwrap();
    h.events
        .publish_command(
            CommandKind::Add,
            "",
            vec!["Launch Rocket".into()],
            Some("m".into()),
        )
        .unwrap();

    let report = h
        .engine_with(Arc::new(table), config())
        .execute(request(tree, RunMode::Batch))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(*log.lock(), vec!["k1", "mark:added", "k2"]);
    let names: Vec<&str> = report
        .tree
        .children(m)
        .iter()
        .map(|child| report.tree.node(*child).name.as_str())
        .collect();
    assert_eq!(names, vec!["Open", "Mark", "Close", "Launch Rocket"]);

    let unresolved = report.tree.node(*report.tree.children(m).last().unwrap());
    assert_eq!(unresolved.state, NodeState::CompletedFailed);
    assert!(unresolved
        .last_failure_reason
        .as_deref()
        .unwrap()
        .contains("keyword not found"));
    assert_eq!(report.tree.node(m).state, NodeState::CompletedFailed);

    let added = h
        .recorder
        .events()
        .into_iter()
        .filter(|event| event.message == "added")
        .count();
    assert_eq!(added, 2);
}

#[tokio::test]
async fn retry_reruns_a_finished_keyword_and_resettles_its_ancestors() {
    let h = Harness::new().await;
    let log = Log::default();
    let flaky = recorded(&log, "k1", |call| {
        if call == 1 {
            Err(ActionError::Failed("first run fails".into()))
        } else {
            Ok(())
        }
    });
    let bus = Arc::clone(&h.events);
    let retrier = recorded(&log, "k2", move |call| {
        if call == 1 {
            bus.publish_command(CommandKind::Retry, "k1", Vec::new(), None)
                .map_err(|err| ActionError::Failed(err.to_string()))?;
        }
        Ok(())
    });

    let mut tree = ExecutionTree::new();
    let tc1 = tree.add_test_case("tc1".into(), "Login", 1).unwrap();
    let m1 = tree.add_module(tc1, "m1".into(), "EnterCredentials", 1).unwrap();
    tree.add_keyword(m1, "k1".into(), "Press Login", Vec::new(), Some(flaky), 1)
        .unwrap();
    let tc2 = tree.add_test_case("tc2".into(), "Search", 1).unwrap();
    let m2 = tree.add_module(tc2, "m2".into(), "Query", 1).unwrap();
    tree.add_keyword(m2, "k2".into(), "Enter Text", Vec::new(), Some(retrier), 1)
        .unwrap();

    let report = h.engine(config()).execute(request(tree, RunMode::Batch)).await.unwrap();
    h.settle().await;

    assert_eq!(calls(&log, "k1"), 2);
    assert_eq!(
        h.recorder.statuses_for("k1"),
        vec![
            EventStatus::Running,
            EventStatus::Fail,
            EventStatus::NotRun,
            EventStatus::Running,
            EventStatus::Pass,
        ]
    );
    assert_eq!(
        h.recorder.statuses_for("tc1"),
        vec![EventStatus::Running, EventStatus::Fail, EventStatus::Pass]
    );
    let k1 = report.tree.node(index(&report.tree, "k1"));
    assert_eq!(k1.attempt_count, 1);
    assert_eq!(report.tree.node(tc1).state, NodeState::CompletedPassed);
    assert!(report.is_success());
}

#[tokio::test]
async fn retry_of_a_halting_keyword_resumes_the_rest_of_its_module() {
    let h = Harness::new().await;
    let log = Log::default();
    let flaky = recorded(&log, "k1", |call| {
        if call == 1 {
            Err(ActionError::Failed("first run fails".into()))
        } else {
            Ok(())
        }
    });
    let bus = Arc::clone(&h.events);
    let retrier = recorded(&log, "k3", move |call| {
        if call == 1 {
            bus.publish_command(CommandKind::Retry, "k1", Vec::new(), None)
                .map_err(|err| ActionError::Failed(err.to_string()))?;
        }
        Ok(())
    });

    let mut tree = ExecutionTree::new();
    let tc1 = tree.add_test_case("tc1".into(), "Login", 1).unwrap();
    let m1 = tree.add_module(tc1, "m1".into(), "EnterCredentials", 1).unwrap();
    tree.add_keyword(m1, "k1".into(), "Press Login", Vec::new(), Some(flaky), 1)
        .unwrap();
    tree.add_keyword(m1, "k2".into(), "Enter Text", Vec::new(), Some(passing(&log, "k2")), 1)
        .unwrap();
    let tc2 = tree.add_test_case("tc2".into(), "Search", 1).unwrap();
    let m2 = tree.add_module(tc2, "m2".into(), "Query", 1).unwrap();
    tree.add_keyword(m2, "k3".into(), "Enter Text", Vec::new(), Some(retrier), 1)
        .unwrap();

    let report = h.engine(config()).execute(request(tree, RunMode::Batch)).await.unwrap();
    h.settle().await;

    assert_eq!(calls(&log, "k1"), 2);
    assert_eq!(calls(&log, "k2"), 1);
    assert_eq!(
        log.lock().clone(),
        vec!["k1", "k3", "k1", "k2"]
    );
    assert_eq!(report.tree.node(index(&report.tree, "k2")).state, NodeState::CompletedPassed);
    assert_eq!(report.tree.node(m1).state, NodeState::CompletedPassed);
    assert_eq!(report.tree.node(tc1).state, NodeState::CompletedPassed);
    assert_eq!(report.summary.keywords.not_run, 0);
    assert!(report.is_success());
}

#[tokio::test]
async fn halted_module_never_reports_passed_while_siblings_are_unrun() {
    let h = Harness::new().await;
    let log = Log::default();
    let bus = Arc::clone(&h.events);
    let retrier = recorded(&log, "k3", move |call| {
        if call == 1 {
            bus.publish_command(CommandKind::Retry, "k1", Vec::new(), None)
                .map_err(|err| ActionError::Failed(err.to_string()))?;
        }
        Ok(())
    });

    let mut tree = ExecutionTree::new();
    let tc1 = tree.add_test_case("tc1".into(), "Login", 1).unwrap();
    let m1 = tree.add_module(tc1, "m1".into(), "EnterCredentials", 1).unwrap();
    let broken = recorded(&log, "k1", |_| Err(ActionError::Failed("still broken".into())));
    tree.add_keyword(m1, "k1".into(), "Press Login", Vec::new(), Some(broken), 1)
        .unwrap();
    tree.add_keyword(m1, "k2".into(), "Enter Text", Vec::new(), Some(passing(&log, "k2")), 1)
        .unwrap();
    let tc2 = tree.add_test_case("tc2".into(), "Search", 1).unwrap();
    let m2 = tree.add_module(tc2, "m2".into(), "Query", 1).unwrap();
    tree.add_keyword(m2, "k3".into(), "Enter Text", Vec::new(), Some(retrier), 1)
        .unwrap();

    let report = h.engine(config()).execute(request(tree, RunMode::Batch)).await.unwrap();
    h.settle().await;

    assert_eq!(calls(&log, "k1"), 2);
    assert_eq!(calls(&log, "k2"), 0);
    assert_eq!(report.tree.node(index(&report.tree, "k2")).state, NodeState::NotRun);
    assert_eq!(report.tree.node(m1).state, NodeState::CompletedFailed);
    assert_eq!(report.tree.node(tc1).state, NodeState::CompletedFailed);
    assert!(!report.is_success());
}

#[tokio::test]
async fn timed_out_keyword_finishes_before_the_next_one_starts() {
    let h = Harness::new().await;
    let log = Log::default();
    let slow_log = Arc::clone(&log);
    let slow: Arc<dyn KeywordAction> = Arc::new(KeywordFn(move |_params: &[String]| {
        slow_log.lock().push("k1 start".to_string());
        std::thread::sleep(Duration::from_millis(300));
        slow_log.lock().push("k1 end".to_string());
        Ok(())
    }));

    let mut tree = ExecutionTree::new();
    let tc = tree.add_test_case("tc".into(), "Sync", 1).unwrap();
    let m = tree.add_module(tc, "m".into(), "Wait", 1).unwrap();
    tree.add_keyword(m, "k1".into(), "Sleep", Vec::new(), Some(slow), 3)
        .unwrap();
    tree.add_keyword(m, "k2".into(), "Press Element", Vec::new(), Some(passing(&log, "k2 start")), 3)
        .unwrap();

    let report = h
        .engine(
            config()
                .with_keyword_timeout(Duration::from_millis(50))
                .with_halt_on_failure(false),
        )
        .execute(request(tree, RunMode::Batch))
        .await
        .unwrap();

    assert_eq!(log.lock().clone(), vec!["k1 start", "k1 end", "k2 start"]);
    assert_eq!(report.tree.node(index(&report.tree, "k1")).state, NodeState::Error);
    assert_eq!(report.tree.node(index(&report.tree, "k2")).state, NodeState::CompletedPassed);
    assert!(!report.is_success());
}

#[tokio::test]
async fn dry_run_checks_resolution_without_acting() {
    let h = Harness::new().await;
    let log = Log::default();
    let mut tree = ExecutionTree::new();
    let tc = tree.add_test_case("tc".into(), "Login", 1).unwrap();
    let m = tree.add_module(tc, "m".into(), "EnterCredentials", 1).unwrap();
    tree.add_keyword(m, "k1".into(), "Press Element", Vec::new(), Some(passing(&log, "k1")), 3)
        .unwrap();
    tree.add_keyword(m, "k2".into(), "Launch Rocket", Vec::new(), None, 3)
        .unwrap();

    let report = h
        .engine(config().with_halt_on_failure(false))
        .execute(request(tree, RunMode::DryRun))
        .await
        .unwrap();
    h.settle().await;

    assert!(log.lock().is_empty());
    assert_eq!(h.recorder.statuses_for("k1"), vec![EventStatus::Running, EventStatus::Pass]);
    let k2 = report.tree.node(index(&report.tree, "k2"));
    assert_eq!(k2.state, NodeState::CompletedFailed);
    assert_eq!(k2.attempt_count, 1);
    assert_eq!(report.summary.failures.len(), 3);
}

#[tokio::test]
async fn unsupported_errors_halt_the_container_but_not_the_suite() {
    let h = Harness::new().await;
    let log = Log::default();
    let unsupported = recorded(&log, "k1", |_| {
        Err(ActionError::Backend(BackendError::unsupported("camera", "clear_text")))
    });

    let mut tree = ExecutionTree::new();
    let tc1 = tree.add_test_case("tc1".into(), "Profile", 1).unwrap();
    let m1 = tree.add_module(tc1, "m1".into(), "ClearName", 1).unwrap();
    tree.add_keyword(m1, "k1".into(), "Clear Element Text", Vec::new(), Some(unsupported), 3)
        .unwrap();
    tree.add_keyword(m1, "k2".into(), "Enter Text", Vec::new(), Some(passing(&log, "k2")), 3)
        .unwrap();
    let m2 = tree.add_module(tc1, "m2".into(), "Save", 1).unwrap();
    tree.add_keyword(m2, "k3".into(), "Press Element", Vec::new(), Some(passing(&log, "k3")), 3)
        .unwrap();
    let tc2 = tree.add_test_case("tc2".into(), "Logout", 1).unwrap();
    let m3 = tree.add_module(tc2, "m3".into(), "Leave", 1).unwrap();
    tree.add_keyword(m3, "k4".into(), "Press Element", Vec::new(), Some(passing(&log, "k4")), 3)
        .unwrap();

    let report = h.engine(config()).execute(request(tree, RunMode::Batch)).await.unwrap();
    h.settle().await;

    assert_eq!(h.recorder.statuses_for("k1"), vec![EventStatus::Running, EventStatus::Error]);
    assert_eq!(calls(&log, "k1"), 1);
    assert_eq!(calls(&log, "k2"), 0);
    assert_eq!(calls(&log, "k3"), 0);
    assert_eq!(calls(&log, "k4"), 1);

    assert_eq!(report.tree.node(m1).state, NodeState::Error);
    assert_eq!(report.tree.node(m2).state, NodeState::NotRun);
    assert_eq!(report.tree.node(tc1).state, NodeState::Error);
    assert_eq!(report.tree.node(tc2).state, NodeState::CompletedPassed);
    assert!(report
        .tree
        .node(tc1)
        .last_failure_reason
        .as_deref()
        .unwrap()
        .contains("ClearName"));
    assert_eq!(report.summary.keywords.errored, 1);
    assert_eq!(report.summary.keywords.not_run, 2);
}

#[tokio::test]
async fn hung_keyword_times_out_as_error() {
    let h = Harness::new().await;
    let log = Log::default();
    let slow = recorded(&log, "slow", |_| {
        std::thread::sleep(Duration::from_millis(300));
        Ok(())
    });
    let mut tree = ExecutionTree::new();
    let tc = tree.add_test_case("tc".into(), "Sync", 1).unwrap();
    let m = tree.add_module(tc, "m".into(), "Wait", 1).unwrap();
    tree.add_keyword(m, "k".into(), "Sleep", Vec::new(), Some(slow), 3)
        .unwrap();

    let report = h
        .engine(config().with_keyword_timeout(Duration::from_millis(50)))
        .execute(request(tree, RunMode::Batch))
        .await
        .unwrap();

    let k = report.tree.node(index(&report.tree, "k"));
    assert_eq!(k.state, NodeState::Error);
    assert_eq!(k.attempt_count, 1);
    assert!(k.last_failure_reason.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_case_filter_keeps_setup_and_teardown() {
    let h = Harness::new().await;
    let log = Log::default();
    let mut tree = ExecutionTree::new();
    for (id, name) in [("setup", "Setup"), ("login", "Login"), ("search", "Search"), ("teardown", "Teardown")] {
        let tc = tree.add_test_case(id.into(), name, 1).unwrap();
        let m = tree.add_module(tc, format!("{id}-m").into(), "Body", 1).unwrap();
        tree.add_keyword(m, format!("{id}-k").into(), "Step", Vec::new(), Some(passing(&log, id)), 1)
            .unwrap();
    }

    let request = request(tree, RunMode::Batch).with_test_case("LOGIN");
    let report = h.engine(config()).execute(request).await.unwrap();

    assert_eq!(*log.lock(), vec!["setup", "login", "teardown"]);
    let search = index(&report.tree, "search");
    assert_eq!(report.tree.node(search).state, NodeState::NotRun);
}

// Scripted backends for the login scenario: a native source that only knows
// the credential fields, a screen source, and a template matcher that finds
// the login button.

struct NativeSource(HashMap<&'static str, &'static str>);

impl ElementSource for NativeSource {
    fn name(&self) -> &str {
        "page_source"
    }

    fn locate(&self, element: &str, _index: Option<usize>) -> Result<Option<ElementHandle>, BackendError> {
        Ok(self.0.get(element).map(|handle| ElementHandle::new(*handle)))
    }
}

struct ScreenSource;

impl ElementSource for ScreenSource {
    fn name(&self) -> &str {
        "screenshot"
    }

    fn capture(&self) -> Result<Option<Frame>, BackendError> {
        Ok(Some(Frame::new(1080, 1920, vec![0u8; 4])))
    }
}

struct TemplateMatcher;

impl ImageDetector for TemplateMatcher {
    fn name(&self) -> &str {
        "templatematch"
    }

    fn find_element(
        &self,
        _frame: &Frame,
        reference: &str,
        _index: Option<usize>,
    ) -> Result<Detection, BackendError> {
        Ok(match reference {
            "login_btn.png" => Detection::at(Point::new(540, 1600), None),
            _ => Detection::not_found(),
        })
    }
}

#[derive(Default)]
struct TapLog(Mutex<Vec<String>>);

impl Driver for TapLog {
    fn name(&self) -> &str {
        "taplog"
    }

    fn press_coordinates(&self, point: Point, _event: Option<&str>) -> Result<(), BackendError> {
        self.0.lock().push(format!("tap:{point}"));
        Ok(())
    }

    fn enter_text_element(
        &self,
        element: &ElementHandle,
        text: &str,
        _event: Option<&str>,
    ) -> Result<(), BackendError> {
        self.0.lock().push(format!("type:{}={text}", element.id));
        Ok(())
    }
}

#[tokio::test]
async fn login_button_found_only_by_template_still_passes() {
    let h = Harness::new().await;
    let native = NativeSource(HashMap::from([
        ("//input[@id='user']", "user-field"),
        ("//input[@id='pass']", "pass-field"),
    ]));
    let manager = Arc::new(StrategyManager::new(
        vec![Arc::new(native), Arc::new(ScreenSource)],
        Vec::new(),
        vec![Arc::new(TemplateMatcher)],
    ));
    let driver = Arc::new(TapLog::default());
    let actions = Arc::new(ActionKeyword::new(driver.clone(), manager));
    let binding = Arc::new(KeywordBinding::new(Arc::new(KeywordRegistry::builtin()), actions));

    let mut suite = SuiteData::new();
    suite.add_element("USERNAME_FIELD", "//input[@id='user']");
    suite.add_element("PASSWORD_FIELD", "//input[@id='pass']");
    suite.add_element("LOGIN_BTN", "login_btn.png");
    suite.add_module(
        "EnterCredentials",
        vec![
            Step::new("Enter Text", vec!["${USERNAME_FIELD}".into(), "a".into()]),
            Step::new("Enter Text", vec!["${PASSWORD_FIELD}".into(), "b".into()]),
            Step::new("Press Element", vec!["${LOGIN_BTN}".into()]),
        ],
    );
    suite.add_test_case("Login", vec!["EnterCredentials".into()]);
    let tree = HierarchyBuilder::new(binding.clone())
        .build(&suite, &suite.test_cases)
        .unwrap();

    let engine = ExecutionEngine::new(Arc::clone(&h.events), binding, config());
    let report = engine.execute(request(tree, RunMode::Batch)).await.unwrap();

    assert!(report.is_success(), "{}", report.summary);
    let press = report
        .tree
        .iter()
        .find(|(_, node)| node.kind == NodeKind::Keyword && node.name == "Press Element")
        .map(|(_, node)| node)
        .unwrap();
    assert_eq!(press.state, NodeState::CompletedPassed);
    assert_eq!(press.attempt_count, 1);
    assert_eq!(
        *driver.0.lock(),
        vec!["type:user-field=a", "type:pass-field=b", "tap:(540, 1600)"]
    );
}
