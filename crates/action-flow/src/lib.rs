//! Hierarchical test execution
//!
//! Builds the TestCase -> Module -> Keyword tree from parsed suite data and
//! runs it with per-node retry budgets. External controllers steer a run
//! through commands on the event bus (pause, resume, skip, retry, add); every
//! state transition is published back as an event.

pub mod builder;
pub mod engine;
pub mod errors;
pub mod keyword;
pub mod model;
pub mod strategies;
pub mod suite;
pub mod summary;

pub use builder::HierarchyBuilder;
pub use engine::{
    EngineConfig, ExecutionEngine, ExecutionRequest, RunMode, RunReport, SuiteExecutor,
    DEFAULT_KEYWORD_TIMEOUT, DEFAULT_PAUSE_POLL_INTERVAL,
};
pub use errors::FlowError;
pub use keyword::{ActionTable, KeywordAction, KeywordFn, KeywordResolver};
pub use model::{ExecutionTree, Node, NodeIndex, NodeKind, NodeState, DEFAULT_MAX_ATTEMPTS};
pub use strategies::{DefaultFailureHandler, FailureDecision, FailureHandler};
pub use suite::{execution_queue, filter_test_cases, ModuleData, Step, SuiteData, TestCaseData};
pub use summary::{FailedNode, RunSummary, StateCounts};
