//! Outcome counts of a finished run

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{ExecutionTree, NodeKind, NodeState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub not_run: usize,
}

impl StateCounts {
    fn record(&mut self, state: NodeState) {
        match state {
            NodeState::CompletedPassed => self.passed += 1,
            NodeState::CompletedFailed => self.failed += 1,
            NodeState::Error => self.errored += 1,
            NodeState::Skipped => self.skipped += 1,
            // A run that ended mid-node counts the node as not run.
            NodeState::NotRun | NodeState::Running | NodeState::Retrying => self.not_run += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored + self.skipped + self.not_run
    }
}

impl fmt::Display for StateCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} errored, {} skipped, {} not run",
            self.passed, self.failed, self.errored, self.skipped, self.not_run
        )
    }
}

/// A node that finished COMPLETED_FAILED or ERROR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub state: NodeState,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub test_cases: StateCounts,
    pub modules: StateCounts,
    pub keywords: StateCounts,
    pub failures: Vec<FailedNode>,
    /// Nodes left NOT_RUN inside a container that did start
    pub unfinished: usize,
}

impl RunSummary {
    pub fn from_tree(tree: &ExecutionTree) -> Self {
        let mut summary = Self::default();
        for (_, node) in tree.iter() {
            summary.counts_mut(node.kind).record(node.state);
            if node.state.is_failure() {
                summary.failures.push(FailedNode {
                    id: node.id.to_string(),
                    name: node.name.clone(),
                    kind: node.kind,
                    state: node.state,
                    reason: node.last_failure_reason.clone(),
                });
            }
            if matches!(node.state, NodeState::NotRun | NodeState::Skipped) {
                continue;
            }
            summary.unfinished += node
                .children()
                .iter()
                .filter(|child| !tree.node(**child).state.is_terminal())
                .count();
        }
        summary
    }

    pub fn counts(&self, kind: NodeKind) -> &StateCounts {
        match kind {
            NodeKind::TestCase => &self.test_cases,
            NodeKind::Module => &self.modules,
            NodeKind::Keyword => &self.keywords,
        }
    }

    fn counts_mut(&mut self, kind: NodeKind) -> &mut StateCounts {
        match kind {
            NodeKind::TestCase => &mut self.test_cases,
            NodeKind::Module => &mut self.modules,
            NodeKind::Keyword => &mut self.keywords,
        }
    }

    /// No node failed or errored, and every started container ran all of
    /// its children.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.unfinished == 0
    }

    /// Failures keyed by kind, for reporting.
    pub fn failures_by_kind(&self) -> BTreeMap<&'static str, Vec<&FailedNode>> {
        let mut grouped: BTreeMap<&'static str, Vec<&FailedNode>> = BTreeMap::new();
        for failure in &self.failures {
            grouped
                .entry(failure.kind.entity_type().as_str())
                .or_default()
                .push(failure);
        }
        grouped
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "test cases: {}", self.test_cases)?;
        writeln!(f, "modules:    {}", self.modules)?;
        write!(f, "keywords:   {}", self.keywords)?;
        if self.unfinished > 0 {
            write!(f, "\n  {} node(s) never ran inside a started container", self.unfinished)?;
        }
        for failure in &self.failures {
            write!(
                f,
                "\n  {} {} '{}' ({}): {}",
                failure.state,
                failure.kind.entity_type(),
                failure.name,
                failure.id,
                failure.reason.as_deref().unwrap_or("no reason recorded")
            )?;
        }
        Ok(())
    }
}
