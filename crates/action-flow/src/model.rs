//! Execution model: an arena of test case, module and keyword nodes
//!
//! Nodes live in one vector and are addressed by [`NodeIndex`]. Each parent
//! owns the ordered list of its children's indices; list order is execution
//! order. Insertion (the ADD command) only touches one parent's list.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use optics_core_types::NodeId;
use optics_event_bus::{EntityType, EventStatus};
use serde::{Deserialize, Serialize};

use crate::errors::FlowError;
use crate::keyword::KeywordAction;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Run state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    NotRun,
    Running,
    CompletedPassed,
    CompletedFailed,
    Retrying,
    Skipped,
    Error,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::NotRun => "NOT_RUN",
            NodeState::Running => "RUNNING",
            NodeState::CompletedPassed => "COMPLETED_PASSED",
            NodeState::CompletedFailed => "COMPLETED_FAILED",
            NodeState::Retrying => "RETRYING",
            NodeState::Skipped => "SKIPPED",
            NodeState::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::CompletedPassed
                | NodeState::CompletedFailed
                | NodeState::Skipped
                | NodeState::Error
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, NodeState::CompletedFailed | NodeState::Error)
    }

    pub fn event_status(&self) -> EventStatus {
        match self {
            NodeState::NotRun => EventStatus::NotRun,
            NodeState::Running => EventStatus::Running,
            NodeState::CompletedPassed => EventStatus::Pass,
            NodeState::CompletedFailed => EventStatus::Fail,
            NodeState::Retrying => EventStatus::Retrying,
            NodeState::Skipped => EventStatus::Skipped,
            NodeState::Error => EventStatus::Error,
        }
    }

    /// Whether `self -> to` is a legal forward transition.
    pub fn can_transition_to(&self, to: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, to),
            (NotRun, Running)
                | (NotRun, Skipped)
                | (Running, CompletedPassed)
                | (Running, CompletedFailed)
                | (Running, Retrying)
                | (Running, Error)
                | (Retrying, Running)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    TestCase,
    Module,
    Keyword,
}

impl NodeKind {
    pub fn entity_type(&self) -> EntityType {
        match self {
            NodeKind::TestCase => EntityType::TestCase,
            NodeKind::Module => EntityType::Module,
            NodeKind::Keyword => EntityType::Keyword,
        }
    }
}

/// Stable address of a node inside its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn get(&self) -> usize {
        self.0
    }
}

pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub state: NodeState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_failure_reason: Option<String>,
    /// Keyword parameters, already resolved against the element table
    pub params: Vec<String>,
    /// `None` when the keyword name did not resolve
    pub action: Option<Arc<dyn KeywordAction>>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    children: Vec<NodeIndex>,
}

impl Node {
    fn new(id: NodeId, name: String, kind: NodeKind, max_attempts: u32) -> Self {
        Self {
            id,
            name,
            kind,
            state: NodeState::NotRun,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            last_failure_reason: None,
            params: Vec::new(),
            action: None,
            start_time: None,
            end_time: None,
            children: Vec::new(),
        }
    }

    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    pub fn is_resolved(&self) -> bool {
        self.action.is_some()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("attempt_count", &self.attempt_count)
            .field("max_attempts", &self.max_attempts)
            .field("last_failure_reason", &self.last_failure_reason)
            .field("params", &self.params)
            .field("resolved", &self.is_resolved())
            .field("children", &self.children)
            .finish()
    }
}

/// The TestCase -> Module -> Keyword hierarchy of one run.
#[derive(Debug, Default)]
pub struct ExecutionTree {
    nodes: Vec<Node>,
    roots: Vec<NodeIndex>,
    ids: HashMap<NodeId, NodeIndex>,
}

impl ExecutionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Test cases, in execution order.
    pub fn roots(&self) -> &[NodeIndex] {
        &self.roots
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index.0]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index.0]
    }

    pub fn children(&self, index: NodeIndex) -> &[NodeIndex] {
        &self.nodes[index.0].children
    }

    pub fn get(&self, id: &str) -> Option<NodeIndex> {
        self.ids.get(&NodeId::from(id)).copied()
    }

    /// First node of `kind` named `name`, in arena order.
    pub fn find(&self, kind: NodeKind, name: &str) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .position(|node| node.kind == kind && node.name == name)
            .map(NodeIndex)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeIndex(index), node))
    }

    pub fn add_test_case(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        max_attempts: u32,
    ) -> Result<NodeIndex, FlowError> {
        let index = self.push(Node::new(id, name.into(), NodeKind::TestCase, max_attempts))?;
        self.roots.push(index);
        Ok(index)
    }

    pub fn add_module(
        &mut self,
        test_case: NodeIndex,
        id: NodeId,
        name: impl Into<String>,
        max_attempts: u32,
    ) -> Result<NodeIndex, FlowError> {
        self.expect_kind(test_case, NodeKind::TestCase)?;
        let index = self.push(Node::new(id, name.into(), NodeKind::Module, max_attempts))?;
        self.nodes[test_case.0].children.push(index);
        Ok(index)
    }

    pub fn add_keyword(
        &mut self,
        module: NodeIndex,
        id: NodeId,
        name: impl Into<String>,
        params: Vec<String>,
        action: Option<Arc<dyn KeywordAction>>,
        max_attempts: u32,
    ) -> Result<NodeIndex, FlowError> {
        self.insert_keyword(module, None, id, name, params, action, max_attempts)
    }

    /// Insert a keyword into `module` right after `after`, or at the end when
    /// `after` is `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_keyword(
        &mut self,
        module: NodeIndex,
        after: Option<NodeIndex>,
        id: NodeId,
        name: impl Into<String>,
        params: Vec<String>,
        action: Option<Arc<dyn KeywordAction>>,
        max_attempts: u32,
    ) -> Result<NodeIndex, FlowError> {
        self.expect_kind(module, NodeKind::Module)?;
        let position = match after {
            Some(after) => {
                let found = self.nodes[module.0]
                    .children
                    .iter()
                    .position(|child| *child == after)
                    .ok_or_else(|| {
                        FlowError::InvalidStructure(format!(
                            "{} is not a keyword of module {}",
                            self.nodes[after.0].id, self.nodes[module.0].id
                        ))
                    })?;
                found + 1
            }
            None => self.nodes[module.0].children.len(),
        };

        let mut node = Node::new(id, name.into(), NodeKind::Keyword, max_attempts);
        node.params = params;
        node.action = action;
        let index = self.push(node)?;
        self.nodes[module.0].children.insert(position, index);
        Ok(index)
    }

    /// Parent of a node, found by scanning the children lists.
    pub fn parent_of(&self, index: NodeIndex) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .position(|node| node.children.contains(&index))
            .map(NodeIndex)
    }

    /// Ancestors from the direct parent up to the test case.
    pub fn ancestors(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut chain = Vec::new();
        let mut current = index;
        while let Some(parent) = self.parent_of(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// The node and everything below it, in execution order.
    pub fn subtree(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut order = Vec::new();
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.nodes[current.0].children.iter().rev().copied());
        }
        order
    }

    /// Apply a forward transition, returning the previous state.
    ///
    /// Entering RUNNING consumes one attempt; it fails once the attempt budget
    /// is spent, which keeps `attempt_count <= max_attempts`.
    pub fn transition(&mut self, index: NodeIndex, to: NodeState) -> Result<NodeState, FlowError> {
        let node = &mut self.nodes[index.0];
        let from = node.state;
        if !from.can_transition_to(to) {
            return Err(FlowError::InvalidTransition {
                node: node.id.to_string(),
                from,
                to,
            });
        }
        if to == NodeState::Running {
            if node.attempt_count >= node.max_attempts {
                return Err(FlowError::RetryBudgetExceeded {
                    node: node.id.to_string(),
                    attempts: node.attempt_count,
                    last: node.last_failure_reason.clone().unwrap_or_default(),
                });
            }
            node.attempt_count += 1;
        }
        node.state = to;
        Ok(from)
    }

    /// Overwrite a finished container's state after one of its children was
    /// re-run. Returns the previous state.
    pub fn settle(&mut self, index: NodeIndex, state: NodeState) -> NodeState {
        std::mem::replace(&mut self.nodes[index.0].state, state)
    }

    /// Put a subtree back to NOT_RUN with a fresh attempt budget.
    pub fn reset_subtree(&mut self, index: NodeIndex) {
        for current in self.subtree(index) {
            let node = &mut self.nodes[current.0];
            node.state = NodeState::NotRun;
            node.attempt_count = 0;
            node.last_failure_reason = None;
            node.start_time = None;
            node.end_time = None;
        }
    }

    /// State a container takes from its children: ERROR beats
    /// COMPLETED_FAILED beats COMPLETED_PASSED. A child that never finished
    /// counts as COMPLETED_FAILED; SKIPPED children count as passed.
    pub fn derived_state(&self, index: NodeIndex) -> NodeState {
        let children = &self.nodes[index.0].children;
        let states = children.iter().map(|child| self.nodes[child.0].state);
        let mut derived = NodeState::CompletedPassed;
        for state in states {
            match state {
                NodeState::Error => return NodeState::Error,
                NodeState::CompletedFailed
                | NodeState::NotRun
                | NodeState::Running
                | NodeState::Retrying => derived = NodeState::CompletedFailed,
                NodeState::CompletedPassed | NodeState::Skipped => {}
            }
        }
        derived
    }

    fn push(&mut self, node: Node) -> Result<NodeIndex, FlowError> {
        if self.ids.contains_key(&node.id) {
            return Err(FlowError::DuplicateNode(node.id.to_string()));
        }
        let index = NodeIndex(self.nodes.len());
        self.ids.insert(node.id.clone(), index);
        self.nodes.push(node);
        Ok(index)
    }

    fn expect_kind(&self, index: NodeIndex, kind: NodeKind) -> Result<(), FlowError> {
        let node = self
            .nodes
            .get(index.0)
            .ok_or_else(|| FlowError::NodeNotFound(format!("index {}", index.0)))?;
        if node.kind != kind {
            return Err(FlowError::InvalidStructure(format!(
                "{} is a {:?}, expected a {:?}",
                node.id, node.kind, kind
            )));
        }
        Ok(())
    }
}
