//! Builds the execution tree from parsed suite data

use std::sync::Arc;

use optics_core_types::NodeId;
use tracing::{debug, warn};

use crate::errors::FlowError;
use crate::keyword::KeywordResolver;
use crate::model::{ExecutionTree, DEFAULT_MAX_ATTEMPTS};
use crate::suite::{SuiteData, TestCaseData};

/// Materialises test cases, their modules and the modules' keywords into a
/// fresh [`ExecutionTree`]. Every build produces new nodes with new ids.
pub struct HierarchyBuilder {
    resolver: Arc<dyn KeywordResolver>,
    max_attempts: u32,
}

impl HierarchyBuilder {
    pub fn new(resolver: Arc<dyn KeywordResolver>) -> Self {
        Self {
            resolver,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Build one test case node per queue entry.
    ///
    /// A module named by a test case but missing from the suite is a
    /// configuration error. A keyword with no action still becomes a node so
    /// that the run reports it.
    pub fn build(&self, suite: &SuiteData, queue: &[TestCaseData]) -> Result<ExecutionTree, FlowError> {
        let mut tree = ExecutionTree::new();
        for case in queue {
            let test_case = tree.add_test_case(NodeId::new(), case.name.clone(), self.max_attempts)?;
            for module_name in &case.modules {
                let module = suite.module(module_name).ok_or_else(|| {
                    FlowError::configuration(format!(
                        "module '{module_name}' used by test case '{}' is not defined",
                        case.name
                    ))
                })?;
                let module_index =
                    tree.add_module(test_case, NodeId::new(), module.name.clone(), self.max_attempts)?;

                for step in &module.steps {
                    let action = self.resolver.resolve(&step.keyword);
                    if action.is_none() {
                        warn!(
                            keyword = %step.keyword,
                            module = %module.name,
                            "keyword has no registered action"
                        );
                    }
                    tree.add_keyword(
                        module_index,
                        NodeId::new(),
                        step.keyword.clone(),
                        suite.resolve_params(&step.params),
                        action,
                        self.max_attempts,
                    )?;
                }
            }
        }
        debug!(nodes = tree.len(), test_cases = tree.roots().len(), "execution tree built");
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyword::ActionTable;
    use crate::model::{NodeKind, NodeState};
    use crate::suite::Step;

    fn suite() -> SuiteData {
        let mut suite = SuiteData::new();
        suite.add_element("LOGIN_BTN", "login_btn.png");
        suite.add_module(
            "EnterCredentials",
            vec![
                Step::new("Enter Text", vec!["USERNAME".into(), "a".into()]),
                Step::new("Press Element", vec!["${LOGIN_BTN}".into()]),
                Step::new("Launch Rocket", Vec::new()),
            ],
        );
        suite.add_test_case("Login", vec!["EnterCredentials".into()]);
        suite
    }

    fn resolver() -> Arc<dyn KeywordResolver> {
        let mut table = ActionTable::new();
        table.insert_fn("enter_text", |_| Ok(()));
        table.insert_fn("press_element", |_| Ok(()));
        Arc::new(table)
    }

    #[test]
    fn builds_hierarchy_in_declaration_order() {
        let suite = suite();
        let tree = HierarchyBuilder::new(resolver())
            .with_max_attempts(2)
            .build(&suite, &suite.test_cases)
            .unwrap();

        assert_eq!(tree.roots().len(), 1);
        let module = tree.children(tree.roots()[0])[0];
        assert_eq!(tree.node(module).kind, NodeKind::Module);

        let keywords: Vec<_> = tree.children(module).iter().map(|k| tree.node(*k)).collect();
        assert_eq!(keywords.len(), 3);
        assert_eq!(keywords[1].params, vec!["login_btn.png"]);
        assert!(keywords[0].is_resolved());
        assert!(!keywords[2].is_resolved());
        assert!(keywords
            .iter()
            .all(|k| k.state == NodeState::NotRun && k.max_attempts == 2));
    }

    #[test]
    fn missing_module_is_a_configuration_error() {
        let mut suite = suite();
        suite.add_test_case("Broken", vec!["Nowhere".into()]);
        let err = HierarchyBuilder::new(resolver())
            .build(&suite, &suite.test_cases)
            .unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));
    }

    #[test]
    fn builds_are_independent() {
        let suite = suite();
        let builder = HierarchyBuilder::new(resolver());
        let first = builder.build(&suite, &suite.test_cases).unwrap();
        let second = builder.build(&suite, &suite.test_cases).unwrap();
        assert_ne!(first.node(first.roots()[0]).id, second.node(second.roots()[0]).id);
    }
}
