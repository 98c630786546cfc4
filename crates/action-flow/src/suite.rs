//! Parsed suite data, test case filtering and the execution queue

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::FlowError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseData {
    pub name: String,
    /// Module names, in execution order
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub keyword: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl Step {
    pub fn new(keyword: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            keyword: keyword.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleData {
    pub name: String,
    pub steps: Vec<Step>,
}

/// Test cases, modules and elements read from a project, in declaration
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteData {
    pub test_cases: Vec<TestCaseData>,
    pub modules: Vec<ModuleData>,
    pub elements: BTreeMap<String, String>,
}

impl SuiteData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a test case; a case with the same name is replaced in place.
    pub fn add_test_case(&mut self, name: impl Into<String>, modules: Vec<String>) {
        let case = TestCaseData {
            name: name.into(),
            modules,
        };
        match self.test_cases.iter_mut().find(|existing| existing.name == case.name) {
            Some(existing) => {
                warn!(test_case = %case.name, "duplicate test case overwritten");
                *existing = case;
            }
            None => self.test_cases.push(case),
        }
    }

    /// Add a module; a module with the same name is replaced in place.
    pub fn add_module(&mut self, name: impl Into<String>, steps: Vec<Step>) {
        let module = ModuleData {
            name: name.into(),
            steps,
        };
        match self.modules.iter_mut().find(|existing| existing.name == module.name) {
            Some(existing) => {
                warn!(module = %module.name, "duplicate module overwritten");
                *existing = module;
            }
            None => self.modules.push(module),
        }
    }

    pub fn add_element(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if self.elements.insert(name.clone(), value.into()).is_some() {
            warn!(element = %name, "duplicate element overwritten");
        }
    }

    /// Fold another suite into this one; later definitions win.
    pub fn merge(&mut self, other: SuiteData) {
        for case in other.test_cases {
            self.add_test_case(case.name, case.modules);
        }
        for module in other.modules {
            self.add_module(module.name, module.steps);
        }
        for (name, value) in other.elements {
            self.add_element(name, value);
        }
    }

    pub fn test_case(&self, name: &str) -> Option<&TestCaseData> {
        self.test_cases.iter().find(|case| case.name == name)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleData> {
        self.modules.iter().find(|module| module.name == name)
    }

    pub fn element(&self, name: &str) -> Option<&str> {
        self.elements.get(name).map(String::as_str)
    }

    /// Replace `${name}` references with element values. Unknown references
    /// are left as written.
    pub fn resolve_param(&self, param: &str) -> String {
        let mut resolved = String::with_capacity(param.len());
        let mut rest = param;
        while let Some(start) = rest.find("${") {
            resolved.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                resolved.push_str(&rest[start..]);
                return resolved;
            };
            let name = after[..end].trim();
            match self.element(name) {
                Some(value) => resolved.push_str(value),
                None => {
                    warn!(element = name, "unresolved element reference");
                    resolved.push_str(&rest[start..start + 2 + end + 1]);
                }
            }
            rest = &after[end + 1..];
        }
        resolved.push_str(rest);
        resolved
    }

    pub fn resolve_params(&self, params: &[String]) -> Vec<String> {
        params.iter().map(|param| self.resolve_param(param)).collect()
    }
}

fn is_setup_or_teardown(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("setup") || lower.contains("teardown")
}

/// Keep the cases named in `include`, or drop the ones named in `exclude`.
/// Matching is case-insensitive; setup and teardown cases are always kept.
pub fn filter_test_cases(
    cases: &[TestCaseData],
    include: &[String],
    exclude: &[String],
) -> Result<Vec<TestCaseData>, FlowError> {
    if !include.is_empty() && !exclude.is_empty() {
        return Err(FlowError::configuration(
            "provide either include or exclude, not both",
        ));
    }
    let include: HashSet<String> = include.iter().map(|name| name.trim().to_lowercase()).collect();
    let exclude: HashSet<String> = exclude.iter().map(|name| name.trim().to_lowercase()).collect();

    Ok(cases
        .iter()
        .filter(|case| {
            if is_setup_or_teardown(&case.name) {
                return true;
            }
            let lower = case.name.to_lowercase();
            if !include.is_empty() {
                include.contains(&lower)
            } else {
                !exclude.contains(&lower)
            }
        })
        .cloned()
        .collect())
}

/// Order cases for execution: suite setup, then each selected case
/// (optionally wrapped in the per-case setup and teardown), then suite
/// teardown.
///
/// `selection` restricts the regular cases by name, case-insensitively; a
/// selection that matches nothing is an error.
pub fn execution_queue(
    cases: &[TestCaseData],
    selection: &[String],
    per_case_setup_teardown: bool,
) -> Result<Vec<TestCaseData>, FlowError> {
    let mut suite_setup = None;
    let mut suite_teardown = None;
    let mut setup = None;
    let mut teardown = None;
    let mut regular = Vec::new();

    for case in cases {
        let lower = case.name.to_lowercase();
        let is_suite = lower.contains("suite");
        if is_suite && lower.contains("setup") {
            suite_setup = Some(case);
        } else if is_suite && lower.contains("teardown") {
            suite_teardown = Some(case);
        } else if lower.contains("setup") && setup.is_none() {
            setup = Some(case);
        } else if lower.contains("teardown") && teardown.is_none() {
            teardown = Some(case);
        } else {
            regular.push(case);
        }
    }

    let selection: HashSet<String> = selection
        .iter()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    if !selection.is_empty() {
        regular.retain(|case| selection.contains(&case.name.to_lowercase()));
        if regular.is_empty() {
            let mut names: Vec<&String> = selection.iter().collect();
            names.sort();
            return Err(FlowError::configuration(format!(
                "none of the specified test cases found: {names:?}"
            )));
        }
    }

    let mut queue = Vec::new();
    queue.extend(suite_setup.cloned());
    for case in regular {
        if per_case_setup_teardown {
            queue.extend(setup.cloned());
        }
        queue.push(case.clone());
        if per_case_setup_teardown {
            queue.extend(teardown.cloned());
        }
    }
    queue.extend(suite_teardown.cloned());
    debug!(
        queue = ?queue.iter().map(|case| case.name.as_str()).collect::<Vec<_>>(),
        "execution queue built"
    );
    Ok(queue)
}
