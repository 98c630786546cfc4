//! YAML suite reader
//!
//! A project folder holds any number of `*.yml` / `*.yaml` files. Each may
//! carry `Test Cases`, `Modules` and `Elements` sections:
//!
//! ```yaml
//! Test Cases:
//!   Login Test:
//!     - Launch App
//!     - Sign In
//! Modules:
//!   Sign In:
//!     - Enter Text: ["${username_field}", "alice"]
//!     - Press Element: "${login_button}"
//!     - Press Keycode 66
//! Elements:
//!   username_field: //android.widget.EditText[@resource-id='user']
//!   login_button: Login
//! ```
//!
//! A step is either a single-entry mapping `keyword: params` or a plain
//! string naming a keyword without parameters. Files are read in file-name
//! order; a later definition of the same name replaces the earlier one.

use std::fs;
use std::path::{Path, PathBuf};

use optics_flow::{Step, SuiteData};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::config::PROJECT_CONFIG_FILE;
use crate::errors::SuiteError;

pub const TEST_CASES_KEY: &str = "Test Cases";
pub const MODULES_KEY: &str = "Modules";
pub const ELEMENTS_KEY: &str = "Elements";

const SUITE_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// Read and merge every suite file of a project folder.
///
/// The folder must define at least one test case and one module.
pub fn read_project(folder: &Path) -> Result<SuiteData, SuiteError> {
    let entries = fs::read_dir(folder).map_err(|source| SuiteError::Read {
        path: folder.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| SuiteError::Read {
                path: folder.to_path_buf(),
                source,
            })?
            .path();
        if is_suite_file(&path) {
            files.push(path);
        }
    }
    files.sort();

    let mut suite = SuiteData::new();
    for path in &files {
        let parsed = read_file(path)?;
        debug!(
            file = %path.display(),
            test_cases = parsed.test_cases.len(),
            modules = parsed.modules.len(),
            elements = parsed.elements.len(),
            "suite file read"
        );
        suite.merge(parsed);
    }

    let mut missing = Vec::new();
    if suite.test_cases.is_empty() {
        missing.push("test_cases");
    }
    if suite.modules.is_empty() {
        missing.push("modules");
    }
    if !missing.is_empty() {
        return Err(SuiteError::MissingContent {
            folder: folder.to_path_buf(),
            missing: missing.join(", "),
        });
    }

    info!(
        folder = %folder.display(),
        files = files.len(),
        test_cases = suite.test_cases.len(),
        modules = suite.modules.len(),
        elements = suite.elements.len(),
        "project loaded"
    );
    Ok(suite)
}

fn is_suite_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    if path.file_name().and_then(|name| name.to_str()) == Some(PROJECT_CONFIG_FILE) {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUITE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

pub fn read_file(path: &Path) -> Result<SuiteData, SuiteError> {
    let content = fs::read_to_string(path).map_err(|source| SuiteError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_suite(path, &content)
}

/// Parse one suite document. `path` is only used in error messages.
pub fn parse_suite(path: &Path, content: &str) -> Result<SuiteData, SuiteError> {
    let document: Value = serde_yaml::from_str(content).map_err(|source| SuiteError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let mut suite = SuiteData::new();
    let root = match document {
        Value::Null => return Ok(suite),
        Value::Mapping(root) => root,
        _ => return Err(SuiteError::format(path, "top level must be a mapping")),
    };

    if let Some(cases) = section(path, &root, TEST_CASES_KEY)? {
        for (name, modules) in cases {
            let name = scalar(path, name, "test case name")?;
            let modules = match modules {
                Value::Null => Vec::new(),
                Value::Sequence(items) => items
                    .iter()
                    .map(|item| scalar(path, item, "module name"))
                    .collect::<Result<_, _>>()?,
                other => vec![scalar(path, other, "module name")?],
            };
            suite.add_test_case(name, modules);
        }
    }

    if let Some(modules) = section(path, &root, MODULES_KEY)? {
        for (name, steps) in modules {
            let name = scalar(path, name, "module name")?;
            let steps = match steps {
                Value::Null => Vec::new(),
                Value::Sequence(items) => items
                    .iter()
                    .map(|item| step(path, &name, item))
                    .collect::<Result<_, _>>()?,
                _ => {
                    return Err(SuiteError::format(
                        path,
                        format!("steps of module '{name}' must be a list"),
                    ))
                }
            };
            suite.add_module(name, steps);
        }
    }

    if let Some(elements) = section(path, &root, ELEMENTS_KEY)? {
        for (name, value) in elements {
            let name = scalar(path, name, "element name")?;
            let value = scalar(path, value, "element value")?;
            suite.add_element(name, value);
        }
    }

    Ok(suite)
}

fn section<'a>(
    path: &Path,
    root: &'a Mapping,
    key: &str,
) -> Result<Option<&'a Mapping>, SuiteError> {
    match root.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Mapping(section)) => Ok(Some(section)),
        Some(_) => Err(SuiteError::format(path, format!("'{key}' must be a mapping"))),
    }
}

fn step(path: &Path, module: &str, item: &Value) -> Result<Step, SuiteError> {
    match item {
        Value::Mapping(entry) if entry.len() == 1 => {
            let Some((keyword, params)) = entry.iter().next() else {
                return Err(SuiteError::format(path, format!("empty step in module '{module}'")));
            };
            let keyword = scalar(path, keyword, "keyword")?;
            let params = match params {
                Value::Null => Vec::new(),
                Value::Sequence(items) => items
                    .iter()
                    .map(|param| scalar(path, param, "keyword parameter"))
                    .collect::<Result<_, _>>()?,
                other => vec![scalar(path, other, "keyword parameter")?],
            };
            Ok(Step::new(keyword, params))
        }
        Value::Mapping(_) => Err(SuiteError::format(
            path,
            format!("a step in module '{module}' must name exactly one keyword"),
        )),
        other => Ok(Step::new(scalar(path, other, "keyword")?, Vec::new())),
    }
}

fn scalar(path: &Path, value: &Value, what: &str) -> Result<String, SuiteError> {
    match value {
        Value::String(text) => Ok(text.trim().to_string()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(SuiteError::format(path, format!("{what} must be a scalar"))),
    }
}
