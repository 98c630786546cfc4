//! Console controller: turns stdin lines into bus commands.
//!
//! Runs on a plain thread and publishes through the synchronous bridge, so
//! a slow terminal never stalls the engine.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use optics_event_bus::{CommandKind, SyncEventManager};
use tracing::{debug, info, warn};

pub const HELP: &str = "\
commands: pause | resume | skip <id> | retry <id> | add <module-id> <after-id|-> <keyword> [params..]
quote arguments containing spaces: add m1 - \"Press Element\" Login";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLine {
    pub kind: CommandKind,
    pub entity_id: String,
    pub params: Vec<String>,
    pub parent_id: Option<String>,
}

impl ControlLine {
    fn new(kind: CommandKind, entity_id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            params: Vec::new(),
            parent_id: None,
        }
    }
}

pub fn spawn_controller(bus: Arc<SyncEventManager>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("optics-console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let control = match parse_control_line(&line) {
                    Ok(Some(control)) => control,
                    Ok(None) => continue,
                    Err(reason) => {
                        warn!("{reason}");
                        continue;
                    }
                };
                info!(command = %control.kind, id = %control.entity_id, "console command");
                if let Err(err) = bus.publish_command(
                    control.kind,
                    control.entity_id,
                    control.params,
                    control.parent_id,
                ) {
                    debug!("console controller stopping: {err}");
                    break;
                }
            }
        })
}

/// Parse one console line. Blank lines and `#` comments yield `None`.
pub fn parse_control_line(line: &str) -> Result<Option<ControlLine>, String> {
    let tokens = tokenize(line)?;
    let Some((verb, args)) = tokens.split_first() else {
        return Ok(None);
    };
    if verb.starts_with('#') {
        return Ok(None);
    }

    let kind: CommandKind = verb.parse()?;
    let control = match kind {
        CommandKind::Pause | CommandKind::Resume => {
            if !args.is_empty() {
                return Err(format!("'{verb}' takes no arguments"));
            }
            ControlLine::new(kind, "")
        }
        CommandKind::Skip | CommandKind::Retry => match args {
            [id] => ControlLine::new(kind, id.as_str()),
            _ => return Err(format!("usage: {verb} <id>")),
        },
        CommandKind::Add => match args {
            [parent, after, keyword, params @ ..] => {
                let anchor = if after == "-" { "" } else { after.as_str() };
                let mut control = ControlLine::new(kind, anchor);
                control.parent_id = Some(parent.clone());
                control.params = std::iter::once(keyword.clone())
                    .chain(params.iter().cloned())
                    .collect();
                control
            }
            _ => return Err("usage: add <module-id> <after-id|-> <keyword> [params..]".to_string()),
        },
    };
    Ok(Some(control))
}

/// Whitespace split honouring double quotes.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for ch in line.trim().chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quoted {
        return Err(format!("unterminated quote in '{line}'"));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
