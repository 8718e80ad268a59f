//! Deterministic fixer registry.
//!
//! Built-in fixers cover the common Go/K8s failure shapes; a project can
//! append its own via `.sdp/auto-fixers.yaml`. Every fixer is a shell
//! command, a failure-log regex deciding when it applies, and a timeout.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{CiError, Result};

/// Default command timeout when a fixer does not set one.
pub const DEFAULT_FIXER_TIMEOUT: Duration = Duration::from_secs(30);

/// One registered fixer.
#[derive(Debug, Clone)]
pub struct Fixer {
    pub name: String,
    pub command: String,
    /// Applies when this matches the failure log.
    pub applies_to: Regex,
    pub timeout: Duration,
}

impl Fixer {
    fn builtin(name: &str, command: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            applies_to: Regex::new(pattern).expect("builtin fixer pattern"),
            timeout: DEFAULT_FIXER_TIMEOUT,
        }
    }
}

/// YAML file shape: `{fixers: [{name, command, applies_to, timeout}]}`.
#[derive(Debug, Deserialize)]
struct FixerFile {
    #[serde(default)]
    fixers: Vec<FixerEntry>,
}

#[derive(Debug, Deserialize)]
struct FixerEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    applies_to: String,
    #[serde(default)]
    timeout: i64,
}

/// Ordered collection of fixers; matching preserves registration order.
#[derive(Debug, Clone)]
pub struct FixerRegistry {
    fixers: Vec<Fixer>,
}

impl FixerRegistry {
    /// Registry seeded with the built-in Go/K8s fixers.
    pub fn builtin() -> Self {
        Self {
            fixers: vec![
                Fixer::builtin(
                    "goimports",
                    "goimports -w .",
                    r"could not import|imported and not used|undefined:",
                ),
                Fixer::builtin(
                    "go-mod-tidy",
                    "go mod tidy",
                    r"missing go\.sum entry|go\.mod file not found|cannot find package",
                ),
                Fixer::builtin("go-fmt", "gofmt -w .", r"gofmt|formatting"),
            ],
        }
    }

    /// An empty registry (tests and opt-out configurations).
    pub fn empty() -> Self {
        Self { fixers: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.fixers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fixer> {
        self.fixers.iter()
    }

    /// Append fixers from a YAML file.
    ///
    /// Entries missing name, command, or pattern are dropped with a warning;
    /// non-positive timeouts normalise to the 30 s default. A missing file
    /// appends nothing. Returns the number of fixers added.
    pub fn load_yaml(&mut self, path: &Path) -> Result<usize> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(sdp_core::SdpError::io(path, e).into()),
        };
        let file: FixerFile = serde_yaml::from_str(&raw)
            .map_err(|e| CiError::Core(sdp_core::SdpError::Parse(format!(
                "{}: {e}",
                path.display()
            ))))?;

        let mut added = 0;
        for entry in file.fixers {
            if entry.name.is_empty() || entry.command.is_empty() || entry.applies_to.is_empty() {
                warn!("dropping incomplete fixer entry {:?}", entry.name);
                continue;
            }
            let applies_to = match Regex::new(&entry.applies_to) {
                Ok(re) => re,
                Err(e) => {
                    warn!("dropping fixer {:?}: bad pattern: {e}", entry.name);
                    continue;
                }
            };
            let timeout = if entry.timeout > 0 {
                Duration::from_secs(entry.timeout as u64)
            } else {
                DEFAULT_FIXER_TIMEOUT
            };
            self.fixers.push(Fixer {
                name: entry.name,
                command: entry.command,
                applies_to,
                timeout,
            });
            added += 1;
        }
        if added > 0 {
            info!("loaded {added} fixer(s) from {}", path.display());
        }
        Ok(added)
    }

    /// All fixers whose pattern matches the failure log, in registration
    /// order.
    pub fn matching_fixers(&self, failure_log: &str) -> Vec<&Fixer> {
        self.fixers
            .iter()
            .filter(|f| f.applies_to.is_match(failure_log))
            .collect()
    }
}

/// Split a command string on whitespace, honoring paired single and double
/// quotes.
pub fn split_command(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Run a fixer with the project root as working directory.
///
/// Stdout/stderr are inherited for operator visibility. The fixer's timeout
/// bounds the run; expiry kills the child and fails.
pub async fn run_fixer(fixer: &Fixer, project_root: &Path) -> Result<()> {
    let tokens = split_command(&fixer.command);
    let Some((exe, args)) = tokens.split_first() else {
        return Err(CiError::ExternalCommand(format!(
            "fixer {} has an empty command",
            fixer.name
        )));
    };

    info!(fixer = %fixer.name, "running fixer: {}", fixer.command);
    let mut child = Command::new(exe)
        .args(args)
        .current_dir(project_root)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| CiError::ExternalCommand(format!("failed to spawn {exe}: {e}")))?;

    let status = match tokio::time::timeout(fixer.timeout, child.wait()).await {
        Ok(status) => status.map_err(|e| CiError::ExternalCommand(e.to_string()))?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(CiError::FixerTimeout {
                name: fixer.name.clone(),
                seconds: fixer.timeout.as_secs(),
            });
        }
    };

    if !status.success() {
        return Err(CiError::ExternalCommand(format!(
            "fixer {} exited with {status}",
            fixer.name
        )));
    }
    Ok(())
}
