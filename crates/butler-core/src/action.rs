//! Planned provisioning steps and the executor that applies them.
//!
//! Stages never mutate the host directly. They return a list of [`Step`]s,
//! and the [`Executor`] applies each one (or only reports it in dry-run
//! mode). File actions are idempotent by construction except
//! [`Action::AppendLines`] without `dedupe`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ButlerError, Result};
use crate::io;
use crate::runner::{run_checked, CommandRunner, Invocation};
use crate::stages::audio::{parse_device_list, AudioDevice, DeviceDirection};

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    Overwrite,
    IfMissing,
    /// Truncate and rewrite the existing file. For kernel control files.
    InPlace,
}

/// What a failing step does to its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Halt the pipeline.
    Abort,
    /// Log, mark the stage degraded and keep going.
    Continue,
}

/// Error category a failing step is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    PackageManager,
    AudioTool,
    ModelFetch,
    Training,
    Other,
}

impl FailureClass {
    pub fn wrap(self, err: ButlerError) -> ButlerError {
        match self {
            FailureClass::PackageManager => ButlerError::PackageManager(err.to_string()),
            FailureClass::ModelFetch => ButlerError::ModelFetch(err.to_string()),
            FailureClass::Training => ButlerError::Training(err.to_string()),
            // A missing audio tool is already AudioToolMissing; a tool that
            // ran and failed keeps its exit status.
            FailureClass::AudioTool | FailureClass::Other => err,
        }
    }
}

// ---------------------------------------------------------------------------
// Action / Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    EnsureDir {
        path: PathBuf,
    },
    WriteFile {
        path: PathBuf,
        contents: String,
        policy: WritePolicy,
    },
    CopyIfMissing {
        from: PathBuf,
        to: PathBuf,
    },
    AppendLines {
        path: PathBuf,
        lines: Vec<String>,
        #[serde(default)]
        dedupe: bool,
    },
    Run {
        invocation: Invocation,
    },
    ListDevices {
        direction: DeviceDirection,
        invocation: Invocation,
    },
    /// Fails unless every one of `files` exists under `dir`.
    RequireFiles {
        what: String,
        dir: PathBuf,
        files: Vec<String>,
    },
}

impl Action {
    /// One-line human description used by `butler plan`.
    pub fn describe(&self) -> String {
        match self {
            Action::EnsureDir { path } => format!("mkdir -p {}", path.display()),
            Action::WriteFile { path, policy, .. } => match policy {
                WritePolicy::Overwrite => format!("write {}", path.display()),
                WritePolicy::IfMissing => format!("write {} (if missing)", path.display()),
                WritePolicy::InPlace => format!("write {} (in place)", path.display()),
            },
            Action::CopyIfMissing { from, to } => {
                format!("copy {} -> {} (if missing)", from.display(), to.display())
            }
            Action::AppendLines { path, lines, dedupe } => format!(
                "append {} line(s) to {}{}",
                lines.len(),
                path.display(),
                if *dedupe { " (skip existing)" } else { "" }
            ),
            Action::Run { invocation } => invocation.display(),
            Action::ListDevices { invocation, .. } => invocation.display(),
            Action::RequireFiles { dir, files, .. } => {
                format!("check {} in {}", files.join(", "), dir.display())
            }
        }
    }

    fn is_read_only(&self) -> bool {
        matches!(self, Action::ListDevices { .. } | Action::RequireFiles { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub label: String,
    pub action: Action,
    pub on_failure: OnFailure,
    pub class: FailureClass,
}

impl Step {
    /// A step whose failure halts the pipeline.
    pub fn required(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
            on_failure: OnFailure::Abort,
            class: FailureClass::Other,
        }
    }

    /// A step whose failure only degrades the run.
    pub fn optional(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
            on_failure: OnFailure::Continue,
            class: FailureClass::Other,
        }
    }

    pub fn class(mut self, class: FailureClass) -> Self {
        self.class = class;
        self
    }
}

/// The steps a stage wants applied, plus planning-time notes (skipped
/// work, missing tools) surfaced as warnings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Plan {
    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Apply,
    /// Report steps without applying them. Read-only probes still run.
    DryRun,
}

/// Result of applying a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Applied {
    Changed,
    /// The target was already in the desired state.
    Unchanged,
    /// Dry-run: would have been applied.
    Planned,
    Devices { devices: Vec<AudioDevice> },
}

pub struct Executor<'a> {
    runner: &'a dyn CommandRunner,
    mode: ExecMode,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, mode: ExecMode) -> Self {
        Self { runner, mode }
    }

    /// Apply one step. Errors are already wrapped in the step's failure class.
    pub fn apply(&self, step: &Step) -> Result<Applied> {
        if self.mode == ExecMode::DryRun && !step.action.is_read_only() {
            return Ok(Applied::Planned);
        }
        self.apply_action(&step.action).map_err(|e| step.class.wrap(e))
    }

    fn apply_action(&self, action: &Action) -> Result<Applied> {
        match action {
            Action::EnsureDir { path } => {
                if path.is_dir() {
                    return Ok(Applied::Unchanged);
                }
                io::ensure_dir(path)?;
                Ok(Applied::Changed)
            }
            Action::WriteFile {
                path,
                contents,
                policy,
            } => match policy {
                WritePolicy::Overwrite => {
                    if std::fs::read_to_string(path).is_ok_and(|existing| existing == *contents) {
                        return Ok(Applied::Unchanged);
                    }
                    io::atomic_write(path, contents.as_bytes())?;
                    Ok(Applied::Changed)
                }
                WritePolicy::InPlace => {
                    if std::fs::read_to_string(path).is_ok_and(|existing| existing == *contents) {
                        return Ok(Applied::Unchanged);
                    }
                    io::write_in_place(path, contents.as_bytes())?;
                    Ok(Applied::Changed)
                }
                WritePolicy::IfMissing => {
                    if io::write_if_missing(path, contents.as_bytes())? {
                        Ok(Applied::Changed)
                    } else {
                        Ok(Applied::Unchanged)
                    }
                }
            },
            Action::CopyIfMissing { from, to } => {
                if io::copy_if_missing(from, to)? {
                    Ok(Applied::Changed)
                } else {
                    Ok(Applied::Unchanged)
                }
            }
            Action::AppendLines {
                path,
                lines,
                dedupe,
            } => {
                if *dedupe {
                    if io::append_missing_lines(path, lines)? == 0 {
                        return Ok(Applied::Unchanged);
                    }
                } else {
                    io::append_lines(path, lines)?;
                }
                Ok(Applied::Changed)
            }
            Action::Run { invocation } => {
                run_checked(self.runner, invocation)?;
                Ok(Applied::Changed)
            }
            Action::ListDevices {
                direction,
                invocation,
            } => {
                if !self.runner.is_available(&invocation.program) {
                    return Err(ButlerError::AudioToolMissing(format!(
                        "'{}' not found; install alsa-utils to list {} devices",
                        invocation.program, direction
                    )));
                }
                let output = run_checked(self.runner, invocation)?;
                Ok(Applied::Devices {
                    devices: parse_device_list(*direction, &output.stdout),
                })
            }
            Action::RequireFiles { what, dir, files } => {
                let missing: Vec<&str> = files
                    .iter()
                    .filter(|f| !dir.join(f).is_file())
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(ButlerError::Incomplete {
                        what: what.clone(),
                        dir: dir.display().to_string(),
                        missing: missing.join(", "),
                    });
                }
                Ok(Applied::Unchanged)
            }
        }
    }
}
