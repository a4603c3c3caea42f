//! External command invocation.
//!
//! Every side effect the pipeline has on the package database, the audio
//! server, the Python runtime and the init system goes through a
//! [`CommandRunner`]. [`SystemRunner`] spawns real processes; tests provide
//! scripted runners.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{ButlerError, Result};

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
    /// Needs root. Prefixed with `sudo` when the orchestrator is not root.
    #[serde(default)]
    pub privileged: bool,
    /// Capture stdout/stderr instead of streaming them to the terminal.
    #[serde(default)]
    pub capture: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            privileged: false,
            capture: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: &[(String, String)]) -> Self {
        self.env.extend(vars.iter().cloned());
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Shell-like rendering for logs and plans.
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.privileged {
            parts.push("sudo".to_string());
        }
        parts.push(self.program.clone());
        parts.extend(self.args.iter().map(|a| {
            if a.is_empty() || a.contains(char::is_whitespace) {
                format!("'{a}'")
            } else {
                a.clone()
            }
        }));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code_display(&self) -> String {
        match self.code {
            Some(c) => format!("status {c}"),
            None => "a signal".to_string(),
        }
    }
}

pub trait CommandRunner {
    /// Whether `program` can be spawned (absolute path exists, or found on PATH).
    fn is_available(&self, program: &str) -> bool;

    /// Spawn and wait. A non-zero exit is `Ok`; only a spawn failure is `Err`.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Run `invocation` and turn a non-zero exit into [`ButlerError::CommandFailed`].
pub fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<CommandOutput> {
    let output = runner.run(invocation)?;
    if !output.success() {
        let source = if output.stderr.trim().is_empty() {
            &output.stdout
        } else {
            &output.stderr
        };
        let hint = source.trim().chars().take(500).collect::<String>();
        return Err(ButlerError::CommandFailed {
            program: invocation.program.clone(),
            code: output.code_display(),
            hint,
        });
    }
    Ok(output)
}

/// Spawns real processes.
pub struct SystemRunner {
    elevated: bool,
}

impl SystemRunner {
    /// `elevated` is whether this process already runs as root.
    pub fn new(elevated: bool) -> Self {
        Self { elevated }
    }

    fn build_command(&self, inv: &Invocation) -> Command {
        let use_sudo = inv.privileged && !self.elevated && which::which("sudo").is_ok();
        let mut cmd = if use_sudo {
            // sudo resets the environment, so pass variables through env(1).
            let mut cmd = Command::new("sudo");
            if !inv.env.is_empty() {
                cmd.arg("env");
                for (k, v) in &inv.env {
                    cmd.arg(format!("{k}={v}"));
                }
            }
            cmd.arg(&inv.program);
            cmd
        } else {
            let mut cmd = Command::new(&inv.program);
            cmd.envs(inv.env.iter().map(|(k, v)| (k, v)));
            cmd
        };
        cmd.args(&inv.args);
        if let Some(dir) = &inv.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        if inv.capture {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        }
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn is_available(&self, program: &str) -> bool {
        if program.contains('/') {
            return Path::new(program).exists();
        }
        which::which(program).is_ok()
    }

    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        tracing::debug!(command = %invocation.display(), "spawning");
        let output = self
            .build_command(invocation)
            .output()
            .map_err(|e| ButlerError::SpawnFailed {
                program: invocation.program.clone(),
                reason: e.to_string(),
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
