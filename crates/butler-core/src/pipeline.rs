//! Stage graph and the run state machine.
//!
//! `Start → Detect → InstallPackages → ConfigureAudio → BuildRuntime →
//! ProvisionModels → [InstallService] → Done`, with any fatal step moving the
//! run to `Failed`. Stages declare their dependencies; a pipeline is a
//! validated, topologically ordered subset of stages executed one at a time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::{Applied, ExecMode, Executor, FailureClass, OnFailure, Plan};
use crate::context::Context;
use crate::error::{ButlerError, Result};
use crate::host::HostFacts;
use crate::runner::CommandRunner;
use crate::stages::audio::AudioDevice;
use crate::stages::{audio, models, packages, runtime, service};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detect,
    InstallPackages,
    ConfigureAudio,
    BuildRuntime,
    ProvisionModels,
    InstallService,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Detect,
            Stage::InstallPackages,
            Stage::ConfigureAudio,
            Stage::BuildRuntime,
            Stage::ProvisionModels,
            Stage::InstallService,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Detect => "detect",
            Stage::InstallPackages => "install_packages",
            Stage::ConfigureAudio => "configure_audio",
            Stage::BuildRuntime => "build_runtime",
            Stage::ProvisionModels => "provision_models",
            Stage::InstallService => "install_service",
        }
    }

    /// Stages that must have completed before this one starts. Package
    /// installation and runtime creation are independent of each other.
    pub fn depends_on(self) -> &'static [Stage] {
        match self {
            Stage::Detect => &[],
            Stage::InstallPackages => &[Stage::Detect],
            Stage::ConfigureAudio => &[Stage::InstallPackages],
            Stage::BuildRuntime => &[Stage::Detect],
            Stage::ProvisionModels => &[Stage::BuildRuntime],
            Stage::InstallService => &[Stage::ConfigureAudio, Stage::ProvisionModels],
        }
    }

    /// Checks that must hold before the run mutates anything.
    pub fn preflight(self, ctx: &Context) -> Result<()> {
        match self {
            Stage::InstallService => service::preflight(&ctx.host),
            _ => Ok(()),
        }
    }

    /// Observe the host and plan this stage's steps.
    pub fn plan(self, ctx: &Context, runner: &dyn CommandRunner) -> Result<Plan> {
        match self {
            Stage::Detect => {
                let mut plan = Plan::default();
                plan.note(describe_host(&ctx.host));
                Ok(plan)
            }
            Stage::InstallPackages => {
                let wanted = ctx.config.packages.package_set(ctx.host.profile);
                let observed = packages::observe(runner, &wanted)
                    .map_err(|e| FailureClass::PackageManager.wrap(e))?;
                Ok(packages::plan(ctx, &observed))
            }
            Stage::ConfigureAudio => Ok(audio::plan(ctx, audio::observe(runner))),
            Stage::BuildRuntime => Ok(runtime::plan(ctx, &runtime::observe(ctx))),
            Stage::ProvisionModels => Ok(models::plan(ctx, &models::observe(ctx))),
            Stage::InstallService => Ok(service::plan(ctx, &service::observe(ctx))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ButlerError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::all()
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ButlerError::InvalidConfig(format!("unknown stage '{s}'")))
    }
}

fn describe_host(host: &HostFacts) -> String {
    let model = host.model.as_deref().unwrap_or("unknown model");
    let privilege = if host.elevated { "root" } else { "unprivileged" };
    format!("{} host ({model}), running {privilege}", host.profile)
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Topologically order `selected`, breaking ties by their order in
/// `selected`. Every dependency must itself be selected.
fn topo_order<F>(selected: &[Stage], deps: F) -> Result<Vec<Stage>>
where
    F: Fn(Stage) -> Vec<Stage>,
{
    for &stage in selected {
        for dep in deps(stage) {
            if !selected.contains(&dep) {
                return Err(ButlerError::MissingDependency {
                    stage: stage.to_string(),
                    dependency: dep.to_string(),
                });
            }
        }
    }

    let mut ordered: Vec<Stage> = Vec::with_capacity(selected.len());
    let mut remaining: Vec<Stage> = Vec::new();
    for &stage in selected {
        if !remaining.contains(&stage) {
            remaining.push(stage);
        }
    }
    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .position(|s| deps(*s).iter().all(|d| ordered.contains(d)));
        match ready {
            Some(i) => ordered.push(remaining.remove(i)),
            None => {
                let names: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();
                return Err(ButlerError::PipelineCycle(names.join(", ")));
            }
        }
    }
    Ok(ordered)
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Start,
    Running { stage: Stage },
    Done,
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    /// A non-fatal step failed.
    Degraded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Changed,
    Unchanged,
    Planned,
    /// Non-fatal failure; the run continued.
    Tolerated { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub label: String,
    pub action: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub steps: Vec<StepReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<AudioDevice>,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Completed,
            steps: Vec::new(),
            notes: Vec::new(),
            warnings: Vec::new(),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub host: HostFacts,
    pub dry_run: bool,
    pub state: RunState,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn degraded(&self) -> bool {
        self.stages
            .iter()
            .any(|s| s.outcome == StageOutcome::Degraded)
    }

    pub fn failure(&self) -> Option<(Stage, &str)> {
        match &self.state {
            RunState::Failed { stage, reason } => Some((*stage, reason.as_str())),
            _ => None,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(selected: &[Stage]) -> Result<Self> {
        let stages = topo_order(selected, |s| s.depends_on().to_vec())?;
        Ok(Self { stages })
    }

    /// Workstation/developer provisioning: everything but the service.
    pub fn setup() -> Result<Self> {
        Self::new(&Stage::all()[..5])
    }

    /// Full deployment, service included.
    pub fn deploy() -> Result<Self> {
        Self::new(Stage::all())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn run(&self, ctx: &Context, runner: &dyn CommandRunner, mode: ExecMode) -> RunReport {
        let mut report = RunReport {
            host: ctx.host.clone(),
            dry_run: mode == ExecMode::DryRun,
            state: RunState::Start,
            stages: Vec::new(),
        };

        for &stage in &self.stages {
            if let Err(e) = stage.preflight(ctx) {
                tracing::error!(%stage, error = %e, "preflight failed, nothing was changed");
                report.state = RunState::Failed {
                    stage,
                    reason: e.to_string(),
                };
                return report;
            }
        }

        let exec = Executor::new(runner, mode);
        for &stage in &self.stages {
            report.state = RunState::Running { stage };
            tracing::info!(%stage, "stage started");

            let stage_report = run_stage(stage, ctx, runner, &exec);
            let outcome = stage_report.outcome;
            let reason = stage_report
                .steps
                .iter()
                .find_map(|s| match &s.status {
                    StepStatus::Failed { reason } => Some(reason.clone()),
                    _ => None,
                })
                .or_else(|| stage_report.warnings.last().cloned())
                .unwrap_or_default();
            report.stages.push(stage_report);

            match outcome {
                StageOutcome::Completed => tracing::info!(%stage, "stage completed"),
                StageOutcome::Degraded => tracing::warn!(%stage, "stage completed in degraded mode"),
                StageOutcome::Failed => {
                    tracing::error!(%stage, error = %reason, "stage failed, halting");
                    report.state = RunState::Failed { stage, reason };
                    return report;
                }
            }
        }

        report.state = RunState::Done;
        report
    }
}

fn run_stage(
    stage: Stage,
    ctx: &Context,
    runner: &dyn CommandRunner,
    exec: &Executor<'_>,
) -> StageReport {
    let mut report = StageReport::new(stage);

    let plan = match stage.plan(ctx, runner) {
        Ok(plan) => plan,
        Err(e) => {
            report.outcome = StageOutcome::Failed;
            report.warnings.push(e.to_string());
            return report;
        }
    };
    for note in &plan.notes {
        tracing::info!(%stage, "{note}");
    }
    report.notes = plan.notes;

    for step in &plan.steps {
        let action = step.action.describe();
        let status = match exec.apply(step) {
            Ok(Applied::Changed) => StepStatus::Changed,
            Ok(Applied::Unchanged) => StepStatus::Unchanged,
            Ok(Applied::Planned) => StepStatus::Planned,
            Ok(Applied::Devices { devices }) => {
                report.devices.extend(devices);
                StepStatus::Unchanged
            }
            Err(e) => match step.on_failure {
                OnFailure::Continue => {
                    tracing::warn!(%stage, step = %step.label, error = %e, "step failed, continuing");
                    report.warnings.push(e.to_string());
                    report.outcome = StageOutcome::Degraded;
                    StepStatus::Tolerated {
                        reason: e.to_string(),
                    }
                }
                OnFailure::Abort => StepStatus::Failed {
                    reason: e.to_string(),
                },
            },
        };
        tracing::debug!(%stage, step = %step.label, ?status, "step finished");
        let failed = matches!(status, StepStatus::Failed { .. });
        report.steps.push(StepReport {
            label: step.label.clone(),
            action,
            status,
        });
        if failed {
            report.outcome = StageOutcome::Failed;
            break;
        }
    }
    report
}
