use crate::output::{print_json, print_table};
use anyhow::Context as _;
use butler_core::action::ExecMode;
use butler_core::pipeline::{StageReport, StepStatus};
use butler_core::runner::SystemRunner;
use butler_core::state::{RunRecord, State};
use butler_core::{Pipeline, RunReport};
use chrono::Utc;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Setup,
    Deploy,
}

impl Target {
    fn command(self) -> &'static str {
        match self {
            Target::Setup => "setup",
            Target::Deploy => "deploy",
        }
    }

    fn pipeline(self) -> butler_core::Result<Pipeline> {
        match self {
            Target::Setup => Pipeline::setup(),
            Target::Deploy => Pipeline::deploy(),
        }
    }
}

pub fn run(root: &Path, target: Target, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let ctx = super::load_context(root)?;
    let pipeline = target.pipeline()?;
    let runner = SystemRunner::new(ctx.host.elevated);
    let mode = if dry_run { ExecMode::DryRun } else { ExecMode::Apply };

    tracing::info!(
        command = target.command(),
        profile = %ctx.host.profile,
        elevated = ctx.host.elevated,
        dry_run,
        root = %root.display(),
        "run started"
    );
    let started_at = Utc::now();
    let report = pipeline.run(&ctx, &runner, mode);

    // A run refused at preflight touched nothing, history included.
    if !dry_run && !report.stages.is_empty() {
        let mut state = State::load(root).context("failed to load run history")?;
        state.record(RunRecord::from_report(target.command(), started_at, &report));
        state.save(root).context("failed to save run history")?;
    }

    if json {
        print_json(&report)?;
    } else {
        print_report(target, &report);
    }

    if let Some((stage, reason)) = report.failure() {
        anyhow::bail!("{} failed at {stage}: {reason}", target.command());
    }
    Ok(())
}

fn print_report(target: Target, report: &RunReport) {
    let heading = if report.dry_run {
        format!("Plan for {} (nothing applied)", target.command())
    } else {
        format!("{} on {} host", target.command(), report.host.profile)
    };
    println!("{heading}");

    for stage in &report.stages {
        print_stage(stage);
    }

    if report.succeeded() {
        let summary = match (report.dry_run, report.degraded()) {
            (true, _) => "plan complete",
            (false, true) => "done (degraded, see warnings above)",
            (false, false) => "done",
        };
        println!("\n{summary}");
    }
}

fn print_stage(stage: &StageReport) {
    println!("\n[{}] {}", stage.stage, outcome_label(stage));
    if !stage.steps.is_empty() {
        let rows = stage
            .steps
            .iter()
            .map(|s| vec![status_label(&s.status).to_string(), s.label.clone(), s.action.clone()])
            .collect();
        print_table(&["STATUS", "STEP", "ACTION"], rows);
    }
    for d in &stage.devices {
        println!("  {} device: {} {} ({})", d.direction, d.address(), d.card_name, d.device_name);
    }
    for note in &stage.notes {
        println!("  note: {note}");
    }
    for warning in &stage.warnings {
        println!("  warning: {warning}");
    }
}

fn outcome_label(stage: &StageReport) -> &'static str {
    use butler_core::pipeline::StageOutcome;
    match stage.outcome {
        StageOutcome::Completed => "completed",
        StageOutcome::Degraded => "degraded",
        StageOutcome::Failed => "failed",
    }
}

fn status_label(status: &StepStatus) -> &'static str {
    match status {
        StepStatus::Changed => "changed",
        StepStatus::Unchanged => "ok",
        StepStatus::Planned => "planned",
        StepStatus::Tolerated { .. } => "tolerated",
        StepStatus::Failed { .. } => "FAILED",
    }
}
