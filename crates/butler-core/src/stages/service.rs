//! Supervised background service for embedded deployment targets.
//!
//! Nothing here has an uninstall path: the unit, the system-wide routing
//! file and the CPU governor stay until removed by hand.

use std::path::{Path, PathBuf};

use crate::action::{Action, Plan, Step, WritePolicy};
use crate::config::Config;
use crate::context::Context;
use crate::error::{ButlerError, Result};
use crate::host::{HostFacts, HostProfile};
use crate::paths;
use crate::runner::Invocation;
use crate::stages::audio;

/// Deployment only runs on an embedded host, as root. Checked before any
/// stage of the run touches the host.
pub fn preflight(host: &HostFacts) -> Result<()> {
    if host.profile != HostProfile::Embedded {
        return Err(ButlerError::WrongHost {
            marker: host.marker.clone(),
        });
    }
    if !host.elevated {
        return Err(ButlerError::NotElevated);
    }
    Ok(())
}

/// The runtime directory as seen from the deployed working directory.
fn deployed_venv(config: &Config) -> PathBuf {
    paths::resolve(Path::new(&config.service.working_dir), &config.runtime.venv_dir)
}

pub fn unit_file(config: &Config) -> String {
    let svc = &config.service;
    let working_dir = Path::new(&svc.working_dir);
    let python = paths::venv_bin(&deployed_venv(config), "python");
    let entrypoint = working_dir.join(&svc.entrypoint);
    format!(
        "[Unit]
Description={description}
After=network-online.target sound.target
Wants=network-online.target

[Service]
Type=simple
User={user}
WorkingDirectory={working_dir}
Environment=PYTHONUNBUFFERED=1
ExecStart={python} {entrypoint}
Restart={restart}
RestartSec={restart_sec}

[Install]
WantedBy=multi-user.target
",
        description = svc.description,
        user = svc.user,
        working_dir = working_dir.display(),
        python = python.display(),
        entrypoint = entrypoint.display(),
        restart = svc.restart,
        restart_sec = svc.restart_sec,
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    pub governor_files: Vec<PathBuf>,
}

pub fn observe(ctx: &Context) -> Observed {
    Observed {
        governor_files: paths::governor_files(Path::new(&ctx.config.host.cpu_sysfs_dir)),
    }
}

pub fn plan(ctx: &Context, observed: &Observed) -> Plan {
    let config = &ctx.config;
    let svc = &config.service;
    let mut plan = Plan::default();

    if observed.governor_files.is_empty() {
        plan.note("no cpufreq governors found; CPU policy left unchanged");
    }
    for file in &observed.governor_files {
        plan.push(Step::optional(
            format!("cpu governor {}", svc.cpu_governor),
            Action::WriteFile {
                path: file.clone(),
                contents: format!("{}\n", svc.cpu_governor),
                policy: WritePolicy::InPlace,
            },
        ));
    }

    plan.push(Step::required(
        "system device routing",
        Action::WriteFile {
            path: PathBuf::from(&config.audio.system_routing_file),
            contents: audio::routing_for(&config.audio),
            policy: WritePolicy::Overwrite,
        },
    ));

    let unit = svc.unit_name();
    plan.push(Step::required(
        format!("write {unit}"),
        Action::WriteFile {
            path: Path::new(&svc.unit_dir).join(&unit),
            contents: unit_file(config),
            policy: WritePolicy::Overwrite,
        },
    ));

    plan.push(Step::required(
        "reload init system",
        Action::Run {
            invocation: Invocation::new("systemctl").arg("daemon-reload").privileged(),
        },
    ));
    plan.push(Step::required(
        format!("enable {unit}"),
        Action::Run {
            invocation: Invocation::new("systemctl")
                .args(["enable", unit.as_str()])
                .privileged(),
        },
    ));
    if svc.start_now {
        plan.push(Step::required(
            format!("start {unit}"),
            Action::Run {
                invocation: Invocation::new("systemctl")
                    .args(["restart", unit.as_str()])
                    .privileged(),
            },
        ));
    }

    plan
}
