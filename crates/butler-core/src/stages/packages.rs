use std::collections::BTreeSet;

use crate::action::{Action, FailureClass, Plan, Step};
use crate::context::Context;
use crate::error::Result;
use crate::runner::{CommandRunner, Invocation};

/// Packages the package database reports as installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    pub installed: BTreeSet<String>,
    /// `false` when dpkg-query is missing; every package counts as missing.
    pub queried: bool,
}

pub fn observe(runner: &dyn CommandRunner, wanted: &[String]) -> Result<Observed> {
    if wanted.is_empty() || !runner.is_available("dpkg-query") {
        return Ok(Observed::default());
    }
    let query = Invocation::new("dpkg-query")
        .args(["-W", "-f", "${Package}\\t${Status}\\n"])
        .args(wanted.iter().cloned())
        .captured();
    // dpkg-query exits 1 when any name is unknown but still lists the rest.
    let output = runner.run(&query)?;
    Ok(Observed {
        installed: parse_dpkg_status(&output.stdout),
        queried: true,
    })
}

/// Names whose status is `install ok installed` in `dpkg-query -W` output.
pub fn parse_dpkg_status(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let (name, status) = line.split_once('\t')?;
            (status.trim() == "install ok installed").then(|| name.trim().to_string())
        })
        .collect()
}

pub fn missing(wanted: &[String], observed: &Observed) -> Vec<String> {
    wanted
        .iter()
        .filter(|p| !observed.installed.contains(p.as_str()))
        .cloned()
        .collect()
}

pub fn plan(ctx: &Context, observed: &Observed) -> Plan {
    let wanted = ctx.config.packages.package_set(ctx.host.profile);
    let mut plan = Plan::default();
    if !observed.queried {
        plan.note("dpkg-query not available; treating every package as missing");
    }

    let missing = missing(&wanted, observed);
    if missing.is_empty() {
        plan.note(format!("all {} packages already installed", wanted.len()));
        return plan;
    }

    plan.push(
        Step::required(
            "refresh package index",
            Action::Run {
                invocation: Invocation::new("apt-get").arg("update").privileged(),
            },
        )
        .class(FailureClass::PackageManager),
    );
    plan.push(
        Step::required(
            format!("install {} package(s)", missing.len()),
            Action::Run {
                invocation: Invocation::new("apt-get")
                    .args(["install", "-y", "--no-install-recommends"])
                    .args(missing)
                    .env("DEBIAN_FRONTEND", "noninteractive")
                    .privileged(),
            },
        )
        .class(FailureClass::PackageManager),
    );
    plan
}
