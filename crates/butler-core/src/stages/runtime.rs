//! Project layout, `.env` seeding and the isolated Python runtime.

use std::path::PathBuf;

use crate::action::{Action, Plan, Step, WritePolicy};
use crate::context::Context;
use crate::paths;
use crate::runner::Invocation;

/// Written to `.env` on first run when the project has no `.env.example`.
pub const DEFAULT_ENV_TEMPLATE: &str = "\
# Butler voice assistant settings
OPENAI_API_KEY=
ELEVENLABS_API_KEY=
JUSTDIAL_API_KEY=
DEFAULT_LOCATION=Bangalore
DEBUG=false
LOG_DIR=data/logs
CACHE_DIR=data/cache
";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    pub runtime_exists: bool,
    pub env_template_exists: bool,
    pub requirements_file: Option<PathBuf>,
}

pub fn observe(ctx: &Context) -> Observed {
    let requirements_file = ctx
        .config
        .runtime
        .requirements_file
        .as_deref()
        .map(|f| ctx.resolve(f))
        .filter(|p| p.is_file());
    Observed {
        runtime_exists: ctx.venv_python().exists(),
        env_template_exists: paths::env_template_path(&ctx.root).is_file(),
        requirements_file,
    }
}

pub fn plan(ctx: &Context, observed: &Observed) -> Plan {
    let runtime = &ctx.config.runtime;
    let mut plan = Plan::default();

    for dir in paths::DATA_DIRS.iter().chain([&paths::MODELS_DIR]) {
        plan.push(Step::required(
            format!("create {dir}/"),
            Action::EnsureDir {
                path: ctx.root.join(dir),
            },
        ));
    }

    let env_file = paths::env_path(&ctx.root);
    if observed.env_template_exists {
        plan.push(Step::required(
            "seed .env from template",
            Action::CopyIfMissing {
                from: paths::env_template_path(&ctx.root),
                to: env_file,
            },
        ));
    } else {
        plan.push(Step::required(
            "seed .env",
            Action::WriteFile {
                path: env_file,
                contents: DEFAULT_ENV_TEMPLATE.to_string(),
                policy: WritePolicy::IfMissing,
            },
        ));
    }

    let venv = ctx.venv_dir();
    if observed.runtime_exists {
        plan.note(format!("runtime {} already exists", venv.display()));
    } else {
        plan.push(Step::required(
            "create isolated runtime",
            Action::Run {
                invocation: Invocation::new(&runtime.python)
                    .args(["-m", "venv"])
                    .arg(venv.display().to_string())
                    .cwd(&ctx.root),
            },
        ));
    }

    let python = ctx.venv_python().display().to_string();
    let env = ctx.venv_env();
    plan.push(Step::required(
        "upgrade pip",
        Action::Run {
            invocation: Invocation::new(&python)
                .args(["-m", "pip", "install", "--upgrade", "pip"])
                .envs(&env)
                .cwd(&ctx.root),
        },
    ));

    let manifest = runtime.manifest(ctx.host.profile);
    if !manifest.is_empty() {
        plan.push(Step::required(
            format!("install {} runtime package(s)", manifest.len()),
            Action::Run {
                invocation: Invocation::new(&python)
                    .args(["-m", "pip", "install", "--upgrade"])
                    .args(manifest)
                    .envs(&env)
                    .cwd(&ctx.root),
            },
        ));
    }

    if let Some(req) = &observed.requirements_file {
        plan.push(Step::required(
            "install requirements file",
            Action::Run {
                invocation: Invocation::new(&python)
                    .args(["-m", "pip", "install", "-r"])
                    .arg(req.display().to_string())
                    .envs(&env)
                    .cwd(&ctx.root),
            },
        ));
    }

    plan
}
