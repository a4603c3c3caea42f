use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;

use butler_core::action::ExecMode;
use butler_core::config::Config;
use butler_core::host::{HostFacts, HostProfile};
use butler_core::pipeline::{StageOutcome, StepStatus};
use butler_core::runner::{CommandOutput, CommandRunner, Invocation};
use butler_core::{Context, Pipeline, Result, RunState, Stage};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Scripted runner
// ---------------------------------------------------------------------------

/// Simulates apt, pip, whisper, rasa and systemctl well enough for the
/// pipeline to observe its own effects on a second run.
struct ScriptedRunner {
    calls: RefCell<Vec<Invocation>>,
    installed: RefCell<BTreeSet<String>>,
    fail: Box<dyn Fn(&Invocation) -> bool>,
}

impl ScriptedRunner {
    fn new() -> Self {
        Self::failing(|_| false)
    }

    fn failing(pred: impl Fn(&Invocation) -> bool + 'static) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            installed: RefCell::new(BTreeSet::new()),
            fail: Box::new(pred),
        }
    }

    fn ran(&self, needle: &str) -> bool {
        self.calls.borrow().iter().any(|c| c.display().contains(needle))
    }

    fn count(&self, needle: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.display().contains(needle))
            .count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn is_available(&self, _program: &str) -> bool {
        true
    }

    fn run(&self, inv: &Invocation) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(inv.clone());
        if (self.fail)(inv) {
            return Ok(CommandOutput::failed(1, format!("{} failed", inv.program)));
        }
        let program = Path::new(&inv.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match program.as_str() {
            "dpkg-query" => {
                let installed = self.installed.borrow();
                let out: String = inv
                    .args
                    .iter()
                    .filter(|a| installed.contains(a.as_str()))
                    .map(|a| format!("{a}\tinstall ok installed\n"))
                    .collect();
                Ok(CommandOutput::ok(out))
            }
            "apt-get" if inv.args.first().map(String::as_str) == Some("install") => {
                let mut installed = self.installed.borrow_mut();
                for name in inv.args.iter().skip(1).filter(|a| !a.starts_with('-')) {
                    installed.insert(name.clone());
                }
                Ok(CommandOutput::ok(""))
            }
            "python3" if inv.args.get(1).map(String::as_str) == Some("venv") => {
                let venv = Path::new(&inv.args[2]);
                std::fs::create_dir_all(venv.join("bin")).unwrap();
                std::fs::write(venv.join("bin/python"), "").unwrap();
                Ok(CommandOutput::ok(""))
            }
            "rasa" => {
                let out = inv.args.iter().position(|a| a == "--out").unwrap();
                let name = inv
                    .args
                    .iter()
                    .position(|a| a == "--fixed-model-name")
                    .unwrap();
                let artifact = Path::new(&inv.args[out + 1])
                    .join(format!("{}.tar.gz", inv.args[name + 1]));
                std::fs::write(artifact, "model").unwrap();
                Ok(CommandOutput::ok(""))
            }
            "pulseaudio" if inv.args == ["--check"] => Ok(CommandOutput::failed(1, "")),
            "aplay" | "arecord" => Ok(CommandOutput::ok(
                "card 1: Device [USB Audio Device], device 0: USB Audio [USB Audio]\n",
            )),
            _ => Ok(CommandOutput::ok("")),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn config_for(root: &Path) -> Config {
    let mut config = Config::default();
    config.packages.base = vec!["alsa-utils".into(), "ffmpeg".into()];
    config.packages.embedded = vec!["i2c-tools".into()];
    config.runtime.packages = vec!["openai-whisper".into(), "rasa".into()];
    config.runtime.requirements_file = None;
    config.host.cpu_sysfs_dir = root.join("sys/cpu").display().to_string();
    config.audio.system_routing_file = root.join("etc/asound.conf").display().to_string();
    config.service.unit_dir = root.join("etc/systemd/system").display().to_string();
    config.service.working_dir = root.display().to_string();
    config
}

fn context(root: &Path, profile: HostProfile, elevated: bool) -> Context {
    Context::new(
        root,
        root.join("home"),
        config_for(root),
        HostFacts {
            profile,
            model: None,
            elevated,
            marker: root.join("device-tree/model").display().to_string(),
        },
    )
}

fn write_corpus(root: &Path) {
    std::fs::create_dir_all(root.join("rasa/data")).unwrap();
    std::fs::write(root.join("rasa/config.yml"), "language: en\n").unwrap();
    std::fs::write(root.join("rasa/data/nlu.yml"), "version: \"3.1\"\n").unwrap();
}

fn tree(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for e in entries.flatten() {
            let p = e.path();
            out.push(p.strip_prefix(base).unwrap().display().to_string());
            if p.is_dir() {
                walk(base, &p, out);
            }
        }
    }
    walk(root, root, &mut out);
    out.sort();
    out
}

// ---------------------------------------------------------------------------
// setup
// ---------------------------------------------------------------------------

#[test]
fn setup_provisions_a_fresh_host() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let ctx = context(dir.path(), HostProfile::Generic, false);
    let runner = ScriptedRunner::new();

    let report = Pipeline::setup().unwrap().run(&ctx, &runner, ExecMode::Apply);

    assert_eq!(report.state, RunState::Done, "{report:#?}");
    for d in ["data/cache", "data/audio", "data/logs", "models/whisper"] {
        assert!(dir.path().join(d).is_dir(), "missing {d}");
    }
    assert!(dir.path().join(".env").is_file());
    assert!(dir.path().join("venv/bin/python").is_file());
    assert!(dir.path().join("models/nlu.tar.gz").is_file());
    assert!(dir.path().join("home/.asoundrc").is_file());
    assert!(runner.ran("pulseaudio --start"));
    assert!(!runner.ran("i2c-tools"), "generic host got embedded packages");

    let audio = report.stage(Stage::ConfigureAudio).unwrap();
    assert_eq!(audio.devices.len(), 2);
}

#[test]
fn rerun_converges_on_the_same_host_state() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let ctx = context(dir.path(), HostProfile::Embedded, false);
    let runner = ScriptedRunner::new();
    let pipeline = Pipeline::setup().unwrap();

    assert!(pipeline.run(&ctx, &runner, ExecMode::Apply).succeeded());
    let packages_after_first = runner.installed.borrow().clone();
    let routing_after_first = std::fs::read_to_string(dir.path().join("home/.asoundrc")).unwrap();

    assert!(pipeline.run(&ctx, &runner, ExecMode::Apply).succeeded());
    assert_eq!(*runner.installed.borrow(), packages_after_first);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("home/.asoundrc")).unwrap(),
        routing_after_first
    );
    // Second run found everything installed and the runtime in place.
    assert_eq!(runner.count("apt-get install"), 1);
    assert_eq!(runner.count("-m venv"), 1);

    // Latency directives are appended again on every run.
    let daemon = std::fs::read_to_string(dir.path().join("home/.config/pulse/daemon.conf")).unwrap();
    assert_eq!(daemon.matches("default-fragments = 5").count(), 2);
}

#[test]
fn dedupe_keeps_daemon_conf_stable() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let mut ctx = context(dir.path(), HostProfile::Generic, false);
    ctx.config.audio.dedupe_latency_directives = true;
    let runner = ScriptedRunner::new();
    let pipeline = Pipeline::setup().unwrap();

    pipeline.run(&ctx, &runner, ExecMode::Apply);
    pipeline.run(&ctx, &runner, ExecMode::Apply);
    let daemon = std::fs::read_to_string(dir.path().join("home/.config/pulse/daemon.conf")).unwrap();
    assert_eq!(daemon.matches("default-fragments = 5").count(), 1);
}

#[test]
fn existing_env_is_never_overwritten() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    std::fs::write(dir.path().join(".env"), "OPENAI_API_KEY=sk-keep\n").unwrap();
    std::fs::write(dir.path().join(".env.example"), "OPENAI_API_KEY=\n").unwrap();
    let ctx = context(dir.path(), HostProfile::Generic, false);

    let report = Pipeline::setup()
        .unwrap()
        .run(&ctx, &ScriptedRunner::new(), ExecMode::Apply);

    assert!(report.succeeded());
    assert_eq!(
        std::fs::read_to_string(dir.path().join(".env")).unwrap(),
        "OPENAI_API_KEY=sk-keep\n"
    );
}

#[test]
fn env_is_seeded_from_template() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    std::fs::write(dir.path().join(".env.example"), "DEFAULT_LOCATION=Pune\n").unwrap();
    let ctx = context(dir.path(), HostProfile::Generic, false);

    Pipeline::setup()
        .unwrap()
        .run(&ctx, &ScriptedRunner::new(), ExecMode::Apply);

    assert_eq!(
        std::fs::read_to_string(dir.path().join(".env")).unwrap(),
        "DEFAULT_LOCATION=Pune\n"
    );
}

#[test]
fn speech_model_failure_degrades_but_completes() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let ctx = context(dir.path(), HostProfile::Generic, false);
    let runner = ScriptedRunner::failing(|inv| inv.args.iter().any(|a| a.contains("import whisper")));

    let report = Pipeline::setup().unwrap().run(&ctx, &runner, ExecMode::Apply);

    assert!(report.succeeded());
    assert!(report.degraded());
    let models = report.stage(Stage::ProvisionModels).unwrap();
    assert_eq!(models.outcome, StageOutcome::Degraded);
    assert!(models.warnings[0].contains("model fetch failed"));
    assert!(runner.ran("rasa train nlu"));
}

#[test]
fn package_manager_failure_halts() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let ctx = context(dir.path(), HostProfile::Generic, false);
    let runner = ScriptedRunner::failing(|inv| inv.program == "apt-get" && inv.args[0] == "install");

    let report = Pipeline::setup().unwrap().run(&ctx, &runner, ExecMode::Apply);

    let (stage, reason) = report.failure().unwrap();
    assert_eq!(stage, Stage::InstallPackages);
    assert!(reason.contains("package manager failed"), "{reason}");
    assert!(report.stage(Stage::ConfigureAudio).is_none());
    assert!(!dir.path().join("venv").exists());
}

#[test]
fn missing_corpus_fails_model_stage_after_speech_fetch() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path(), HostProfile::Generic, false);
    let runner = ScriptedRunner::new();

    let report = Pipeline::setup().unwrap().run(&ctx, &runner, ExecMode::Apply);

    let (stage, reason) = report.failure().unwrap();
    assert_eq!(stage, Stage::ProvisionModels);
    assert!(reason.contains("training corpus incomplete"), "{reason}");
    assert!(reason.contains("data/nlu.yml"), "{reason}");
    assert!(dir.path().join("models/whisper").is_dir());
    assert!(runner.ran("whisper.load_model"));
    assert!(!runner.ran("rasa train"));
}

#[test]
fn dry_run_changes_nothing() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let before = tree(dir.path());
    let ctx = context(dir.path(), HostProfile::Generic, false);
    let runner = ScriptedRunner::new();

    let report = Pipeline::setup().unwrap().run(&ctx, &runner, ExecMode::DryRun);

    assert!(report.succeeded());
    assert!(report.dry_run);
    assert_eq!(tree(dir.path()), before);
    assert!(!runner.ran("apt-get"));
    let packages = report.stage(Stage::InstallPackages).unwrap();
    assert!(packages
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Planned));
}

// ---------------------------------------------------------------------------
// deploy
// ---------------------------------------------------------------------------

#[test]
fn deploy_installs_service_on_embedded_root() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let governor = dir.path().join("sys/cpu/cpu0/cpufreq/scaling_governor");
    std::fs::create_dir_all(governor.parent().unwrap()).unwrap();
    std::fs::write(&governor, "ondemand\n").unwrap();
    let ctx = context(dir.path(), HostProfile::Embedded, true);
    let runner = ScriptedRunner::new();

    let report = Pipeline::deploy().unwrap().run(&ctx, &runner, ExecMode::Apply);

    assert_eq!(report.state, RunState::Done, "{report:#?}");
    assert_eq!(std::fs::read_to_string(&governor).unwrap(), "performance\n");
    let unit = std::fs::read_to_string(dir.path().join("etc/systemd/system/butler.service")).unwrap();
    assert!(unit.contains("Restart=always"));
    assert!(dir.path().join("etc/asound.conf").is_file());
    assert!(runner.ran("systemctl daemon-reload"));
    assert!(runner.ran("systemctl enable butler.service"));
    assert!(runner.ran("i2c-tools"));
}

#[test]
fn deploy_refuses_generic_host_without_writes() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let before = tree(dir.path());
    let ctx = context(dir.path(), HostProfile::Generic, true);
    let runner = ScriptedRunner::new();

    let report = Pipeline::deploy().unwrap().run(&ctx, &runner, ExecMode::Apply);

    let (stage, reason) = report.failure().unwrap();
    assert_eq!(stage, Stage::InstallService);
    assert!(reason.contains("embedded host"), "{reason}");
    assert!(report.stages.is_empty());
    assert!(runner.calls.borrow().is_empty());
    assert_eq!(tree(dir.path()), before);
}

#[test]
fn deploy_refuses_without_privilege_without_writes() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let before = tree(dir.path());
    let ctx = context(dir.path(), HostProfile::Embedded, false);
    let runner = ScriptedRunner::new();

    let report = Pipeline::deploy().unwrap().run(&ctx, &runner, ExecMode::Apply);

    let (_, reason) = report.failure().unwrap();
    assert!(reason.contains("elevated privilege"), "{reason}");
    assert!(runner.calls.borrow().is_empty());
    assert_eq!(tree(dir.path()), before);
}

#[test]
fn training_failure_halts_before_service() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let ctx = context(dir.path(), HostProfile::Embedded, true);
    let runner = ScriptedRunner::failing(|inv| inv.program.ends_with("rasa"));

    let report = Pipeline::deploy().unwrap().run(&ctx, &runner, ExecMode::Apply);

    let (stage, reason) = report.failure().unwrap();
    assert_eq!(stage, Stage::ProvisionModels);
    assert!(reason.contains("classifier training failed"), "{reason}");
    assert!(report.stage(Stage::InstallService).is_none());
    assert!(!runner.ran("systemctl"));
    assert!(!dir.path().join("etc/systemd/system/butler.service").exists());
}

#[test]
fn deploy_can_start_service_immediately() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let mut ctx = context(dir.path(), HostProfile::Embedded, true);
    ctx.config.service.start_now = true;
    let runner = ScriptedRunner::new();

    let report = Pipeline::deploy().unwrap().run(&ctx, &runner, ExecMode::Apply);

    assert!(report.succeeded(), "{report:#?}");
    assert!(runner.ran("systemctl restart butler.service"));
    let calls: Vec<String> = runner.calls.borrow().iter().map(|c| c.display()).collect();
    let enable = calls.iter().position(|c| c.contains("systemctl enable")).unwrap();
    let restart = calls.iter().position(|c| c.contains("systemctl restart")).unwrap();
    assert!(enable < restart);
}

#[test]
fn deploy_leaves_service_stopped_by_default() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let ctx = context(dir.path(), HostProfile::Embedded, true);
    let runner = ScriptedRunner::new();

    assert!(Pipeline::deploy().unwrap().run(&ctx, &runner, ExecMode::Apply).succeeded());
    assert!(!runner.ran("systemctl restart"));
}

#[test]
fn failed_enable_halts_deploy() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let mut ctx = context(dir.path(), HostProfile::Embedded, true);
    ctx.config.service.start_now = true;
    let runner = ScriptedRunner::failing(|inv| {
        inv.program == "systemctl" && inv.args.first().map(String::as_str) == Some("enable")
    });

    let report = Pipeline::deploy().unwrap().run(&ctx, &runner, ExecMode::Apply);

    let (stage, reason) = report.failure().unwrap();
    assert_eq!(stage, Stage::InstallService);
    assert!(reason.contains("systemctl"), "{reason}");
    let service = report.stage(Stage::InstallService).unwrap();
    assert_eq!(service.outcome, StageOutcome::Failed);
    assert!(matches!(
        service.steps.last().map(|s| &s.status),
        Some(StepStatus::Failed { .. })
    ));
    assert!(!runner.ran("systemctl restart"));
}
