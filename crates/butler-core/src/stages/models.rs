//! Speech-recognition and intent-classification model artifacts.

use std::path::PathBuf;

use crate::action::{Action, FailureClass, Plan, Step};
use crate::context::Context;
use crate::paths;
use crate::runner::Invocation;

pub const CORPUS_CONFIG: &str = "config.yml";
pub const CORPUS_NLU: &str = "data/nlu.yml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub corpus_dir: PathBuf,
    pub artifact_exists: bool,
}

pub fn observe(ctx: &Context) -> Observed {
    Observed {
        corpus_dir: ctx.resolve(&ctx.config.models.classifier.project_dir),
        artifact_exists: classifier_artifact(ctx).is_file(),
    }
}

/// Where the trained classifier lands.
pub fn classifier_artifact(ctx: &Context) -> PathBuf {
    ctx.models_dir()
        .join(format!("{}.tar.gz", ctx.config.models.classifier.name))
}

fn whisper_script(model: &str, download_root: &str) -> String {
    format!(
        "import whisper; whisper.load_model({model:?}, download_root={download_root:?})"
    )
}

/// The speech model and the classifier are independent: the speech fetch is
/// attempted even when the training corpus is incomplete. The corpus check
/// and training are required, since consumers expect the classifier artifact.
pub fn plan(ctx: &Context, observed: &Observed) -> Plan {
    let models = &ctx.config.models;
    let mut plan = Plan::default();

    let whisper_dir = ctx.root.join(paths::WHISPER_DIR);
    plan.push(Step::required(
        format!("create {}/", paths::WHISPER_DIR),
        Action::EnsureDir {
            path: whisper_dir.clone(),
        },
    ));

    let python = ctx.venv_python().display().to_string();
    let env = ctx.venv_env();
    plan.push(
        Step::optional(
            format!("fetch speech model '{}'", models.speech.name),
            Action::Run {
                invocation: Invocation::new(&python)
                    .arg("-c")
                    .arg(whisper_script(
                        &models.speech.name,
                        &whisper_dir.display().to_string(),
                    ))
                    .envs(&env)
                    .cwd(&ctx.root),
            },
        )
        .class(FailureClass::ModelFetch),
    );

    plan.push(
        Step::required(
            "check training corpus",
            Action::RequireFiles {
                what: "training corpus".to_string(),
                dir: observed.corpus_dir.clone(),
                files: vec![CORPUS_CONFIG.to_string(), CORPUS_NLU.to_string()],
            },
        )
        .class(FailureClass::Training),
    );

    if observed.artifact_exists {
        plan.note(format!(
            "{} exists and will be retrained",
            classifier_artifact(ctx).display()
        ));
    }
    let rasa = paths::venv_bin(&ctx.venv_dir(), "rasa")
        .display()
        .to_string();
    plan.push(
        Step::required(
            format!("train intent classifier '{}'", models.classifier.name),
            Action::Run {
                invocation: Invocation::new(rasa)
                    .args(["train", "nlu", "--config", CORPUS_CONFIG, "--nlu", CORPUS_NLU])
                    .arg("--out")
                    .arg(ctx.models_dir().display().to_string())
                    .arg("--fixed-model-name")
                    .arg(&models.classifier.name)
                    .envs(&env)
                    .cwd(&observed.corpus_dir),
            },
        )
        .class(FailureClass::Training),
    );

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::OnFailure;
    use crate::config::Config;
    use crate::host::{HostFacts, HostProfile};
    use tempfile::TempDir;

    fn ctx(root: &std::path::Path) -> Context {
        Context::new(
            root,
            root.join("home"),
            Config::default(),
            HostFacts {
                profile: HostProfile::Embedded,
                model: None,
                elevated: false,
                marker: "/proc/device-tree/model".into(),
            },
        )
    }

    fn write_corpus(root: &std::path::Path) {
        std::fs::create_dir_all(root.join("rasa/data")).unwrap();
        std::fs::write(root.join("rasa/config.yml"), "language: en\n").unwrap();
        std::fs::write(root.join("rasa/data/nlu.yml"), "version: \"3.1\"\n").unwrap();
    }

    #[test]
    fn missing_corpus_still_fetches_speech_model() {
        let dir = TempDir::new().unwrap();
        let c = ctx(dir.path());
        let plan = plan(&c, &observe(&c));
        let labels: Vec<&str> = plan.steps.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "create models/whisper/",
                "fetch speech model 'base'",
                "check training corpus",
                "train intent classifier 'nlu'",
            ]
        );
        let check = &plan.steps[2];
        assert_eq!(check.on_failure, OnFailure::Abort);
        assert_eq!(check.class, FailureClass::Training);
        assert!(matches!(
            &check.action,
            Action::RequireFiles { dir: d, files, .. }
                if d == &dir.path().join("rasa") && files.len() == 2
        ));
    }

    #[test]
    fn speech_model_is_optional_classifier_required() {
        let dir = TempDir::new().unwrap();
        write_corpus(dir.path());
        let c = ctx(dir.path());
        let plan = plan(&c, &observe(&c));
        assert_eq!(plan.steps.len(), 4);

        let speech = &plan.steps[1];
        assert_eq!(speech.on_failure, OnFailure::Continue);
        assert_eq!(speech.class, FailureClass::ModelFetch);

        let train = &plan.steps[3];
        assert_eq!(train.on_failure, OnFailure::Abort);
        assert_eq!(train.class, FailureClass::Training);
        let Action::Run { invocation } = &train.action else {
            panic!("expected run");
        };
        assert!(invocation.program.ends_with("venv/bin/rasa"));
        assert_eq!(invocation.cwd.as_deref(), Some(dir.path().join("rasa").as_path()));
        assert!(invocation.args.contains(&"nlu".to_string()));
        assert!(plan.notes.is_empty());
    }

    #[test]
    fn existing_artifact_is_noted() {
        let dir = TempDir::new().unwrap();
        write_corpus(dir.path());
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("models/nlu.tar.gz"), "model").unwrap();
        let c = ctx(dir.path());
        let plan = plan(&c, &observe(&c));
        assert!(plan.notes[0].contains("will be retrained"));
    }

    #[test]
    fn whisper_script_quotes_arguments() {
        assert_eq!(
            whisper_script("base", "/srv/models/whisper"),
            "import whisper; whisper.load_model(\"base\", download_root=\"/srv/models/whisper\")"
        );
    }

    #[test]
    fn artifact_path() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            classifier_artifact(&ctx(dir.path())),
            dir.path().join("models/nlu.tar.gz")
        );
    }
}
