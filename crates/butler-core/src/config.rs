use crate::error::Result;
use crate::host::HostProfile;
use crate::paths;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// HostConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_marker")]
    pub device_tree_marker: String,
    #[serde(default = "default_cpu_sysfs")]
    pub cpu_sysfs_dir: String,
}

fn default_marker() -> String {
    paths::DEVICE_TREE_MARKER.to_string()
}

fn default_cpu_sysfs() -> String {
    paths::CPU_SYSFS_DIR.to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            device_tree_marker: default_marker(),
            cpu_sysfs_dir: default_cpu_sysfs(),
        }
    }
}

// ---------------------------------------------------------------------------
// PackageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default = "default_base_packages")]
    pub base: Vec<String>,
    /// Extra packages for single-board hosts.
    #[serde(default = "default_embedded_packages")]
    pub embedded: Vec<String>,
}

fn default_base_packages() -> Vec<String> {
    [
        "python3-venv",
        "python3-pip",
        "python3-dev",
        "build-essential",
        "portaudio19-dev",
        "libasound2-dev",
        "alsa-utils",
        "pulseaudio",
        "espeak-ng",
        "ffmpeg",
        "sox",
        "flac",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_embedded_packages() -> Vec<String> {
    [
        "libatlas-base-dev",
        "libopenblas-dev",
        "python3-rpi.gpio",
        "i2c-tools",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            base: default_base_packages(),
            embedded: default_embedded_packages(),
        }
    }
}

impl PackageConfig {
    /// The ordered package set for a host profile: base first, then the
    /// embedded extensions. The first occurrence of a name wins.
    pub fn package_set(&self, profile: HostProfile) -> Vec<String> {
        merge_for_profile(&self.base, &self.embedded, profile)
    }
}

/// `base` followed by `embedded` on embedded hosts, trimmed, blanks dropped,
/// first occurrence wins.
fn merge_for_profile(base: &[String], embedded: &[String], profile: HostProfile) -> Vec<String> {
    let extra: &[String] = match profile {
        HostProfile::Embedded => embedded,
        HostProfile::Generic => &[],
    };
    let mut out: Vec<String> = Vec::new();
    for name in base.iter().chain(extra.iter()) {
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlsaDevice {
    pub card: u32,
    pub device: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_latency_directives")]
    pub latency_directives: Vec<String>,
    /// Skip directives already present in daemon.conf instead of appending
    /// them again on every run.
    #[serde(default)]
    pub dedupe_latency_directives: bool,
    #[serde(default = "default_playback")]
    pub playback: AlsaDevice,
    #[serde(default = "default_capture")]
    pub capture: AlsaDevice,
    #[serde(default = "default_system_routing_file")]
    pub system_routing_file: String,
}

fn default_latency_directives() -> Vec<String> {
    vec![
        "default-fragments = 5".to_string(),
        "default-fragment-size-msec = 2".to_string(),
    ]
}

fn default_playback() -> AlsaDevice {
    AlsaDevice { card: 0, device: 0 }
}

fn default_capture() -> AlsaDevice {
    AlsaDevice { card: 1, device: 0 }
}

fn default_system_routing_file() -> String {
    paths::SYSTEM_ROUTING_FILE.to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            latency_directives: default_latency_directives(),
            dedupe_latency_directives: false,
            playback: default_playback(),
            capture: default_capture(),
            system_routing_file: default_system_routing_file(),
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_venv_dir")]
    pub venv_dir: String,
    #[serde(default = "default_python")]
    pub python: String,
    /// Pinned dependency manifest installed into the runtime.
    #[serde(default = "default_runtime_packages")]
    pub packages: Vec<String>,
    /// Extra runtime packages for embedded hosts (board GPIO bindings).
    #[serde(default = "default_runtime_embedded_packages")]
    pub embedded_packages: Vec<String>,
    /// Optional requirements file, installed when it exists.
    #[serde(default = "default_requirements_file")]
    pub requirements_file: Option<String>,
}

fn default_venv_dir() -> String {
    "venv".to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

// Speech, dialogue and TTS stack plus everything the assistant's entry point
// imports. SQLAlchemy and aiohttp stay inside the ranges rasa 3.6 accepts.
fn default_runtime_packages() -> Vec<String> {
    [
        "openai-whisper==20231117",
        "rasa==3.6.20",
        "pyaudio==0.2.14",
        "gTTS==2.5.1",
        "pygame==2.5.2",
        "python-dotenv==1.0.1",
        "requests==2.31.0",
        "openai==1.30.5",
        "elevenlabs==1.2.2",
        "SQLAlchemy==1.4.52",
        "psutil==5.9.8",
        "aiohttp==3.9.5",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_runtime_embedded_packages() -> Vec<String> {
    vec!["RPi.GPIO==0.7.1".to_string()]
}

fn default_requirements_file() -> Option<String> {
    Some("requirements.txt".to_string())
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            venv_dir: default_venv_dir(),
            python: default_python(),
            packages: default_runtime_packages(),
            embedded_packages: default_runtime_embedded_packages(),
            requirements_file: default_requirements_file(),
        }
    }
}

impl RuntimeConfig {
    /// Runtime packages for a host profile, in install order.
    pub fn manifest(&self, profile: HostProfile) -> Vec<String> {
        merge_for_profile(&self.packages, &self.embedded_packages, profile)
    }
}

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechModelConfig {
    #[serde(default = "default_speech_model")]
    pub name: String,
}

fn default_speech_model() -> String {
    "base".to_string()
}

impl Default for SpeechModelConfig {
    fn default() -> Self {
        Self {
            name: default_speech_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_name")]
    pub name: String,
    /// Directory holding `config.yml` and `data/nlu.yml`.
    #[serde(default = "default_classifier_project")]
    pub project_dir: String,
}

fn default_classifier_name() -> String {
    "nlu".to_string()
}

fn default_classifier_project() -> String {
    "rasa".to_string()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            name: default_classifier_name(),
            project_dir: default_classifier_project(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub speech: SpeechModelConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_description")]
    pub description: String,
    #[serde(default = "default_service_user")]
    pub user: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    /// Application entry point, relative to `working_dir`.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    #[serde(default = "default_restart")]
    pub restart: String,
    #[serde(default = "default_restart_sec")]
    pub restart_sec: u32,
    #[serde(default = "default_unit_dir")]
    pub unit_dir: String,
    #[serde(default = "default_cpu_governor")]
    pub cpu_governor: String,
    #[serde(default)]
    pub start_now: bool,
}

fn default_service_name() -> String {
    "butler".to_string()
}

fn default_service_description() -> String {
    "Butler Voice Assistant".to_string()
}

fn default_service_user() -> String {
    "pi".to_string()
}

fn default_working_dir() -> String {
    "/home/pi/butler".to_string()
}

fn default_entrypoint() -> String {
    "src/main.py".to_string()
}

fn default_restart() -> String {
    "always".to_string()
}

fn default_restart_sec() -> u32 {
    5
}

fn default_unit_dir() -> String {
    paths::SYSTEMD_UNIT_DIR.to_string()
}

fn default_cpu_governor() -> String {
    "performance".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            description: default_service_description(),
            user: default_service_user(),
            working_dir: default_working_dir(),
            entrypoint: default_entrypoint(),
            restart: default_restart(),
            restart_sec: default_restart_sec(),
            unit_dir: default_unit_dir(),
            cpu_governor: default_cpu_governor(),
            start_now: false,
        }
    }
}

impl ServiceConfig {
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.name)
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub packages: PackageConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            host: HostConfig::default(),
            packages: PackageConfig::default(),
            audio: AudioConfig::default(),
            runtime: RuntimeConfig::default(),
            models: ModelConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

static PACKAGE_RE: OnceLock<Regex> = OnceLock::new();

fn package_re() -> &'static Regex {
    PACKAGE_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9+.\-]+$").unwrap())
}

impl Config {
    /// Load `.butler/config.yaml`, falling back to built-in defaults when the
    /// file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        for (list, names) in [
            ("packages.base", &self.packages.base),
            ("packages.embedded", &self.packages.embedded),
        ] {
            for name in names {
                if !package_re().is_match(name) {
                    error(format!("invalid package name '{name}' in {list}"));
                }
            }
        }

        if self.runtime.venv_dir.trim().is_empty() {
            error("runtime.venv_dir must not be empty".to_string());
        }
        if self.models.classifier.name.trim().is_empty() {
            error("models.classifier.name must not be empty".to_string());
        }
        if self.service.name.trim().is_empty() {
            error("service.name must not be empty".to_string());
        }
        if !Path::new(&self.service.working_dir).is_absolute() {
            error(format!(
                "service.working_dir '{}' must be an absolute path",
                self.service.working_dir
            ));
        }

        if self.service.restart != "always" {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "service.restart is '{}'; the assistant will not be restarted after a clean exit",
                    self.service.restart
                ),
            });
        }
        if self.service.restart_sec == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "service.restart_sec is 0; a crashing service will restart in a tight loop"
                    .to_string(),
            });
        }
        for name in self.runtime.packages.iter().chain(&self.runtime.embedded_packages) {
            if !name.contains("==") {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "runtime package '{name}' is not pinned; reruns may install a different version"
                    ),
                });
            }
        }
        for directive in &self.audio.latency_directives {
            if !directive.contains('=') {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "audio.latency_directives entry '{directive}' is not a 'key = value' line"
                    ),
                });
            }
        }

        warnings
    }

    pub fn has_errors(&self) -> bool {
        self.validate().iter().any(|w| w.level == WarnLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
