use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = ".butler/config.yaml";
pub const STATE_FILE: &str = ".butler/state.yaml";

pub const DATA_DIRS: [&str; 3] = ["data/cache", "data/audio", "data/logs"];
pub const MODELS_DIR: &str = "models";
pub const WHISPER_DIR: &str = "models/whisper";

pub const ENV_FILE: &str = ".env";
pub const ENV_TEMPLATE: &str = ".env.example";

pub const DEVICE_TREE_MARKER: &str = "/proc/device-tree/model";
pub const PROC_STATUS: &str = "/proc/self/status";
pub const CPU_SYSFS_DIR: &str = "/sys/devices/system/cpu";

pub const USER_ROUTING_FILE: &str = ".asoundrc";
pub const PULSE_DAEMON_CONF: &str = ".config/pulse/daemon.conf";
pub const SYSTEM_ROUTING_FILE: &str = "/etc/asound.conf";
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

pub fn env_path(root: &Path) -> PathBuf {
    root.join(ENV_FILE)
}

pub fn env_template_path(root: &Path) -> PathBuf {
    root.join(ENV_TEMPLATE)
}

pub fn user_routing_path(home: &Path) -> PathBuf {
    home.join(USER_ROUTING_FILE)
}

pub fn pulse_daemon_conf(home: &Path) -> PathBuf {
    home.join(PULSE_DAEMON_CONF)
}

/// `<venv>/bin/<exe>` for a runtime directory.
pub fn venv_bin(venv: &Path, exe: &str) -> PathBuf {
    venv.join("bin").join(exe)
}

/// Resolve `p` against `root` unless it is already absolute.
pub fn resolve(root: &Path, p: &str) -> PathBuf {
    let path = Path::new(p);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// The scaling-governor control file of every CPU under `cpu_dir`, sorted.
///
/// CPUs without cpufreq support are skipped; an unreadable `cpu_dir` yields
/// an empty list.
pub fn governor_files(cpu_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(cpu_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.strip_prefix("cpu")
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        })
        .map(|e| e.path().join("cpufreq/scaling_governor"))
        .filter(|p| p.exists())
        .collect();
    files.sort();
    files
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
