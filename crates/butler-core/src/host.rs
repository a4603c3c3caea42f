//! Host classification and privilege detection.
//!
//! A host is `Embedded` when the device-tree descriptor exists (single-board
//! computers such as the Raspberry Pi expose `/proc/device-tree/model`) and
//! `Generic` otherwise. Detection never fails.

use crate::config::HostConfig;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostProfile {
    Embedded,
    Generic,
}

impl HostProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            HostProfile::Embedded => "embedded",
            HostProfile::Generic => "generic",
        }
    }
}

impl fmt::Display for HostProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the pipeline needs to know about the machine it runs on.
/// Captured once at the start of a run and never refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    pub profile: HostProfile,
    /// Board model string from the device-tree marker, when readable.
    pub model: Option<String>,
    pub elevated: bool,
    /// The marker path that was inspected.
    pub marker: String,
}

/// Read-only view of the host used by [`detect`].
pub trait HostProbe {
    /// `None` when the marker is absent. `Some("")` when present but unreadable.
    fn marker(&self) -> Option<String>;
    fn marker_path(&self) -> String;
    fn effective_uid(&self) -> Option<u32>;
}

/// Probe backed by the real filesystem.
pub struct SystemProbe {
    marker: PathBuf,
    proc_status: PathBuf,
}

impl SystemProbe {
    pub fn new(cfg: &HostConfig) -> Self {
        Self {
            marker: PathBuf::from(&cfg.device_tree_marker),
            proc_status: PathBuf::from(paths::PROC_STATUS),
        }
    }
}

impl HostProbe for SystemProbe {
    fn marker(&self) -> Option<String> {
        if !self.marker.exists() {
            return None;
        }
        Some(std::fs::read_to_string(&self.marker).unwrap_or_default())
    }

    fn marker_path(&self) -> String {
        self.marker.display().to_string()
    }

    fn effective_uid(&self) -> Option<u32> {
        let status = std::fs::read_to_string(&self.proc_status).ok()?;
        parse_effective_uid(&status)
    }
}

pub fn detect(probe: &dyn HostProbe) -> HostFacts {
    let marker = probe.marker();
    let profile = if marker.is_some() {
        HostProfile::Embedded
    } else {
        HostProfile::Generic
    };
    // Device-tree strings are NUL-terminated.
    let model = marker
        .map(|m| m.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
        .filter(|m| !m.is_empty());
    let elevated = probe.effective_uid() == Some(0);

    tracing::debug!(%profile, ?model, elevated, "host detected");

    HostFacts {
        profile,
        model,
        elevated,
        marker: probe.marker_path(),
    }
}

/// Effective uid from the `Uid:` line of `/proc/<pid>/status`
/// (`real effective saved fs`).
pub fn parse_effective_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|l| l.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().nth(1))
        .and_then(|uid| uid.parse().ok())
}
