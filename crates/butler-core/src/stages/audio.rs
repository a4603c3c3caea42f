//! PulseAudio / ALSA configuration and device enumeration.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::action::{Action, Applied, ExecMode, Executor, FailureClass, Plan, Step, WritePolicy};
use crate::config::{AlsaDevice, AudioConfig};
use crate::context::Context;
use crate::paths;
use crate::runner::{CommandRunner, Invocation};

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceDirection {
    Capture,
    Playback,
}

impl DeviceDirection {
    /// The ALSA utility that lists devices in this direction.
    pub fn tool(self) -> &'static str {
        match self {
            DeviceDirection::Capture => "arecord",
            DeviceDirection::Playback => "aplay",
        }
    }
}

impl fmt::Display for DeviceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceDirection::Capture => "capture",
            DeviceDirection::Playback => "playback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub direction: DeviceDirection,
    pub card: u32,
    pub card_id: String,
    pub card_name: String,
    pub device: u32,
    pub device_name: String,
}

impl AudioDevice {
    /// ALSA plug address, e.g. `plughw:1,0`.
    pub fn address(&self) -> String {
        format!("plughw:{},{}", self.card, self.device)
    }
}

static DEVICE_RE: OnceLock<Regex> = OnceLock::new();

fn device_re() -> &'static Regex {
    DEVICE_RE.get_or_init(|| {
        Regex::new(r"^card (\d+): (\S+) \[([^\]]*)\], device (\d+): [^\[]*\[([^\]]*)\]").unwrap()
    })
}

/// Parse `aplay -l` / `arecord -l` output. Subdevice lines are ignored.
pub fn parse_device_list(direction: DeviceDirection, output: &str) -> Vec<AudioDevice> {
    output
        .lines()
        .filter_map(|line| {
            let caps = device_re().captures(line.trim_end())?;
            Some(AudioDevice {
                direction,
                card: caps[1].parse().ok()?,
                card_id: caps[2].to_string(),
                card_name: caps[3].to_string(),
                device: caps[4].parse().ok()?,
                device_name: caps[5].to_string(),
            })
        })
        .collect()
}

fn device_step(direction: DeviceDirection) -> Step {
    Step::optional(
        format!("list {direction} devices"),
        Action::ListDevices {
            direction,
            invocation: Invocation::new(direction.tool()).arg("-l").captured(),
        },
    )
    .class(FailureClass::AudioTool)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceReport {
    pub devices: Vec<AudioDevice>,
    pub warnings: Vec<String>,
}

/// Enumerate capture and playback devices. Missing tooling is reported as a
/// warning, never an error.
pub fn enumerate(runner: &dyn CommandRunner) -> DeviceReport {
    let exec = Executor::new(runner, ExecMode::DryRun);
    let mut report = DeviceReport::default();
    for direction in [DeviceDirection::Capture, DeviceDirection::Playback] {
        match exec.apply(&device_step(direction)) {
            Ok(Applied::Devices { devices }) => report.devices.extend(devices),
            Ok(_) => {}
            Err(e) => report.warnings.push(e.to_string()),
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Routing file
// ---------------------------------------------------------------------------

/// ALSA default-device aliasing: playback and capture may live on different
/// cards (e.g. HDMI/headphone out and a USB microphone).
pub fn routing_file(playback: AlsaDevice, capture: AlsaDevice) -> String {
    format!(
        "pcm.!default {{\n    type asym\n    playback.pcm {{\n        type plug\n        slave.pcm \"hw:{},{}\"\n    }}\n    capture.pcm {{\n        type plug\n        slave.pcm \"hw:{},{}\"\n    }}\n}}\n\nctl.!default {{\n    type hw\n    card {}\n}}\n",
        playback.card, playback.device, capture.card, capture.device, playback.card
    )
}

pub fn routing_for(cfg: &AudioConfig) -> String {
    routing_file(cfg.playback, cfg.capture)
}

// ---------------------------------------------------------------------------
// observe / plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observed {
    pub server_installed: bool,
    pub server_running: bool,
}

pub fn observe(runner: &dyn CommandRunner) -> Observed {
    if !runner.is_available("pulseaudio") {
        return Observed::default();
    }
    let running = runner
        .run(&Invocation::new("pulseaudio").arg("--check").captured())
        .map(|o| o.success())
        .unwrap_or(false);
    Observed {
        server_installed: true,
        server_running: running,
    }
}

pub fn plan(ctx: &Context, observed: Observed) -> Plan {
    let audio = &ctx.config.audio;
    let mut plan = Plan::default();

    if !observed.server_installed {
        plan.note("pulseaudio not found; audio server cannot be started");
    } else if !observed.server_running {
        plan.push(
            Step::optional(
                "start audio server",
                Action::Run {
                    invocation: Invocation::new("pulseaudio").arg("--start"),
                },
            )
            .class(FailureClass::AudioTool),
        );
    }

    if !audio.latency_directives.is_empty() {
        plan.push(Step::required(
            "tune audio server latency",
            Action::AppendLines {
                path: paths::pulse_daemon_conf(&ctx.home),
                lines: audio.latency_directives.clone(),
                dedupe: audio.dedupe_latency_directives,
            },
        ));
    }

    plan.push(Step::required(
        "default device routing",
        Action::WriteFile {
            path: paths::user_routing_path(&ctx.home),
            contents: routing_for(audio),
            policy: WritePolicy::IfMissing,
        },
    ));

    plan.push(device_step(DeviceDirection::Capture));
    plan.push(device_step(DeviceDirection::Playback));
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::{HostFacts, HostProfile};
    use crate::runner::CommandOutput;
    use std::path::PathBuf;

    const APLAY: &str = "**** List of PLAYBACK Hardware Devices ****
card 0: Headphones [bcm2835 Headphones], device 0: bcm2835 Headphones [bcm2835 Headphones]
  Subdevices: 8/8
  Subdevice #0: subdevice #0
card 1: Device [USB Audio Device], device 0: USB Audio [USB Audio]
  Subdevices: 1/1
";

    fn ctx() -> Context {
        Context::new(
            "/srv/butler",
            "/home/pi",
            Config::default(),
            HostFacts {
                profile: HostProfile::Generic,
                model: None,
                elevated: false,
                marker: "/proc/device-tree/model".into(),
            },
        )
    }

    #[test]
    fn parses_aplay_listing() {
        let devices = parse_device_list(DeviceDirection::Playback, APLAY);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].card_name, "bcm2835 Headphones");
        assert_eq!(devices[1].card, 1);
        assert_eq!(devices[1].card_id, "Device");
        assert_eq!(devices[1].device_name, "USB Audio");
        assert_eq!(devices[1].address(), "plughw:1,0");
    }

    #[test]
    fn routing_file_aliases_both_directions() {
        let content = routing_file(
            AlsaDevice { card: 0, device: 0 },
            AlsaDevice { card: 1, device: 0 },
        );
        assert!(content.contains("pcm.!default"));
        assert!(content.contains("slave.pcm \"hw:0,0\""));
        assert!(content.contains("slave.pcm \"hw:1,0\""));
        assert!(content.contains("ctl.!default"));
    }

    #[test]
    fn running_server_is_not_restarted() {
        let plan = plan(
            &ctx(),
            Observed {
                server_installed: true,
                server_running: true,
            },
        );
        assert!(!plan.steps.iter().any(|s| s.label == "start audio server"));
        let routing = plan
            .steps
            .iter()
            .find(|s| s.label == "default device routing")
            .unwrap();
        assert!(matches!(
            &routing.action,
            Action::WriteFile { path, policy: WritePolicy::IfMissing, .. }
                if *path == PathBuf::from("/home/pi/.asoundrc")
        ));
    }

    #[test]
    fn stopped_server_is_started_optionally() {
        let plan = plan(
            &ctx(),
            Observed {
                server_installed: true,
                server_running: false,
            },
        );
        let start = &plan.steps[0];
        assert_eq!(start.label, "start audio server");
        assert_eq!(start.on_failure, crate::action::OnFailure::Continue);
    }

    #[test]
    fn missing_server_is_a_note() {
        let plan = plan(&ctx(), Observed::default());
        assert_eq!(plan.notes.len(), 1);
        assert_eq!(plan.steps.len(), 4);
    }

    struct NoAlsa;

    impl CommandRunner for NoAlsa {
        fn is_available(&self, _program: &str) -> bool {
            false
        }
        fn run(&self, _invocation: &Invocation) -> crate::error::Result<CommandOutput> {
            unreachable!("nothing is available")
        }
    }

    #[test]
    fn enumerate_without_tools_only_warns() {
        let report = enumerate(&NoAlsa);
        assert!(report.devices.is_empty());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].contains("arecord"));
    }
}
