use crate::error::Result;
use crate::host::HostProfile;
use crate::paths;
use crate::pipeline::{RunReport, RunState, Stage, StageOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Oldest records are dropped beyond this many.
pub const MAX_HISTORY: usize = 50;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub command: String,
    pub profile: HostProfile,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    pub stages: Vec<StageRecord>,
}

impl RunRecord {
    pub fn from_report(command: &str, started_at: DateTime<Utc>, report: &RunReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.to_string(),
            profile: report.host.profile,
            started_at,
            finished_at: Utc::now(),
            state: report.state.clone(),
            stages: report
                .stages
                .iter()
                .map(|s| StageRecord {
                    stage: s.stage,
                    outcome: s.outcome,
                })
                .collect(),
        }
    }

    pub fn outcome_label(&self) -> String {
        match &self.state {
            RunState::Done => {
                if self.stages.iter().any(|s| s.outcome == StageOutcome::Degraded) {
                    "degraded".to_string()
                } else {
                    "done".to_string()
                }
            }
            RunState::Failed { stage, .. } => format!("failed at {stage}"),
            RunState::Start | RunState::Running { .. } => "interrupted".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub history: Vec<RunRecord>,
    pub last_updated: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: 1,
            history: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

impl State {
    // ---------------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------------

    /// Load `.butler/state.yaml`; an absent file is an empty history.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::state_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let state: State = serde_yaml::from_str(&data)?;
        Ok(state)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::state_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // ---------------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------------

    pub fn record(&mut self, record: RunRecord) {
        self.history.push(record);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.last_updated = Utc::now();
    }

    pub fn last(&self) -> Option<&RunRecord> {
        self.history.last()
    }
}
