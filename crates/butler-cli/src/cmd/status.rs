use crate::output::{print_json, print_table};
use anyhow::Context as _;
use butler_core::state::State;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let state = State::load(root).context("failed to load run history")?;

    if json {
        return print_json(&state.history);
    }

    if state.history.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    let rows = state
        .history
        .iter()
        .rev()
        .map(|r| {
            let secs = (r.finished_at - r.started_at).num_seconds();
            vec![
                r.id.to_string()[..8].to_string(),
                r.command.clone(),
                r.profile.to_string(),
                r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                format!("{secs}s"),
                r.outcome_label(),
            ]
        })
        .collect();
    print_table(
        &["ID", "COMMAND", "PROFILE", "STARTED", "TOOK", "OUTCOME"],
        rows,
    );
    if let Some(last) = state.last() {
        println!("\nlast run: {} ({})", last.command, last.outcome_label());
    }
    Ok(())
}
