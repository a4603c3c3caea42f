use crate::output::{print_json, print_table};
use butler_core::runner::SystemRunner;
use butler_core::stages::audio;

pub fn run(json: bool) -> anyhow::Result<()> {
    let report = audio::enumerate(&SystemRunner::new(false));

    if json {
        return print_json(&report);
    }

    if report.devices.is_empty() {
        println!("No audio devices found.");
    } else {
        let rows = report
            .devices
            .iter()
            .map(|d| {
                vec![
                    d.direction.to_string(),
                    d.address(),
                    d.card_id.clone(),
                    d.card_name.clone(),
                    d.device_name.clone(),
                ]
            })
            .collect();
        print_table(&["DIRECTION", "ADDRESS", "CARD", "NAME", "DEVICE"], rows);
    }
    for w in &report.warnings {
        eprintln!("warning: {w}");
    }
    Ok(())
}
