use crate::output::{print_json, yes_no};
use anyhow::Context as _;
use butler_core::config::Config;
use butler_core::host::{self, SystemProbe};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let facts = host::detect(&SystemProbe::new(&config.host));

    if json {
        return print_json(&facts);
    }
    println!("profile:  {}", facts.profile);
    println!("model:    {}", facts.model.as_deref().unwrap_or("-"));
    println!("elevated: {}", yes_no(facts.elevated));
    println!("marker:   {}", facts.marker);
    Ok(())
}
