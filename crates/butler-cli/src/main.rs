mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use cmd::run::Target;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "butler",
    about = "Provision and deploy the Butler voice assistant on a workstation or single-board computer",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .butler/ or .git/)
    #[arg(long, global = true, env = "BUTLER_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages, configure audio, build the runtime and provision models
    Setup,

    /// Everything `setup` does, then install the supervised service (root, embedded host only)
    Deploy,

    /// Show the steps a run would apply without changing anything
    Plan {
        /// Plan a full deployment instead of a setup
        #[arg(long)]
        deploy: bool,
    },

    /// Show the detected host profile and privilege
    Detect,

    /// List capture and playback devices
    Devices,

    /// Show recorded runs
    Status,

    /// Manage .butler/config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Setup | Commands::Deploy | Commands::Plan { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Setup => cmd::run::run(&root, Target::Setup, false, cli.json),
        Commands::Deploy => cmd::run::run(&root, Target::Deploy, false, cli.json),
        Commands::Plan { deploy } => {
            let target = if deploy { Target::Deploy } else { Target::Setup };
            cmd::run::run(&root, target, true, cli.json)
        }
        Commands::Detect => cmd::detect::run(&root, cli.json),
        Commands::Devices => cmd::devices::run(cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
