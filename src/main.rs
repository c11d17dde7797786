use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Args, Commands};
use commands::utils::{AppContext, init_logging};
use focus_guard::config::{AppConfig, get_default_config_path};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_default_config_path()?,
    };

    if let Commands::InitConfig { force } = args.command {
        init_logging(args.verbose, "info");
        return commands::info::init_config(&config_path, force);
    }

    let config = AppConfig::load_or_default(&config_path)?;
    init_logging(args.verbose, &config.logging.level);
    let ctx = AppContext::new(config, args.ephemeral)?;

    match args.command {
        Commands::Platforms => commands::info::platforms(),
        Commands::Start { platforms, all, hours } => {
            commands::session::start(&ctx, platforms, all, hours)
        }
        Commands::Resume => commands::session::resume(&ctx),
        Commands::Status => commands::session::status(&ctx),
        Commands::Usage => commands::info::usage(&ctx),
        Commands::Permissions => commands::info::permissions(&ctx),
        Commands::InitConfig { .. } => Ok(()),
    }
}
