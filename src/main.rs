//! Stowaway - Rule-based build cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use stowaway::cli::{commands, Cli, Commands};
use stowaway::config::{Config, ConfigManager};
use stowaway::error::StowawayResult;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> StowawayResult<()> {
    let cli = Cli::parse();

    // Completions need neither logging nor config
    if let Commands::Completions { shell } = cli.command {
        commands::completions(shell);
        return Ok(());
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let loaded = config_manager.load();
    init_logging(cli.verbose, loaded.as_ref().ok());
    let mut config = loaded?;

    if let Some(root) = cli.store_root {
        debug!("Store root overridden: {}", root.display());
        config.store.root = Some(root);
    }

    // Dispatch to command
    match cli.command {
        Commands::Store(args) => commands::store(args, &config),
        Commands::Restore(args) => commands::restore(args, &config),
        Commands::Key(args) => commands::key(args),
        Commands::List(args) => commands::list(args, &config),
        Commands::Config(args) => commands::config(args, &config, &config_manager),
        Commands::Completions { .. } => Ok(()),
    }
}

/// Install the tracing subscriber on stderr
///
/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set.
fn init_logging(verbose: u8, config: Option<&Config>) {
    let default = match verbose {
        0 => "stowaway=warn",
        1 => "stowaway=info",
        _ => "stowaway=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let json = config.is_some_and(|c| c.general.log_format == "json");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
