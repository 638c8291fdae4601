//! wheelsmith - cached, verified Python wheel builds
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wheelsmith::cli::{commands, Cli, Commands};
use wheelsmith::config::ConfigManager;
use wheelsmith::error::{WheelsmithError, WheelsmithResult};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
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

async fn run() -> WheelsmithResult<()> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions { shell } = cli.command {
        return commands::completions(shell);
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| WheelsmithError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set
    let level = match (cli.verbose, config.general.verbose) {
        (0, false) => "warn",
        (0, true) | (1, _) => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wheelsmith={}", level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    if let Some(ref path) = local_config_path {
        debug!("Using local config: {}", path.display());
    }

    ConfigManager::ensure_state_dirs().await?;
    wheelsmith::ui::init_theme();

    match cli.command {
        Commands::Completions { .. } => unreachable!("completions handled above"),
        Commands::Build(args) => commands::build(args, &config).await,
        Commands::Cache(args) => commands::cache(args, &config).await,
        Commands::Registry(args) => commands::registry(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}
