use std::io;
use std::time::Duration;

use anyhow::Result;
use bodyscale_cli::cli::{Cli, Commands};
use bodyscale_cli::commands::{
    WatchArgs, cmd_auto_connect, cmd_config, cmd_forget, cmd_scan, cmd_status, cmd_watch,
};
use bodyscale_cli::config::{Config, default_config_path};
use bodyscale_cli::format::FormatOptions;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    human_panic::setup_panic!();

    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "bodyscale", &mut io::stdout());
        return Ok(());
    }

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // The config command works on files that may not exist or parse yet
    if let Commands::Config { action } = cli.command {
        return cmd_config(action, &config_path, cli.quiet);
    }

    let config = Config::load_validated(cli.config.as_deref())?;
    let registry_path = config.registry_path(&config_path);
    let opts = FormatOptions::new(cli.no_color);

    match cli.command {
        Commands::Scan {
            timeout,
            all,
            format,
        } => {
            cmd_scan(
                timeout,
                all,
                cli.format(format),
                cli.quiet,
                &opts,
                &config,
            )
            .await
        }
        Commands::Watch {
            ref device,
            duration,
            count,
            format,
        } => {
            cmd_watch(
                WatchArgs {
                    device: device.clone(),
                    duration: duration.map(Duration::from_secs),
                    count,
                    format: cli.format(format),
                    quiet: cli.quiet,
                    opts: &opts,
                    config: &config,
                },
                &registry_path,
            )
            .await
        }
        Commands::Forget => cmd_forget(&registry_path, cli.quiet),
        Commands::AutoConnect { state } => {
            cmd_auto_connect(&registry_path, state.enabled(), cli.quiet)
        }
        Commands::Status { format } => {
            cmd_status(config_path, &registry_path, cli.format(format), &opts)
        }
        Commands::Config { .. } | Commands::Completions { .. } => {
            unreachable!("handled before the config is loaded")
        }
    }
}
