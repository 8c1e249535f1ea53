//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// On/off switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Self::On
    }
}

#[derive(Debug, Parser)]
#[command(name = "bodyscale")]
#[command(author, version, about = "CLI for Bluetooth body-composition scales", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "BODYSCALE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Resolve the effective output format.
    pub fn format(&self, format: OutputFormat) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            format
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan for nearby scales
    Scan {
        /// Scan timeout in seconds (overrides config)
        #[arg(short = 'T', long)]
        timeout: Option<u64>,

        /// List every device that advertises, not only scales
        #[arg(short, long)]
        all: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Connect to a scale and print accepted measurements
    Watch {
        /// Device address (MAC address or UUID), or use BODYSCALE_DEVICE env var
        #[arg(short, long, env = "BODYSCALE_DEVICE")]
        device: Option<String>,

        /// Stop after this many seconds (runs until Ctrl+C by default)
        #[arg(short = 'D', long)]
        duration: Option<u64>,

        /// Stop after this many accepted measurements (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Forget the remembered scale
    Forget,

    /// Turn auto-connect to the remembered scale on or off
    AutoConnect {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Show the remembered scale and effective settings
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Configuration subcommands
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Show the configuration file path
    Path,

    /// Show the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch_arguments() {
        let cli = Cli::parse_from([
            "bodyscale",
            "watch",
            "--device",
            "AA:BB:CC:DD:EE:FF",
            "--duration",
            "60",
            "-n",
            "2",
        ]);
        match cli.command {
            Commands::Watch {
                device,
                duration,
                count,
                format,
            } => {
                assert_eq!(device.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
                assert_eq!(duration, Some(60));
                assert_eq!(count, 2);
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_json_flag_overrides_format() {
        let cli = Cli::parse_from(["bodyscale", "--json", "scan"]);
        assert_eq!(cli.format(OutputFormat::Text), OutputFormat::Json);

        let cli = Cli::parse_from(["bodyscale", "scan", "--format", "json"]);
        assert!(!cli.json);
        assert_eq!(cli.format(OutputFormat::Json), OutputFormat::Json);
    }

    #[test]
    fn test_parse_auto_connect() {
        let cli = Cli::parse_from(["bodyscale", "auto-connect", "off"]);
        assert!(matches!(
            cli.command,
            Commands::AutoConnect { state: Toggle::Off }
        ));
        assert!(Cli::try_parse_from(["bodyscale", "auto-connect", "maybe"]).is_err());
    }

    #[test]
    fn test_parse_config_init() {
        let cli = Cli::parse_from(["bodyscale", "config", "init", "--force"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }

    #[test]
    fn test_scan_defaults() {
        let cli = Cli::parse_from(["bodyscale", "scan"]);
        match cli.command {
            Commands::Scan {
                timeout,
                all,
                format,
            } => {
                assert_eq!(timeout, None);
                assert!(!all);
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
