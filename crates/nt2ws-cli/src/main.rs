//! nt2ws CLI
//!
//! Serves a NetworkTables-style table to browser dashboards over websockets.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nt2ws_core::Config;

mod commands;
mod output;

use commands::serve::ServeArgs;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "nt2ws")]
#[command(about = "nt2ws - NetworkTables to websocket bridge")]
#[command(version)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long = "config", global = true, value_name = "FILE")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Serve(ServeArgs),
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (port, robot, team, format, type_tags, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Config { command }) => {
            handle_config_command(command, cli.config_file.as_ref(), &output)
        }
        Some(Commands::Serve(args)) => serve(&args, cli.config_file.as_ref(), &output).await,
        None => serve(&cli.serve, cli.config_file.as_ref(), &output).await,
    }
}

async fn serve(args: &ServeArgs, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    args.apply(&mut config)?;
    commands::serve::run(config, output).await
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Log to stderr. `RUST_LOG` wins over `--verbose` when set.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nt2ws_core={},nt2ws_cli={}", level, level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bare_flags_mean_serve() {
        let cli = Cli::parse_from(["nt2ws", "--port", "5810", "--team", "1418", "-v"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, Some(5810));
        assert_eq!(cli.serve.team, Some(1418));
        assert!(cli.verbose);
    }

    #[test]
    fn test_config_set_parses() {
        let cli = Cli::parse_from(["nt2ws", "config", "set", "format", "cbor"]);
        match cli.command {
            Some(Commands::Config {
                command: Some(ConfigCommands::Set { key, value }),
            }) => {
                assert_eq!(key, "format");
                assert_eq!(value, "cbor");
            }
            _ => panic!("expected config set"),
        }
    }

    #[test]
    fn test_robot_and_team_conflict() {
        assert!(Cli::try_parse_from(["nt2ws", "--robot", "10.0.0.2", "--team", "1418"]).is_err());
    }
}
