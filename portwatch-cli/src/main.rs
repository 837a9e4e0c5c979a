//! portwatch CLI - watch serial, USB and network endpoints come and go.
//!
//! ## Features
//!
//! - List serial ports, firmware-update devices and mDNS receivers
//! - Stream add/remove events as text or JSON lines
//! - Block until a device is plugged in or pulled out
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

mod commands;
mod config;

use config::Config;

/// portwatch - Discover serial, USB and network endpoints.
///
/// Environment variables:
///   PORTWATCH_SHOW_ALL   - List every serial device, not only known bridges
///   PORTWATCH_VIRTUAL    - Offer the virtual-mode picker entry
///   PORTWATCH_NO_MDNS    - Disable mDNS discovery
///   PORTWATCH_CONFIG     - Path to a configuration file
#[derive(Parser)]
#[command(name = "portwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// List every serial device, including unknown types.
    #[arg(long, global = true, env = "PORTWATCH_SHOW_ALL")]
    show_all: bool,

    /// Include the virtual-mode entry in the picker.
    #[arg(long = "virtual", global = true, env = "PORTWATCH_VIRTUAL")]
    show_virtual: bool,

    /// Do not browse for network receivers.
    #[arg(long, global = true, env = "PORTWATCH_NO_MDNS")]
    no_mdns: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH", env = "PORTWATCH_CONFIG")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List endpoints found in a single pass.
    List {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Browse mDNS for this many seconds before listing.
        #[arg(long, value_name = "SECS")]
        browse: Option<u64>,
    },

    /// Print endpoint changes until interrupted.
    Watch {
        /// Output one JSON object per event.
        #[arg(long)]
        json: bool,

        /// Stop after this many seconds.
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },

    /// Wait for the next endpoint change.
    Wait {
        /// Change to wait for.
        #[arg(value_enum)]
        event: WaitEvent,

        /// Give up after this many milliseconds (exit code 3).
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which change `wait` blocks on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum WaitEvent {
    /// An endpoint appeared.
    Added,
    /// An endpoint disappeared.
    Removed,
}

/// Failures with a dedicated exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation.
    #[error("{0}")]
    Usage(String),

    /// Nothing happened before the deadline.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Interrupted by Ctrl-C.
    #[error("interrupted")]
    Cancelled,
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Timeout(_) => 3,
            Self::Cancelled => 130,
        }
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "portwatch v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(cli_err) = err.downcast_ref::<CliError>() {
                if !(cli.quiet && matches!(cli_err, CliError::Timeout(_))) {
                    eprintln!("{} {cli_err}", style("Error:").red().bold());
                }
                return ExitCode::from(cli_err.exit_code());
            }
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::FAILURE
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::List { json, browse } => commands::list::cmd_list(cli, &config, *json, *browse),
        Commands::Watch { json, duration } => {
            commands::watch::cmd_watch(cli, &config, *json, *duration)
        },
        Commands::Wait {
            event,
            timeout,
            json,
        } => commands::wait::cmd_wait(cli, &config, *event, *timeout, *json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
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
    fn test_parse_list_json() {
        let cli = Cli::try_parse_from(["portwatch", "list", "--json", "--browse", "3"]).unwrap();
        match cli.command {
            Commands::List { json, browse } => {
                assert!(json);
                assert_eq!(browse, Some(3));
            },
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["portwatch", "watch", "--show-all", "--virtual", "-vv"])
            .unwrap();
        assert!(cli.show_all);
        assert!(cli.show_virtual);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_wait() {
        let cli =
            Cli::try_parse_from(["portwatch", "wait", "removed", "--timeout", "1500"]).unwrap();
        match cli.command {
            Commands::Wait { event, timeout, .. } => {
                assert_eq!(event, WaitEvent::Removed);
                assert_eq!(timeout, Some(1500));
            },
            _ => panic!("expected wait"),
        }
    }

    #[test]
    fn test_wait_requires_event() {
        assert!(Cli::try_parse_from(["portwatch", "wait"]).is_err());
        assert!(Cli::try_parse_from(["portwatch", "wait", "sideways"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Usage(String::new()).exit_code(), 2);
        assert_eq!(CliError::Timeout(10).exit_code(), 3);
        assert_eq!(CliError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_cli_error_survives_anyhow() {
        let err = anyhow::Error::from(CliError::Timeout(250));
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Timeout(250))
        ));
        assert_eq!(err.to_string(), "timed out after 250 ms");
    }
}
