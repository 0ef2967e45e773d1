//! ridepull CLI - Command-line tool for downloading ride data.
//!
//! ## Features
//!
//! - Download a ride from a serial/USB-attached device
//! - Interactive or scripted port selection
//! - Pluggable device types (drivers)
//! - Ctrl-C cancellation of a running transfer
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod host;
mod serial;

use config::Config;

/// ridepull - Download recorded rides from serial-attached devices.
///
/// Environment variables:
///   RIDEPULL_PORT              - Default serial port
///   RIDEPULL_BAUD              - Baud rate (default: 9600)
///   RIDEPULL_DRIVER            - Default device type
///   RIDEPULL_DEST              - Ride directory
///   RIDEPULL_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "ridepull")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "RIDEPULL_PORT")]
    port: Option<String>,

    /// Baud rate for the device link.
    #[arg(short, long, global = true, env = "RIDEPULL_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "RIDEPULL_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options for the download command.
#[derive(Debug, Clone, Args)]
struct DownloadArgs {
    /// Directory to save rides into.
    #[arg(long, value_name = "DIR", env = "RIDEPULL_DEST")]
    dest: Option<PathBuf>,

    /// Device type (see `ridepull drivers`).
    #[arg(long, env = "RIDEPULL_DRIVER")]
    driver: Option<String>,

    /// Overwrite a previous download with the same name without asking.
    #[arg(long, conflicts_with = "keep_existing")]
    overwrite: bool,

    /// Keep a previous download with the same name without asking.
    #[arg(long)]
    keep_existing: bool,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Download a ride from the device.
    Download(DownloadArgs),

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available device types.
    Drivers {
        /// Output device types as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (auto-detected if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// CLI failures with a defined exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or an ambiguous situation in non-interactive mode.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration.
    #[error("{0}")]
    Config(String),
    /// The user backed out.
    #[error("{0}")]
    Cancelled(String),
    /// Failure already shown to the user; carries the exit code.
    #[error("download did not complete")]
    Reported(u8),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Cancelled(_) => 130,
            Self::Reported(code) => *code,
        }
    }
}

/// Exit code class of a library error.
pub(crate) fn library_exit_code(err: &ridepull::Error) -> u8 {
    use ridepull::Error;

    match err {
        Error::Canceled => 130,
        Error::NotReady(_) | Error::InvalidSelection(_) | Error::UnknownDriver(_) => 2,
        Error::Serial(_)
        | Error::Timeout(_)
        | Error::Ymodem(_)
        | Error::Driver(_)
        | Error::Unsupported(_) => 4,
        _ => 1,
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        cli_err.exit_code()
    } else if let Some(lib_err) = err.downcast_ref::<ridepull::Error>() {
        library_exit_code(lib_err)
    } else {
        1
    }
}

fn init_logging(cli: &Cli) {
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
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "ridepull v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code(&err);
            if !matches!(err.downcast_ref::<CliError>(), Some(CliError::Reported(_))) {
                eprintln!("{} {err:#}", style("Error:").red().bold());
            }
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Download(args) => commands::download::cmd_download(cli, &mut config, args),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(cli, &config, *json),
        Commands::Drivers { json } => commands::ports::cmd_drivers(*json),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}
