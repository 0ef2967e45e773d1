//! Download command implementation.

use anyhow::{Context, Result};
use console::style;
use log::{debug, info, warn};
use ridepull::{
    CancelEffect, DownloadController, DriverRegistry, Overwrite, driver,
};
use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::commands::ports::enumerator;
use crate::config::Config;
use crate::host::ConsoleHost;
use crate::serial::{PortChoice, SerialOptions, ask_remember_port, select_port};
use crate::{Cli, CliError, DownloadArgs, library_exit_code};

/// Resolve the destination directory and make sure it exists.
fn destination(args: &DownloadArgs, config: &Config) -> Result<PathBuf> {
    let dest = args
        .dest
        .clone()
        .or_else(|| config.download.destination.clone())
        .or_else(Config::default_destination)
        .ok_or_else(|| {
            CliError::Config("Could not determine a ride directory; pass --dest".to_string())
        })?;

    fs::create_dir_all(&dest)
        .with_context(|| format!("Failed to create ride directory {}", dest.display()))?;
    Ok(dest)
}

fn overwrite_policy(args: &DownloadArgs) -> Option<Overwrite> {
    if args.overwrite {
        Some(Overwrite::Replace)
    } else if args.keep_existing {
        Some(Overwrite::Keep)
    } else {
        None
    }
}

/// Download one ride from the selected device.
pub(crate) fn cmd_download(cli: &Cli, config: &mut Config, args: &DownloadArgs) -> Result<()> {
    let dest = destination(args, config)?;
    debug!("Saving rides to {}", dest.display());

    let settings = config.driver_settings(cli.baud);
    if driver::install_registry(DriverRegistry::with_builtin(&settings)).is_err() {
        warn!("Driver registry was already initialized; using existing settings");
    }

    let mut controller = DownloadController::new(enumerator(cli, config), driver::registry(), &dest);

    if let Some(name) = args
        .driver
        .as_deref()
        .or(config.download.driver.as_deref())
    {
        controller
            .select_driver(name)
            .map_err(|e| CliError::Usage(format!("{e}; run `ridepull drivers` to list them")))?;
    }

    let handle = controller.cancel_handle();
    ctrlc::set_handler(move || {
        if handle.cancel() == CancelEffect::Dismissed {
            std::process::exit(130);
        }
        eprintln!("\n{} Canceling download...", style("!").yellow().bold());
    })
    .context("Failed to install Ctrl-C handler")?;

    let mut host = ConsoleHost::new(cli.quiet, cli.non_interactive, overwrite_policy(args));
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    loop {
        let scan = controller.rescan(&mut host);
        match select_port(&options, config, &scan)? {
            PortChoice::Index(idx) => {
                controller.select_ports(&[idx])?;
                break;
            },
            PortChoice::Rescan => {},
        }
    }

    let port = controller
        .selected_port()
        .cloned()
        .ok_or_else(|| CliError::Usage("No device selected".to_string()))?;

    if !cli.non_interactive && std::io::stdin().is_terminal() {
        ask_remember_port(&port, config)?;
    }

    if !cli.quiet {
        eprintln!(
            "{} Using {} with {}",
            style("🔌").cyan(),
            style(&port.name).green(),
            controller.driver_name().unwrap_or("no driver")
        );
        eprintln!("{}", style(controller.instructions()).dim());
    }

    match controller.start_download(&mut host) {
        Ok(published) => {
            info!("Saved {}", published.path.display());
            Ok(())
        },
        Err(e) => Err(CliError::Reported(library_exit_code(&e)).into()),
    }
}
