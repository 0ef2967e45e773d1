//! Serial port selection.
//!
//! Picks one entry of the controller's current port list:
//! - an explicit `--port` or configured port is looked up by name
//! - a single candidate is taken automatically
//! - otherwise the user chooses interactively (with a "Rescan" entry)
//!
//! Non-interactive mode never prompts; anything ambiguous is a usage error.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    ridepull::{PortInfo, PortScan, format_port_list},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

/// Outcome of one selection round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortChoice {
    /// Index into the scan that was offered.
    Index(usize),
    /// The user asked to enumerate again.
    Rescan,
}

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    CliError::Usage(message.into()).into()
}

/// Choose a port from `scan`.
pub fn select_port(options: &SerialOptions, config: &Config, scan: &PortScan) -> Result<PortChoice> {
    // Explicit or configured port: both are always listed by the enumerator
    let wanted = options
        .port
        .as_deref()
        .or(config.port.connection.serial.as_deref());
    if let Some(name) = wanted {
        debug!("Looking for requested port {name}");
        return scan
            .position(name)
            .map(PortChoice::Index)
            .ok_or_else(|| usage_err(format!("Port {name} is not available")));
    }

    if scan.is_empty() {
        if options.non_interactive {
            return Err(usage_err(
                "No devices found. Connect the device and try again, or pass --port.",
            ));
        }
        ensure_interactive_terminal()?;
        return offer_rescan();
    }

    let candidates = candidate_indices(scan, config);
    if let [only] = candidates.as_slice() {
        info!("Auto-selected port: {}", scan.ports[*only].name);
        return Ok(PortChoice::Index(*only));
    }

    if options.non_interactive {
        return Err(usage_err(
            "Multiple devices found; pass --port to choose one in non-interactive mode",
        ));
    }

    ensure_interactive_terminal()?;
    select_port_interactive(scan, config)
}

/// Indices worth offering: recognized bridges if there are any, else all.
fn candidate_indices(scan: &PortScan, config: &Config) -> Vec<usize> {
    let known: Vec<usize> = (0..scan.len())
        .filter(|&i| is_known_device(&scan.ports[i], config))
        .collect();
    if known.is_empty() {
        (0..scan.len()).collect()
    } else {
        known
    }
}

/// Check if a port matches a known device (from config or built-in list).
fn is_known_device(port: &PortInfo, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }

    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.is_remembered(vid, pid),
        _ => false,
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Interactive port selection requires a terminal; pass --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err(format!("Prompt failed: {io_err}"))
            }
        },
    }
}

fn offer_rescan() -> Result<PortChoice> {
    eprintln!(
        "{} No devices found. Make sure the device is plugged into the computer's USB port.",
        style("!").yellow().bold()
    );
    let rescan = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Rescan?")
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if rescan {
        Ok(PortChoice::Rescan)
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

/// Interactive port selection, recognized devices first.
fn select_port_interactive(scan: &PortScan, config: &Config) -> Result<PortChoice> {
    eprintln!(
        "{} Found {} port(s); recognized USB-serial bridges are listed first",
        style("ℹ").blue(),
        scan.len()
    );

    let mut order: Vec<usize> = (0..scan.len()).collect();
    order.sort_by_key(|&i| !is_known_device(&scan.ports[i], config));

    let labels = format_port_list(&scan.ports);
    let term_width = usize::from(console::Term::stderr().size().1);
    let max_item_width = term_width.saturating_sub(4);
    let mut items: Vec<String> = order
        .iter()
        .map(|&i| {
            let label = if is_known_device(&scan.ports[i], config) {
                style(&labels[i]).bold().to_string()
            } else {
                labels[i].clone()
            };
            console::truncate_str(&label, max_item_width, "\u{2026}").into_owned()
        })
        .collect();
    items.push(style("Rescan").dim().to_string());

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the device to download from")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(pos) if pos == order.len() => Ok(PortChoice::Rescan),
        Some(pos) => order
            .get(pos)
            .map(|&i| PortChoice::Index(i))
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {pos}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Ask user if they want to remember this port's USB bridge.
pub fn ask_remember_port(port: &PortInfo, config: &mut Config) -> Result<()> {
    if port.device.is_known() {
        return Ok(());
    }
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        if config.is_remembered(vid, pid) {
            return Ok(());
        }

        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Remember USB device {vid:04X}:{pid:04X} so it is listed first next time?"
            ))
            .default(false)
            .interact_opt()
            .map_err(map_prompt_error)?
            .unwrap_or(false);

        if confirmed {
            if let Err(e) = config.remember_usb_device(vid, pid) {
                error!("Failed to save port configuration: {e}");
            }
        }
    }

    Ok(())
}
