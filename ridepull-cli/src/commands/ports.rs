//! `list-ports` and `drivers` commands.

use anyhow::Result;
use console::style;
use ridepull::{NativePortEnumerator, PortEnumerator, PortInfo, PortScan, driver};

use crate::{Cli, config::Config};

/// Enumerator used by every command: OS ports plus configured extras.
pub(crate) fn enumerator(cli: &Cli, config: &Config) -> NativePortEnumerator {
    let explicit = cli
        .port
        .iter()
        .chain(config.port.connection.serial.iter())
        .cloned();
    NativePortEnumerator::new()
        .with_extra_ports(explicit)
        .with_extra_ports(config.port.connection.extra.iter().cloned())
}

fn port_json(port: &PortInfo) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "device": port.device.name(),
        "known": port.device.is_known(),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial_number,
    })
}

fn scan_json(scan: &PortScan) -> serde_json::Value {
    serde_json::json!({
        "ports": scan.ports.iter().map(port_json).collect::<Vec<_>>(),
        "warning": scan.warning,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let scan = enumerator(cli, config).scan();

    if json {
        println!("{}", serde_json::to_string_pretty(&scan_json(&scan))?);
        return Ok(());
    }

    if let Some(warning) = &scan.warning {
        eprintln!(
            "{} {}\n",
            style("Error Loading Device Drivers:").yellow().bold(),
            warning
        );
    }

    eprintln!("{}", style("Available devices:").bold().underlined());
    if scan.is_empty() {
        eprintln!("  {}", style("No devices found").dim());
    } else {
        for line in ridepull::format_port_list(&scan.ports) {
            eprintln!("  {} {}", style("•").green(), line);
        }
    }

    Ok(())
}

/// Drivers command implementation.
pub(crate) fn cmd_drivers(json: bool) -> Result<()> {
    let registry = driver::registry();
    let default = registry.default_name();

    if json {
        let drivers: Vec<serde_json::Value> = registry
            .names()
            .into_iter()
            .map(|name| serde_json::json!({ "name": name, "default": Some(name) == default }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&drivers)?);
        return Ok(());
    }

    for name in registry.names() {
        if Some(name) == default {
            println!("{name} {}", style("(default)").dim());
        } else {
            println!("{name}");
        }
    }

    Ok(())
}
