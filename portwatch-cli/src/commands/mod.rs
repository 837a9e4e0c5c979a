//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod list;
pub(crate) mod wait;
pub(crate) mod watch;

use anyhow::{Context, Result};
use console::style;
use log::warn;
use portwatch::{Endpoint, Execution, MdnsFeed, PortEvent, PortHandler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::Cli;
use crate::config::Config;

/// Upper bound on how long the run loop sleeps between polls.
pub(crate) const MAX_IDLE: Duration = Duration::from_millis(50);

/// Build a handler from the merged configuration and global flags.
pub(crate) fn build_handler(
    cli: &Cli,
    config: &Config,
    execution: Execution,
    mdns: bool,
) -> Result<PortHandler> {
    let mut builder = PortHandler::builder()
        .config(config.handler_config())
        .execution(execution)
        .settings(config.port_settings(cli.show_all, cli.show_virtual));

    if mdns && !cli.no_mdns && config.mdns_enabled() {
        match MdnsFeed::new(config.service_type()) {
            Ok(feed) => builder = builder.feed(feed),
            Err(e) => warn!("mDNS discovery unavailable: {e}"),
        }
    }

    builder.build().context("Invalid discovery configuration")
}

/// Set `stop` on Ctrl-C.
pub(crate) fn install_interrupt(stop: &Arc<AtomicBool>) -> Result<()> {
    let stop = Arc::clone(stop);
    ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
        .context("Failed to install Ctrl-C handler")
}

/// One-line human description of an endpoint.
pub(crate) fn format_endpoint(endpoint: &Endpoint) -> String {
    let ids = match (endpoint.vendor_id, endpoint.product_id) {
        (Some(vid), Some(pid)) if !endpoint.is_network() => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let name = endpoint
        .display_name
        .as_deref()
        .map(|n| format!(" - {}", style(n).dim()))
        .unwrap_or_default();
    format!("{}{ids}{name}", style(&endpoint.path).cyan())
}

/// Print an event to stdout, as text or a JSON line.
pub(crate) fn print_event(event: &PortEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to encode event: {e}"),
        }
        return;
    }

    match event {
        PortEvent::Added { ports } => {
            for port in ports {
                println!("{} {}", style("+").green().bold(), format_endpoint(port));
            }
        },
        PortEvent::Removed { ports } => {
            for port in ports {
                println!("{} {}", style("-").red().bold(), format_endpoint(port));
            }
        },
        PortEvent::UsbModeChanged { active } => {
            let state = if *active { "entered" } else { "left" };
            println!("{} firmware-update mode {state}", style("!").yellow().bold());
        },
        PortEvent::Selected { value } => {
            println!("{} selected {}", style("*").blue(), style(value).cyan());
        },
    }
}
