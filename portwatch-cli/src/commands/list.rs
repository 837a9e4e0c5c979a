//! `list`: a single enumeration pass.

use anyhow::Result;
use console::style;
use portwatch::{EntryKind, Execution};
use std::thread;
use std::time::{Duration, Instant};

use super::{MAX_IDLE, build_handler, format_endpoint};
use crate::Cli;
use crate::config::Config;

pub(crate) fn cmd_list(cli: &Cli, config: &Config, json: bool, browse: Option<u64>) -> Result<()> {
    let browse = browse.map(Duration::from_secs).filter(|d| !d.is_zero());
    let mut handler = build_handler(cli, config, Execution::Inline, browse.is_some())?;

    handler.initialize();
    if let Some(window) = browse {
        if !cli.quiet && !json {
            eprintln!(
                "{} Browsing for network receivers ({}s)...",
                style("⏳").yellow(),
                window.as_secs()
            );
        }
        let until = Instant::now() + window;
        while Instant::now() < until {
            handler.poll();
            thread::sleep(MAX_IDLE);
        }
        // Rebuild the snapshot with everything the browse found
        handler.reinitialize();
    }
    handler.poll();
    handler.shutdown();

    let dfu = handler
        .picker()
        .entries()
        .iter()
        .find(|e| e.kind == EntryKind::Dfu);

    if json {
        let value = serde_json::json!({
            "ports": handler.ports(),
            "usb_mode": handler.is_dfu_available(),
            "picker": handler.picker().entries(),
            "selected": handler.picker().selected(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    eprintln!("{}", style("Endpoints").bold().underlined());
    if handler.ports().is_empty() && dfu.is_none() {
        eprintln!("  {}", style("No endpoints found").dim());
        return Ok(());
    }

    let selected = handler.picker().selected();
    for port in handler.ports() {
        let marker = if selected == Some(port.path.as_str()) {
            style("*").green().bold()
        } else {
            style("•").green()
        };
        println!("  {marker} {}", format_endpoint(port));
    }
    if let Some(entry) = dfu {
        println!("  {} {}", style("!").yellow().bold(), style(&entry.label).yellow());
    }

    Ok(())
}
