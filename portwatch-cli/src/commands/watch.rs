//! `watch`: stream endpoint changes.

use anyhow::Result;
use console::style;
use log::debug;
use portwatch::Execution;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use super::{MAX_IDLE, build_handler, install_interrupt, print_event};
use crate::Cli;
use crate::config::Config;

pub(crate) fn cmd_watch(
    cli: &Cli,
    config: &Config,
    json: bool,
    duration: Option<u64>,
) -> Result<()> {
    let mut handler = build_handler(cli, config, Execution::Background, true)?;
    let stop = Arc::new(AtomicBool::new(false));
    install_interrupt(&stop)?;

    if let Some(secs) = duration {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            stop.store(true, Ordering::Relaxed);
        });
    }

    if !cli.quiet && !json {
        eprintln!(
            "{} Watching for endpoint changes (Ctrl-C to stop)",
            style("👀").cyan()
        );
    }

    let events = handler.subscribe();
    handler.initialize();

    thread::scope(|scope| {
        scope.spawn(move || {
            for event in events {
                print_event(&event, json);
            }
        });
        handler.run_until(&stop, MAX_IDLE);
        handler.shutdown();
        // Closes the event channel so the printer exits
        drop(handler);
    });

    debug!("Watch finished");
    Ok(())
}
