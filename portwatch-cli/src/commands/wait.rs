//! `wait`: block until the next add or remove event.

use anyhow::Result;
use portwatch::{Execution, Notification, Timeout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{MAX_IDLE, build_handler, format_endpoint, install_interrupt};
use crate::config::Config;
use crate::{Cli, CliError, WaitEvent};

pub(crate) fn cmd_wait(
    cli: &Cli,
    config: &Config,
    event: WaitEvent,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    if timeout_ms == Some(0) {
        return Err(CliError::Usage("--timeout must be greater than zero".to_string()).into());
    }

    let mut handler = build_handler(cli, config, Execution::Background, true)?;
    let stop = Arc::new(AtomicBool::new(false));
    install_interrupt(&stop)?;

    let outcome: Arc<Mutex<Option<Notification>>> = Arc::default();
    let timeout = timeout_ms.map_or(Timeout::Never, |ms| Timeout::After(Duration::from_millis(ms)));
    let callback = {
        let (outcome, stop) = (Arc::clone(&outcome), Arc::clone(&stop));
        move |notification: Notification| {
            if let Ok(mut slot) = outcome.lock() {
                *slot = Some(notification);
            }
            stop.store(true, Ordering::Relaxed);
        }
    };

    handler.initialize();
    match event {
        WaitEvent::Added => handler.on_added("cli-wait", timeout, callback),
        WaitEvent::Removed => handler.on_removed("cli-wait", timeout, callback),
    };
    handler.run_until(&stop, MAX_IDLE);
    handler.shutdown();

    let notification = outcome.lock().ok().and_then(|mut slot| slot.take());
    match notification {
        Some(Notification::Ports(ports)) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&ports)?);
            } else {
                for port in &ports {
                    println!("{}", format_endpoint(port));
                }
            }
            Ok(())
        },
        Some(Notification::TimedOut) => Err(CliError::Timeout(timeout_ms.unwrap_or_default()).into()),
        // Only Ctrl-C stops the loop without a notification
        None => Err(CliError::Cancelled.into()),
    }
}
