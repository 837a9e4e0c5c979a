//! Reconciliation engine and lifecycle.
//!
//! [`PortHandler`] owns every piece of discovery state: the service
//! registry, the endpoint snapshot, pending callbacks, the picker and the
//! timer queue. Nothing runs on its own; the owner calls [`PortHandler::poll`]
//! (directly or through [`PortHandler::run_until`]) and every side effect
//! happens inside that call, on the owner's thread.
//!
//! Enumeration and probing run behind message-passing workers. A tick only
//! dispatches requests; reports are applied when they arrive, USB reports
//! before serial ones, and within a serial report removals strictly before
//! additions.
//!
//! ```no_run
//! use portwatch::{PortHandler, Timeout};
//!
//! let mut handler = PortHandler::builder().build()?;
//! handler.initialize();
//! handler.on_added("example", Timeout::Default, |notification| {
//!     println!("{notification:?}");
//! });
//! loop {
//!     handler.poll();
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! # Ok::<(), portwatch::Error>(())
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace};

use crate::clock::{Clock, SystemClock};
use crate::connection::{ConnectionLayer, Detached};
use crate::device::{Endpoint, UsbDevice, UsbFilter};
use crate::dispatch::{CallbackHandle, CallbackKind, Dispatcher, Notification, Timeout};
use crate::enumerate::{SerialSource, UsbSource, merge_serial};
use crate::error::Result;
use crate::event::PortEvent;
use crate::feed::ServiceFeed;
use crate::probe::{PassStart, Reachability, ReachabilityProber, TcpReachability};
use crate::registry::ServiceRegistry;
use crate::schedule::{Scheduler, Task, TimerId};
use crate::select::{PortPicker, auto_select, sort_ports};
use crate::settings::{HandlerConfig, PortSettings, SettingsSource};
use crate::worker::{Execution, ScanWorker};

/// Endpoints of `first` that have no path-equal counterpart in `second`.
///
/// Order follows `first`. Each element of `second` cancels at most one
/// element of `first`.
pub fn difference(first: &[Endpoint], second: &[Endpoint]) -> Vec<Endpoint> {
    let mut result = first.to_vec();
    for item in second {
        if let Some(index) = result.iter().position(|e| e.same_path(item)) {
            result.remove(index);
        }
    }
    result
}

fn describe(endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .map(|e| e.path.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(feature = "native")]
fn default_serial_source() -> Box<dyn SerialSource> {
    Box::new(crate::native::NativeSerialSource)
}

#[cfg(not(feature = "native"))]
fn default_serial_source() -> Box<dyn SerialSource> {
    Box::new(crate::enumerate::NoDevices)
}

#[cfg(feature = "native")]
fn default_usb_source() -> Box<dyn UsbSource> {
    Box::new(crate::native::NativeUsbSource)
}

#[cfg(not(feature = "native"))]
fn default_usb_source() -> Box<dyn UsbSource> {
    Box::new(crate::enumerate::NoDevices)
}

/// Builder for [`PortHandler`].
pub struct PortHandlerBuilder {
    config: HandlerConfig,
    clock: Arc<dyn Clock>,
    execution: Execution,
    serial: Box<dyn SerialSource>,
    usb: Box<dyn UsbSource>,
    reachability: Arc<dyn Reachability>,
    feed: Option<Box<dyn ServiceFeed>>,
    connection: Box<dyn ConnectionLayer>,
    settings: Box<dyn SettingsSource>,
}

impl Default for PortHandlerBuilder {
    fn default() -> Self {
        Self {
            config: HandlerConfig::default(),
            clock: Arc::new(SystemClock),
            execution: Execution::default(),
            serial: default_serial_source(),
            usb: default_usb_source(),
            reachability: Arc::new(TcpReachability),
            feed: None,
            connection: Box::new(Detached),
            settings: Box::new(PortSettings::default()),
        }
    }
}

impl PortHandlerBuilder {
    /// Engine timings and filters.
    #[must_use]
    pub fn config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source.
    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Where enumeration and probe jobs run.
    #[must_use]
    pub fn execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    /// Raw serial device source.
    #[must_use]
    pub fn serial_source(mut self, source: impl SerialSource + 'static) -> Self {
        self.serial = Box::new(source);
        self
    }

    /// Raw USB device source.
    #[must_use]
    pub fn usb_source(mut self, source: impl UsbSource + 'static) -> Self {
        self.usb = Box::new(source);
        self
    }

    /// Reachability check used by the prober.
    #[must_use]
    pub fn reachability(mut self, checker: impl Reachability + 'static) -> Self {
        self.reachability = Arc::new(checker);
        self
    }

    /// Passive service discovery feed.
    #[must_use]
    pub fn feed(mut self, feed: impl ServiceFeed + 'static) -> Self {
        self.feed = Some(Box::new(feed));
        self
    }

    /// Connection layer collaborator.
    #[must_use]
    pub fn connection(mut self, connection: impl ConnectionLayer + 'static) -> Self {
        self.connection = Box::new(connection);
        self
    }

    /// Persisted settings, read at every (re)initialization.
    #[must_use]
    pub fn settings(mut self, settings: impl SettingsSource + 'static) -> Self {
        self.settings = Box::new(settings);
        self
    }

    /// Validate the configuration and create the handler.
    ///
    /// No timer is armed until [`PortHandler::initialize`].
    pub fn build(self) -> Result<PortHandler> {
        self.config.validate()?;

        let mut serial = self.serial;
        let mut usb = self.usb;
        let prober = ReachabilityProber::new(
            self.reachability,
            self.execution,
            self.config.probe_port,
            self.config.probe_timeout,
        );

        Ok(PortHandler {
            serial_worker: ScanWorker::new("serial", self.execution, move |show_all: bool| {
                serial.list_serial_devices(show_all)
            }),
            usb_worker: ScanWorker::new(
                "usb",
                self.execution,
                move |filters: Arc<[UsbFilter]>| usb.list_usb_devices(&filters),
            ),
            prober,
            config: self.config,
            clock: self.clock,
            registry: ServiceRegistry::new(),
            feed: self.feed,
            connection: self.connection,
            settings_source: self.settings,
            settings: PortSettings::default(),
            scheduler: Scheduler::new(),
            check_timer: None,
            probe_unlock_timer: None,
            dispatcher: Dispatcher::new(),
            picker: PortPicker::new(),
            ports: Vec::new(),
            initial_ports: None,
            port_available: false,
            dfu_available: false,
            subscribers: Vec::new(),
        })
    }
}

/// The discovery and reconciliation engine.
pub struct PortHandler {
    config: HandlerConfig,
    clock: Arc<dyn Clock>,
    registry: ServiceRegistry,
    feed: Option<Box<dyn ServiceFeed>>,
    prober: ReachabilityProber,
    serial_worker: ScanWorker<bool, Endpoint>,
    usb_worker: ScanWorker<Arc<[UsbFilter]>, UsbDevice>,
    connection: Box<dyn ConnectionLayer>,
    settings_source: Box<dyn SettingsSource>,
    settings: PortSettings,
    scheduler: Scheduler,
    check_timer: Option<TimerId>,
    probe_unlock_timer: Option<TimerId>,
    dispatcher: Dispatcher,
    picker: PortPicker,
    /// Sorted presentable endpoint list.
    ports: Vec<Endpoint>,
    /// Snapshot; `None` until the first serial report after (re)initialization.
    initial_ports: Option<Vec<Endpoint>>,
    port_available: bool,
    dfu_available: bool,
    subscribers: Vec<Sender<PortEvent>>,
}

impl PortHandler {
    /// Start building a handler.
    pub fn builder() -> PortHandlerBuilder {
        PortHandlerBuilder::default()
    }

    /// Arm the probe and feed-refresh timers and start reconciling.
    ///
    /// Calling it again restarts every timer.
    pub fn initialize(&mut self) {
        let now = self.clock.now();
        self.scheduler.cancel_task(Task::Probe);
        self.scheduler.cancel_task(Task::FeedRefresh);
        self.scheduler.schedule(Task::Probe, now);
        if self.feed.is_some() {
            self.scheduler
                .schedule(Task::FeedRefresh, now + self.config.feed_refresh_interval);
        }
        self.reinitialize();
    }

    /// Forget the snapshot, reload settings and run a check immediately.
    ///
    /// The next serial report becomes the new snapshot without firing any
    /// added/removed callbacks.
    pub fn reinitialize(&mut self) {
        debug!("Reinitializing port discovery");
        self.initial_ports = None;
        if let Some(id) = self.check_timer.take() {
            self.scheduler.cancel(id);
        }
        self.serial_worker.reset();
        self.usb_worker.reset();
        self.settings = self.settings_source.load();
        self.check(self.clock.now());
    }

    /// Cancel every timer, drop pending callbacks and stop the feed.
    pub fn shutdown(&mut self) {
        debug!("Shutting down port discovery");
        self.scheduler.clear();
        self.check_timer = None;
        self.probe_unlock_timer = None;
        self.dispatcher.flush();
        self.serial_worker.reset();
        self.usb_worker.reset();
        if let Some(feed) = self.feed.as_mut() {
            feed.shutdown();
        }
    }

    /// Apply pending feed changes, probe outcomes and scan reports, and run
    /// every task and callback timeout that is due.
    pub fn poll(&mut self) {
        self.drain_feed();
        self.drain_probes();

        loop {
            let now = self.clock.now();
            let task_due = self.scheduler.next_deadline().filter(|d| *d <= now);
            let callback_due = self.dispatcher.next_deadline().filter(|d| *d <= now);

            match (task_due, callback_due) {
                (None, None) => break,
                (Some(task), Some(callback)) if callback < task => {
                    self.dispatcher.expire(callback);
                },
                (None, Some(callback)) => {
                    self.dispatcher.expire(callback);
                },
                (Some(_), _) => {
                    if let Some((_, task)) = self.scheduler.pop_due(now) {
                        self.run_task(task, now);
                    }
                    self.drain_scans();
                },
            }
        }

        self.drain_scans();
    }

    /// Poll until `stop` is set, sleeping until the next deadline but never
    /// longer than `max_idle` so background reports are picked up promptly.
    pub fn run_until(&mut self, stop: &AtomicBool, max_idle: Duration) {
        while !stop.load(Ordering::Relaxed) {
            self.poll();
            let now = self.clock.now();
            let idle = self
                .next_deadline()
                .map_or(max_idle, |d| d.saturating_duration_since(now).min(max_idle));
            if !idle.is_zero() {
                thread::sleep(idle);
            }
        }
    }

    /// Wait for the next "added" event.
    pub fn on_added<F>(&mut self, name: impl Into<String>, timeout: Timeout, code: F) -> CallbackHandle
    where
        F: FnOnce(Notification) + Send + 'static,
    {
        self.register(CallbackKind::Added, name.into(), timeout, Box::new(code))
    }

    /// Wait for the next "removed" event.
    pub fn on_removed<F>(&mut self, name: impl Into<String>, timeout: Timeout, code: F) -> CallbackHandle
    where
        F: FnOnce(Notification) + Send + 'static,
    {
        self.register(CallbackKind::Removed, name.into(), timeout, Box::new(code))
    }

    fn register(
        &mut self,
        kind: CallbackKind,
        name: String,
        timeout: Timeout,
        code: crate::dispatch::Callback,
    ) -> CallbackHandle {
        let now = self.clock.now();
        let deadline = match timeout {
            // A zero timeout means "use the default", never "fire now"
            Timeout::Default => Some(now + self.config.callback_timeout),
            Timeout::After(after) if after.is_zero() => Some(now + self.config.callback_timeout),
            Timeout::After(after) => Some(now + after),
            Timeout::Never => None,
        };
        self.dispatcher.register(kind, name, deadline, code)
    }

    /// Drop one registration without firing it.
    pub fn cancel(&mut self, handle: CallbackHandle) -> bool {
        self.dispatcher.cancel(handle)
    }

    /// Drop every registration without firing. Returns how many were dropped.
    pub fn flush_all(&mut self) -> usize {
        self.dispatcher.flush()
    }

    /// Receive every [`PortEvent`] from now on.
    pub fn subscribe(&mut self) -> Receiver<PortEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Select a picker entry on behalf of the user.
    pub fn select(&mut self, value: &str) -> bool {
        let changed = self.picker.select(value);
        if changed {
            self.emit(PortEvent::Selected {
                value: value.to_string(),
            });
        }
        changed
    }

    /// Whether a connectable endpoint is known to be present.
    pub fn is_port_available(&self) -> bool {
        self.port_available
    }

    /// Whether an allow-listed device is in firmware-update mode.
    pub fn is_dfu_available(&self) -> bool {
        self.dfu_available
    }

    /// Current sorted endpoint list.
    pub fn ports(&self) -> &[Endpoint] {
        &self.ports
    }

    /// Current snapshot, `None` before the first report.
    pub fn snapshot(&self) -> Option<&[Endpoint]> {
        self.initial_ports.as_deref()
    }

    /// Presentable picker entries and selection.
    pub fn picker(&self) -> &PortPicker {
        &self.picker
    }

    /// Known network services.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Engine configuration.
    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Settings loaded at the last (re)initialization.
    pub fn settings(&self) -> PortSettings {
        self.settings
    }

    /// Number of pending callbacks of `kind`.
    pub fn pending_callbacks(&self, kind: CallbackKind) -> usize {
        self.dispatcher.pending(kind)
    }

    /// Earliest task or callback deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.scheduler.next_deadline(), self.dispatcher.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn run_task(&mut self, task: Task, now: Instant) {
        trace!("Running {task:?}");
        match task {
            Task::Check => {
                self.check_timer = None;
                self.check(now);
            },
            Task::Probe => self.probe_pass(now),
            Task::ProbeUnlock => {
                self.probe_unlock_timer = None;
                if self.prober.is_locked() {
                    debug!("Probe pass timed out, releasing");
                    self.prober.unlock();
                }
            },
            Task::FeedRefresh => self.refresh_feed(now),
        }
    }

    fn check(&mut self, now: Instant) {
        // Each branch is gated on the other enumerator's flag
        if !self.port_available {
            self.usb_worker.request(Arc::clone(&self.config.usb_filters));
        }
        if !self.dfu_available {
            self.serial_worker
                .request(self.settings.show_all_serial_devices);
        }
        self.check_timer = Some(
            self.scheduler
                .schedule(Task::Check, now + self.config.check_interval),
        );
    }

    fn probe_pass(&mut self, now: Instant) {
        self.scheduler
            .schedule(Task::Probe, now + self.config.probe_interval);

        let snapshot = self.initial_ports.as_deref().unwrap_or_default();
        if let PassStart::Started(count) = self.prober.start_pass(snapshot) {
            trace!("Started probe pass over {count} endpoint(s)");
            self.drain_probes();
            if self.prober.is_locked() {
                let deadline = now + self.config.probe_timeout + Duration::from_millis(1);
                self.probe_unlock_timer = Some(self.scheduler.schedule(Task::ProbeUnlock, deadline));
            }
        }
    }

    fn refresh_feed(&mut self, now: Instant) {
        self.scheduler
            .schedule(Task::FeedRefresh, now + self.config.feed_refresh_interval);
        if self.connection.is_connected() {
            trace!("Connected, skipping discovery refresh");
            return;
        }
        if let Some(feed) = self.feed.as_mut() {
            debug!("Refreshing service discovery");
            feed.refresh();
        }
    }

    fn drain_feed(&mut self) {
        let Some(feed) = self.feed.as_mut() else {
            return;
        };
        for change in feed.poll_changes() {
            debug!("Service {:?}: {}", change.action, change.record.fqdn);
            self.registry.apply(change);
        }
    }

    fn drain_probes(&mut self) {
        for outcome in self.prober.drain() {
            if outcome.reachable {
                continue;
            }
            if let Some(fqdn) = outcome.endpoint.fqdn.as_deref() {
                info!("{} is unreachable, dropping {fqdn}", outcome.endpoint.path);
                self.registry.remove(fqdn);
            }
        }
        if !self.prober.is_locked() {
            if let Some(id) = self.probe_unlock_timer.take() {
                self.scheduler.cancel(id);
            }
        }
    }

    fn drain_scans(&mut self) {
        if let Some(devices) = self.usb_worker.try_take() {
            self.apply_usb(devices);
        }
        if let Some(raw) = self.serial_worker.try_take() {
            self.apply_serial(raw);
        }
    }

    fn apply_usb(&mut self, devices: Vec<UsbDevice>) {
        let before = self.picker.selected().map(str::to_owned);
        let was_available = self.dfu_available;

        if let Some(device) = devices.first() {
            if !self.picker.has_dfu() {
                self.picker.show_dfu(device.product_name.as_deref());
            }
            self.dfu_available = true;
        } else {
            self.dfu_available = false;
            if self.picker.remove_dfu() {
                self.rebuild_picker(self.ports.clone());
            }
        }

        if was_available != self.dfu_available {
            info!(
                "Firmware-update mode {}",
                if self.dfu_available { "detected" } else { "gone" }
            );
            self.emit(PortEvent::UsbModeChanged {
                active: self.dfu_available,
            });
        }

        if !self.picker.is_dfu_selected()
            && !(self.connection.is_connected() || self.connection.is_connecting())
        {
            self.connection.reset_state();
        }

        self.emit_selection(before);
    }

    fn apply_serial(&mut self, raw: Vec<Endpoint>) {
        let before = self.picker.selected().map(str::to_owned);
        let current = merge_serial(raw, &self.registry);

        let snapshot = match self.initial_ports.take() {
            None => {
                debug!("Initial endpoints: [{}]", describe(&current));
                self.rebuild_picker(current.clone());
                self.auto_select();
                current
            },
            Some(snapshot) => {
                let snapshot = self.reconcile_removed(snapshot, &current);
                self.reconcile_added(snapshot, current)
            },
        };
        self.initial_ports = Some(snapshot);

        self.emit_selection(before);
    }

    fn reconcile_removed(&mut self, snapshot: Vec<Endpoint>, current: &[Endpoint]) -> Vec<Endpoint> {
        let removed = difference(&snapshot, current);
        if removed.is_empty() {
            return snapshot;
        }

        info!("Removed: [{}]", describe(&removed));
        self.port_available = false;

        if let Some(connected) = self.connection.connected_path() {
            if removed.iter().any(|e| e.path == connected) {
                info!("Connected endpoint {connected} vanished, disconnecting");
                self.connection.force_disconnect();
            }
        }

        self.dispatcher.fire(CallbackKind::Removed, &removed);

        let remaining: Vec<Endpoint> = snapshot
            .into_iter()
            .filter(|e| !removed.iter().any(|r| r.same_path(e)))
            .collect();
        self.rebuild_picker(remaining.clone());
        self.emit(PortEvent::Removed { ports: removed });
        remaining
    }

    fn reconcile_added(&mut self, snapshot: Vec<Endpoint>, current: Vec<Endpoint>) -> Vec<Endpoint> {
        let added = difference(&current, &snapshot);
        if added.is_empty() {
            return snapshot;
        }

        info!("Added: [{}]", describe(&added));
        self.rebuild_picker(current.clone());
        if let [only] = added.as_slice() {
            self.picker.select(&only.path);
        } else {
            self.auto_select();
        }
        self.port_available = true;

        if self.connection.is_flashing() {
            self.connection.mark_needs_verification();
        }

        self.dispatcher.fire(CallbackKind::Added, &added);

        if self.config.auto_connect
            && !self.connection.is_connecting()
            && !self.connection.is_connected()
            && !self.connection.is_flashing()
        {
            debug!("Auto-connecting");
            self.connection.request_connect();
        }

        self.emit(PortEvent::Added { ports: added });
        current
    }

    /// While in firmware-update mode only the sorted list is refreshed; the
    /// picker keeps its update-mode entries.
    fn rebuild_picker(&mut self, ports: Vec<Endpoint>) {
        self.ports = if self.dfu_available {
            sort_ports(ports)
        } else {
            self.picker
                .rebuild(ports, self.settings.show_virtual_mode)
        };
    }

    fn auto_select(&mut self) {
        let Some(path) = auto_select(&self.ports, self.config.os_family).map(|e| e.path.clone())
        else {
            return;
        };
        debug!("Auto-selected {path}");
        self.picker.select(&path);
        self.port_available = true;
    }

    fn emit_selection(&mut self, before: Option<String>) {
        let Some(selected) = self.picker.selected() else {
            return;
        };
        if before.as_deref() != Some(selected) {
            let value = selected.to_string();
            self.emit(PortEvent::Selected { value });
        }
    }

    fn emit(&mut self, event: PortEvent) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
