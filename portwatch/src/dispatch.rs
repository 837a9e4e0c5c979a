//! One-shot, timeout-guarded callbacks for endpoint changes.
//!
//! Every registration is consumed exactly once: by the next matching
//! reconciliation event, by its deadline, or silently by a flush or cancel.
//! Entries to fire are taken out of the pending list before any callback
//! runs, so a callback can never observe or disturb a half-updated list.

use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::device::Endpoint;

/// Which event a callback waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Endpoints appeared.
    Added,
    /// Endpoints disappeared.
    Removed,
}

/// Argument passed to a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The event fired with these endpoints.
    Ports(Vec<Endpoint>),
    /// Nothing happened before the deadline.
    TimedOut,
}

impl Notification {
    /// Endpoints carried by the event, `None` on timeout.
    pub fn ports(&self) -> Option<&[Endpoint]> {
        match self {
            Self::Ports(ports) => Some(ports),
            Self::TimedOut => None,
        }
    }

    /// Whether this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Boxed one-shot callback.
pub type Callback = Box<dyn FnOnce(Notification) + Send>;

/// Deadline policy for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Use the handler's configured callback timeout.
    #[default]
    Default,
    /// Fire with [`Notification::TimedOut`] after this long. Zero means
    /// the configured default.
    After(Duration),
    /// Wait indefinitely.
    Never,
}

/// Handle identifying a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle {
    id: u64,
    kind: CallbackKind,
}

impl CallbackHandle {
    /// The event this registration waits for.
    pub fn kind(&self) -> CallbackKind {
        self.kind
    }
}

struct Pending {
    id: u64,
    name: String,
    code: Callback,
    deadline: Option<Instant>,
}

/// Two ordered lists of pending one-shot callbacks.
#[derive(Default)]
pub struct Dispatcher {
    added: Vec<Pending>,
    removed: Vec<Pending>,
    next_id: u64,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    fn list_mut(&mut self, kind: CallbackKind) -> &mut Vec<Pending> {
        match kind {
            CallbackKind::Added => &mut self.added,
            CallbackKind::Removed => &mut self.removed,
        }
    }

    fn list(&self, kind: CallbackKind) -> &[Pending] {
        match kind {
            CallbackKind::Added => &self.added,
            CallbackKind::Removed => &self.removed,
        }
    }

    /// Register a callback. `deadline: None` waits indefinitely.
    pub fn register(
        &mut self,
        kind: CallbackKind,
        name: impl Into<String>,
        deadline: Option<Instant>,
        code: Callback,
    ) -> CallbackHandle {
        let id = self.next_id;
        self.next_id += 1;
        let name = name.into();
        trace!("Registered {kind:?} callback {name}");
        self.list_mut(kind).push(Pending {
            id,
            name,
            code,
            deadline,
        });
        CallbackHandle { id, kind }
    }

    /// Fire every pending `kind` callback, newest first, with `ports`.
    /// Returns how many fired.
    pub fn fire(&mut self, kind: CallbackKind, ports: &[Endpoint]) -> usize {
        let due = std::mem::take(self.list_mut(kind));
        let count = due.len();
        for entry in due.into_iter().rev() {
            trace!("Firing {kind:?} callback {}", entry.name);
            (entry.code)(Notification::Ports(ports.to_vec()));
        }
        count
    }

    /// Fire [`Notification::TimedOut`] for every callback whose deadline
    /// is at or before `now`, earliest deadline first.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut due: Vec<Pending> = Vec::new();
        for kind in [CallbackKind::Added, CallbackKind::Removed] {
            let list = self.list_mut(kind);
            let mut index = 0;
            while index < list.len() {
                if list[index].deadline.is_some_and(|d| d <= now) {
                    due.push(list.remove(index));
                } else {
                    index += 1;
                }
            }
        }
        due.sort_by_key(|entry| (entry.deadline, entry.id));

        let count = due.len();
        for entry in due {
            debug!("Callback timeout - {}", entry.name);
            (entry.code)(Notification::TimedOut);
        }
        count
    }

    /// Drop a registration without firing it.
    pub fn cancel(&mut self, handle: CallbackHandle) -> bool {
        let list = self.list_mut(handle.kind);
        let before = list.len();
        list.retain(|entry| entry.id != handle.id);
        list.len() != before
    }

    /// Drop every registration without firing. Returns how many were dropped.
    pub fn flush(&mut self) -> usize {
        let killed = self.added.len() + self.removed.len();
        self.added.clear();
        self.removed.clear();
        if killed > 0 {
            debug!("Flushed {killed} pending callback(s)");
        }
        killed
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.added
            .iter()
            .chain(&self.removed)
            .filter_map(|entry| entry.deadline)
            .min()
    }

    /// Number of pending `kind` callbacks.
    pub fn pending(&self, kind: CallbackKind) -> usize {
        self.list(kind).len()
    }

    /// Names of pending `kind` callbacks in registration order.
    pub fn pending_names(&self, kind: CallbackKind) -> Vec<&str> {
        self.list(kind).iter().map(|e| e.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(String, Notification)>>>;

    fn recorder(log: &Log, name: &str) -> Callback {
        let log = Arc::clone(log);
        let name = name.to_string();
        Box::new(move |n| log.lock().unwrap().push((name, n)))
    }

    #[test]
    fn test_fire_newest_first_and_evict() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(CallbackKind::Removed, "first", None, recorder(&log, "first"));
        dispatcher.register(CallbackKind::Removed, "second", None, recorder(&log, "second"));

        let ports = vec![Endpoint::new("COM3")];
        assert_eq!(dispatcher.fire(CallbackKind::Removed, &ports), 2);
        assert_eq!(dispatcher.pending(CallbackKind::Removed), 0);

        let log = log.lock().unwrap();
        assert_eq!(log[0].0, "second");
        assert_eq!(log[1].0, "first");
        assert_eq!(log[0].1, Notification::Ports(ports.clone()));
    }

    #[test]
    fn test_fire_only_matching_kind() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(CallbackKind::Added, "added", None, recorder(&log, "added"));

        assert_eq!(dispatcher.fire(CallbackKind::Removed, &[]), 0);
        assert_eq!(dispatcher.pending(CallbackKind::Added), 1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_timeout_fires_once() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        let t0 = Instant::now();
        dispatcher.register(
            CallbackKind::Added,
            "wait",
            Some(t0 + Duration::from_millis(1000)),
            recorder(&log, "wait"),
        );

        assert_eq!(dispatcher.expire(t0 + Duration::from_millis(999)), 0);
        assert_eq!(dispatcher.expire(t0 + Duration::from_millis(1000)), 1);
        assert_eq!(dispatcher.fire(CallbackKind::Added, &[Endpoint::new("COM3")]), 0);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].1.is_timeout());
    }

    #[test]
    fn test_event_cancels_deadline() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        let t0 = Instant::now();
        dispatcher.register(
            CallbackKind::Added,
            "wait",
            Some(t0 + Duration::from_millis(1000)),
            recorder(&log, "wait"),
        );

        dispatcher.fire(CallbackKind::Added, &[Endpoint::new("COM3")]);
        assert_eq!(dispatcher.next_deadline(), None);
        assert_eq!(dispatcher.expire(t0 + Duration::from_secs(60)), 0);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_expire_in_deadline_order_across_lists() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        let t0 = Instant::now();
        dispatcher.register(
            CallbackKind::Added,
            "late",
            Some(t0 + Duration::from_millis(20)),
            recorder(&log, "late"),
        );
        dispatcher.register(
            CallbackKind::Removed,
            "early",
            Some(t0 + Duration::from_millis(10)),
            recorder(&log, "early"),
        );
        dispatcher.register(CallbackKind::Removed, "forever", None, recorder(&log, "forever"));

        assert_eq!(dispatcher.expire(t0 + Duration::from_secs(1)), 2);
        let names: Vec<String> = log.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, ["early", "late"]);
        assert_eq!(dispatcher.pending_names(CallbackKind::Removed), ["forever"]);
    }

    #[test]
    fn test_flush_is_idempotent_and_silent() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        let t0 = Instant::now();
        dispatcher.register(CallbackKind::Added, "a", Some(t0), recorder(&log, "a"));
        dispatcher.register(CallbackKind::Removed, "r", None, recorder(&log, "r"));

        assert_eq!(dispatcher.flush(), 2);
        assert_eq!(dispatcher.flush(), 0);
        assert_eq!(dispatcher.expire(t0 + Duration::from_secs(1)), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancel() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        let handle = dispatcher.register(CallbackKind::Added, "a", None, recorder(&log, "a"));
        dispatcher.register(CallbackKind::Added, "b", None, recorder(&log, "b"));

        assert!(dispatcher.cancel(handle));
        assert!(!dispatcher.cancel(handle));
        assert_eq!(dispatcher.pending_names(CallbackKind::Added), ["b"]);
        assert_eq!(handle.kind(), CallbackKind::Added);
    }
}
