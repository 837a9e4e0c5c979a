//! Deadline queue for the engine's periodic tasks.
//!
//! The scheduler does not own threads. The handler asks it for due tasks
//! with the current instant and re-arms self-perpetuating timers after each
//! task runs, so drift equals processing time and a slow pass delays, but
//! never skips, the next.

use std::time::Instant;

/// Opaque handle returned by [`Scheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Periodic work owned by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Reconciliation tick (dispatch serial and USB scans).
    Check,
    /// Start a reachability probe pass.
    Probe,
    /// Release the probe pass re-entrancy flag.
    ProbeUnlock,
    /// Ask the passive discovery browser to refresh.
    FeedRefresh,
}

#[derive(Debug)]
struct Entry {
    id: TimerId,
    task: Task,
    deadline: Instant,
}

/// Ordered set of pending timers.
#[derive(Debug, Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
    next_id: u64,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `task` at `deadline`.
    pub fn schedule(&mut self, task: Task, deadline: Instant) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, task, deadline });
        id
    }

    /// Cancel a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Cancel every pending timer for `task`.
    pub fn cancel_task(&mut self, task: Task) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.task != task);
        before - self.entries.len()
    }

    /// Drop every pending timer.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove and return the earliest timer due at `now`.
    ///
    /// Ties resolve in arming order.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, Task)> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline <= now)
            .min_by_key(|(_, e)| (e.deadline, e.id.0))
            .map(|(i, _)| i)?;
        let entry = self.entries.remove(index);
        Some((entry.id, entry.task))
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Whether a timer for `task` is armed.
    pub fn is_scheduled(&self, task: Task) -> bool {
        self.entries.iter().any(|e| e.task == task)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        scheduler.schedule(Task::Probe, t0 + Duration::from_millis(20));
        scheduler.schedule(Task::Check, t0 + Duration::from_millis(10));

        assert_eq!(scheduler.pop_due(t0), None);

        let now = t0 + Duration::from_millis(30);
        assert_eq!(scheduler.pop_due(now).map(|(_, t)| t), Some(Task::Check));
        assert_eq!(scheduler.pop_due(now).map(|(_, t)| t), Some(Task::Probe));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_ties_resolve_in_arming_order() {
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        scheduler.schedule(Task::FeedRefresh, t0);
        scheduler.schedule(Task::Check, t0);

        assert_eq!(scheduler.pop_due(t0).map(|(_, t)| t), Some(Task::FeedRefresh));
        assert_eq!(scheduler.pop_due(t0).map(|(_, t)| t), Some(Task::Check));
    }

    #[test]
    fn test_cancel() {
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        let id = scheduler.schedule(Task::Check, t0);
        scheduler.schedule(Task::Probe, t0);

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert!(!scheduler.is_scheduled(Task::Check));
        assert_eq!(scheduler.cancel_task(Task::Probe), 1);
        assert_eq!(scheduler.next_deadline(), None);
    }
}
