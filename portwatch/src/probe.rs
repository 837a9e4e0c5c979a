//! Active reachability checks for network endpoints.
//!
//! mDNS removals are unreliable, so every network endpoint in the current
//! snapshot is periodically connect-and-close probed. A failed probe is an
//! authoritative removal: the service record is evicted from the registry
//! and the endpoint disappears on the next serial pass.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::device::Endpoint;
use crate::worker::Execution;

/// Bounded-time reachability test.
pub trait Reachability: Send + Sync {
    /// Whether `host:port` accepts a TCP connection within `timeout`.
    fn is_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Plain TCP connect-and-close probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpReachability;

impl Reachability for TcpReachability {
    fn is_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("Cannot resolve {host}: {e}");
                return false;
            },
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    drop(stream);
                    return true;
                },
                Err(e) => trace!("Probe {addr} failed: {e}"),
            }
        }
        false
    }
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Endpoint that was probed.
    pub endpoint: Endpoint,
    /// Whether it answered.
    pub reachable: bool,
    pass: u64,
}

/// What [`ReachabilityProber::start_pass`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStart {
    /// A previous pass still holds the lock.
    Busy,
    /// No network endpoints; the pass completed immediately.
    Empty,
    /// This many probes were dispatched.
    Started(usize),
}

/// Runs probe passes with a re-entrancy guard.
pub struct ReachabilityProber {
    checker: Arc<dyn Reachability>,
    execution: Execution,
    port: u16,
    timeout: Duration,
    outcome_tx: Sender<ProbeOutcome>,
    outcome_rx: Receiver<ProbeOutcome>,
    locked: bool,
    pass: u64,
    pending: usize,
}

impl ReachabilityProber {
    /// Create a prober for `port` with a per-probe `timeout`.
    pub fn new(
        checker: Arc<dyn Reachability>,
        execution: Execution,
        port: u16,
        timeout: Duration,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel();
        Self {
            checker,
            execution,
            port,
            timeout,
            outcome_tx,
            outcome_rx,
            locked: false,
            pass: 0,
            pending: 0,
        }
    }

    /// Probe every network endpoint in `snapshot`.
    pub fn start_pass(&mut self, snapshot: &[Endpoint]) -> PassStart {
        if self.locked {
            trace!("Probe pass still running, skipping");
            return PassStart::Busy;
        }

        let targets: Vec<Endpoint> = snapshot
            .iter()
            .filter(|e| e.is_network())
            .cloned()
            .collect();
        if targets.is_empty() {
            return PassStart::Empty;
        }

        self.pass += 1;
        self.locked = true;
        self.pending = targets.len();
        debug!("Probing {} network endpoint(s)", targets.len());

        for endpoint in targets {
            let checker = Arc::clone(&self.checker);
            let tx = self.outcome_tx.clone();
            let (port, timeout, pass) = (self.port, self.timeout, self.pass);
            let run = move || {
                let reachable = endpoint
                    .network_host()
                    .is_some_and(|host| checker.is_reachable(host, port, timeout));
                let _ = tx.send(ProbeOutcome {
                    endpoint,
                    reachable,
                    pass,
                });
            };

            match self.execution {
                Execution::Inline => run(),
                Execution::Background => {
                    thread::spawn(run);
                },
            }
        }

        PassStart::Started(self.pending)
    }

    /// Collect finished probes. Unlocks once the current pass is complete.
    ///
    /// Late outcomes from earlier passes are still returned.
    pub fn drain(&mut self) -> Vec<ProbeOutcome> {
        let outcomes: Vec<ProbeOutcome> = self.outcome_rx.try_iter().collect();
        for outcome in &outcomes {
            if outcome.pass == self.pass && self.pending > 0 {
                self.pending -= 1;
                if self.pending == 0 {
                    self.locked = false;
                }
            }
        }
        outcomes
    }

    /// Release the lock after the pass deadline.
    pub fn unlock(&mut self) {
        self.locked = false;
        self.pending = 0;
    }

    /// Whether a pass is running.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::Mutex;

    struct Scripted {
        reachable: Vec<&'static str>,
        seen: Mutex<Vec<(String, u16)>>,
    }

    impl Reachability for Scripted {
        fn is_reachable(&self, host: &str, port: u16, _timeout: Duration) -> bool {
            self.seen.lock().unwrap().push((host.to_string(), port));
            self.reachable.contains(&host)
        }
    }

    fn prober(reachable: Vec<&'static str>) -> (ReachabilityProber, Arc<Scripted>) {
        let checker = Arc::new(Scripted {
            reachable,
            seen: Mutex::new(Vec::new()),
        });
        let prober = ReachabilityProber::new(
            checker.clone(),
            Execution::Inline,
            80,
            Duration::from_secs(2),
        );
        (prober, checker)
    }

    #[test]
    fn test_only_network_endpoints_probed() {
        let (mut prober, checker) = prober(vec!["10.0.0.1"]);
        let snapshot = vec![
            Endpoint::new("/dev/ttyUSB0"),
            Endpoint::new("tcp://10.0.0.1"),
            Endpoint::new("tcp://10.0.0.2"),
        ];

        assert_eq!(prober.start_pass(&snapshot), PassStart::Started(2));
        let outcomes = prober.drain();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].reachable);
        assert!(!outcomes[1].reachable);
        assert_eq!(
            *checker.seen.lock().unwrap(),
            vec![("10.0.0.1".to_string(), 80), ("10.0.0.2".to_string(), 80)]
        );
    }

    #[test]
    fn test_empty_pass_never_locks() {
        let (mut prober, _) = prober(Vec::new());
        assert_eq!(prober.start_pass(&[Endpoint::new("COM3")]), PassStart::Empty);
        assert!(!prober.is_locked());
    }

    #[test]
    fn test_lock_held_until_all_outcomes_drained() {
        let (mut prober, _) = prober(Vec::new());
        let snapshot = vec![Endpoint::new("tcp://10.0.0.1")];

        assert_eq!(prober.start_pass(&snapshot), PassStart::Started(1));
        assert!(prober.is_locked());
        assert_eq!(prober.start_pass(&snapshot), PassStart::Busy);

        prober.drain();
        assert!(!prober.is_locked());
        assert_eq!(prober.start_pass(&snapshot), PassStart::Started(1));
    }

    #[test]
    fn test_unlock_releases_pass() {
        let (mut prober, _) = prober(Vec::new());
        prober.start_pass(&[Endpoint::new("tcp://10.0.0.1")]);
        prober.unlock();
        assert!(!prober.is_locked());
    }

    #[test]
    fn test_tcp_reachability_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(TcpReachability.is_reachable("127.0.0.1", port, Duration::from_secs(1)));
        drop(listener);
        assert!(!TcpReachability.is_reachable("127.0.0.1", port, Duration::from_millis(200)));
    }
}
