//! Message-passing wrapper around a blocking enumeration job.
//!
//! The handler never calls an enumerator directly. It posts a request to a
//! [`ScanWorker`] and picks the report up from a channel on a later poll,
//! so a slow OS enumeration never stalls the tick loop. A worker has at most
//! one request in flight.
//!
//! [`Execution::Inline`] runs the job on the caller's thread and queues the
//! report immediately; tests use it to keep every pass deterministic.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

/// Where enumeration jobs run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// On a dedicated background thread per worker.
    #[default]
    Background,
    /// Synchronously, inside the request call.
    Inline,
}

type Job<Req, T> = Box<dyn FnMut(Req) -> Vec<T> + Send>;

enum Backend<Req, T> {
    Inline {
        job: Job<Req, T>,
        report_tx: Sender<(u64, Vec<T>)>,
    },
    Background {
        request_tx: Sender<(u64, Req)>,
        _handle: JoinHandle<()>,
    },
}

/// A single enumerator behind a request/report channel pair.
pub struct ScanWorker<Req, T> {
    name: &'static str,
    backend: Backend<Req, T>,
    report_rx: Receiver<(u64, Vec<T>)>,
    generation: u64,
    in_flight: bool,
}

impl<Req, T> ScanWorker<Req, T>
where
    Req: Send + 'static,
    T: Send + 'static,
{
    /// Wrap `job` in a worker.
    pub fn new<F>(name: &'static str, execution: Execution, job: F) -> Self
    where
        F: FnMut(Req) -> Vec<T> + Send + 'static,
    {
        let (report_tx, report_rx) = mpsc::channel();
        let backend = match execution {
            Execution::Inline => Backend::Inline {
                job: Box::new(job),
                report_tx,
            },
            Execution::Background => {
                let (request_tx, request_rx) = mpsc::channel::<(u64, Req)>();
                let handle = thread::spawn(move || {
                    let mut job = job;
                    while let Ok((generation, request)) = request_rx.recv() {
                        if report_tx.send((generation, job(request))).is_err() {
                            // Handler dropped, exit
                            return;
                        }
                    }
                    trace!("{name} worker exiting");
                });
                Backend::Background {
                    request_tx,
                    _handle: handle,
                }
            },
        };

        Self {
            name,
            backend,
            report_rx,
            generation: 0,
            in_flight: false,
        }
    }

    /// Post a scan request. Returns `false` if one is already in flight.
    pub fn request(&mut self, request: Req) -> bool {
        if self.in_flight {
            trace!("{} scan still in flight, skipping", self.name);
            return false;
        }

        let sent = match &mut self.backend {
            Backend::Inline { job, report_tx } => report_tx
                .send((self.generation, job(request)))
                .is_ok(),
            Backend::Background { request_tx, .. } => request_tx
                .send((self.generation, request))
                .is_ok(),
        };

        if !sent {
            debug!("{} worker is gone", self.name);
        }
        self.in_flight = sent;
        sent
    }

    /// Take the latest report for the current generation, if one arrived.
    ///
    /// A worker whose thread died (a panicking job) is no longer in flight;
    /// later requests to it fail instead of waiting forever.
    pub fn try_take(&mut self) -> Option<Vec<T>> {
        loop {
            match self.report_rx.try_recv() {
                Ok((generation, report)) => {
                    if generation != self.generation {
                        trace!("{} dropping stale report", self.name);
                        continue;
                    }
                    self.in_flight = false;
                    return Some(report);
                },
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    if self.in_flight {
                        warn!("{} worker stopped without reporting", self.name);
                        self.in_flight = false;
                    }
                    return None;
                },
            }
        }
    }

    /// Forget any outstanding request. Reports for it will be discarded.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.in_flight = false;
    }

    /// Whether a request is waiting for its report.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}
