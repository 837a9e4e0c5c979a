//! Passive service discovery feed.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::registry::ServiceChange;

/// A stream of service announcements.
pub trait ServiceFeed: Send {
    /// Changes observed since the last call, in feed order.
    fn poll_changes(&mut self) -> Vec<ServiceChange>;

    /// Re-query the network for services.
    fn refresh(&mut self) {}

    /// Stop browsing.
    fn shutdown(&mut self) {}
}

/// Feed backed by a plain channel. The sender side can live anywhere.
pub struct ChannelFeed {
    rx: Receiver<ServiceChange>,
}

impl ChannelFeed {
    /// Create a feed and the sender that publishes into it.
    pub fn new() -> (Sender<ServiceChange>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl ServiceFeed for ChannelFeed {
    fn poll_changes(&mut self) -> Vec<ServiceChange> {
        self.rx.try_iter().collect()
    }
}
