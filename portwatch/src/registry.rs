//! In-memory store of network services found by passive discovery.
//!
//! The registry is written by two producers, the discovery feed and the
//! reachability prober. Both deliver through the handler, which applies
//! their messages on its own thread, so the registry itself needs no lock.

use std::collections::BTreeMap;
use std::net::IpAddr;

use log::{debug, trace};

use crate::device::{Endpoint, TCP_PREFIX};

/// TXT `vendor` value advertised by receivers we can talk to.
pub const RECEIVER_VENDOR: &str = "elrs";

/// TXT `type` value advertised by receivers.
pub const RECEIVER_TYPE: &str = "rx";

/// A service advertised on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceRecord {
    /// Resolved addresses, in advertisement order.
    pub addresses: Vec<IpAddr>,
    /// TXT metadata.
    pub txt: BTreeMap<String, String>,
    /// Fully-qualified host name.
    pub fqdn: String,
}

impl ServiceRecord {
    /// Create a record with no TXT metadata.
    pub fn new(fqdn: impl Into<String>, addresses: Vec<IpAddr>) -> Self {
        Self {
            addresses,
            txt: BTreeMap::new(),
            fqdn: fqdn.into(),
        }
    }

    /// Add a TXT key/value pair.
    #[must_use]
    pub fn with_txt(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.txt.insert(key.into(), value.into());
        self
    }

    /// Look up a TXT value.
    pub fn txt(&self, key: &str) -> Option<&str> {
        self.txt.get(key).map(String::as_str)
    }

    /// Whether this service is a receiver we can connect to.
    pub fn is_receiver(&self) -> bool {
        self.txt("vendor") == Some(RECEIVER_VENDOR) && self.txt("type") == Some(RECEIVER_TYPE)
    }

    fn display_name(&self) -> Option<String> {
        match (self.txt("target"), self.txt("version")) {
            (Some(target), Some(version)) => Some(format!("{target} - {version}")),
            (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
            (None, None) => None,
        }
    }

    /// Project into one endpoint per address.
    pub fn endpoints(&self) -> impl Iterator<Item = Endpoint> + '_ {
        let display_name = self.display_name();
        self.addresses.iter().map(move |addr| Endpoint {
            path: format!("{TCP_PREFIX}{addr}"),
            display_name: display_name.clone(),
            fqdn: Some(self.fqdn.clone()),
            vendor_id: Some(0),
            product_id: Some(0),
        })
    }
}

/// What the discovery feed observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    /// A service was announced.
    Added,
    /// A service's addresses were resolved.
    Resolved,
    /// A service went away.
    Removed,
}

/// One message from the discovery feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceChange {
    /// What happened.
    pub action: ServiceAction,
    /// The service concerned. For removals only `fqdn` is meaningful.
    pub record: ServiceRecord,
}

/// Current set of advertised services.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    records: Vec<ServiceRecord>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any earlier record for the same host.
    pub fn add(&mut self, record: ServiceRecord) {
        trace!("Registry add: {} {:?}", record.fqdn, record.addresses);
        if let Some(existing) = self.records.iter_mut().find(|r| r.fqdn == record.fqdn) {
            *existing = record;
        } else {
            self.records.push(record);
        }
    }

    /// Remove every record for `fqdn`. Returns how many were removed.
    pub fn remove(&mut self, fqdn: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.fqdn != fqdn);
        let removed = before - self.records.len();
        if removed > 0 {
            debug!("Registry removed {fqdn}");
        }
        removed
    }

    /// Apply a feed message.
    pub fn apply(&mut self, change: ServiceChange) {
        match change.action {
            ServiceAction::Added | ServiceAction::Resolved => self.add(change.record),
            ServiceAction::Removed => {
                self.remove(&change.record.fqdn);
            },
        }
    }

    /// Project matching records into endpoints, one per address.
    ///
    /// Paths are unique in the result even if two records advertise the
    /// same address. Order is unspecified until sorted for presentation.
    pub fn query<P>(&self, predicate: P) -> Vec<Endpoint>
    where
        P: Fn(&ServiceRecord) -> bool,
    {
        let mut result: Vec<Endpoint> = Vec::new();
        for endpoint in self
            .records
            .iter()
            .filter(|&r| predicate(r))
            .flat_map(ServiceRecord::endpoints)
        {
            if !result.iter().any(|e| e.same_path(&endpoint)) {
                result.push(endpoint);
            }
        }
        result
    }

    /// Endpoints for advertised receivers.
    pub fn receivers(&self) -> Vec<Endpoint> {
        self.query(ServiceRecord::is_receiver)
    }

    /// All stored records.
    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
