//! mDNS/Bonjour discovery feed using the `mdns-sd` crate.
//!
//! Resolved services are forwarded as [`ServiceChange`]s keyed by host name.
//! mDNS removals carry the service instance name rather than the host, so
//! the translator thread remembers which host each instance resolved to.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use log::{debug, info, trace, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::error::Result;
use crate::feed::ServiceFeed;
use crate::registry::{ServiceAction, ServiceChange, ServiceRecord};

/// Service type browsed by default (receivers expose an HTTP server).
pub const HTTP_SERVICE_TYPE: &str = "_http._tcp.local.";

/// Live mDNS browser.
pub struct MdnsFeed {
    daemon: ServiceDaemon,
    service_type: String,
    tx: Sender<ServiceChange>,
    rx: Receiver<ServiceChange>,
}

impl MdnsFeed {
    /// Start browsing for `service_type`.
    pub fn new(service_type: &str) -> Result<Self> {
        let daemon = ServiceDaemon::new()?;
        let (tx, rx) = mpsc::channel();
        let feed = Self {
            daemon,
            service_type: service_type.to_string(),
            tx,
            rx,
        };
        feed.browse()?;
        info!("Browsing mDNS for {service_type}");
        Ok(feed)
    }

    fn browse(&self) -> Result<()> {
        let receiver = self.daemon.browse(&self.service_type)?;
        let tx = self.tx.clone();

        thread::spawn(move || {
            let mut hosts: HashMap<String, String> = HashMap::new();
            while let Ok(event) = receiver.recv() {
                if let ServiceEvent::SearchStopped(service_type) = &event {
                    trace!("Browse for {service_type} stopped");
                    break;
                }
                let Some(change) = translate(&mut hosts, event) else {
                    continue;
                };
                if tx.send(change).is_err() {
                    return;
                }
            }
        });

        Ok(())
    }
}

/// Map one browse event to a registry change.
///
/// `hosts` maps instance full names to the host name they resolved to, so a
/// removal can be keyed by host like every other change.
fn translate(hosts: &mut HashMap<String, String>, event: ServiceEvent) -> Option<ServiceChange> {
    match event {
        ServiceEvent::ServiceResolved(service) => {
            let record = record_from_info(&service);
            debug!("Found HTTP service {} at {:?}", record.fqdn, record.addresses);
            hosts.insert(service.get_fullname().to_string(), record.fqdn.clone());
            Some(ServiceChange {
                action: ServiceAction::Resolved,
                record,
            })
        },
        ServiceEvent::ServiceRemoved(_, fullname) => {
            let Some(fqdn) = hosts.remove(&fullname) else {
                trace!("Removal for unresolved service {fullname}");
                return None;
            };
            debug!("HTTP service removed: {fqdn}");
            Some(ServiceChange {
                action: ServiceAction::Removed,
                record: ServiceRecord::new(fqdn, Vec::new()),
            })
        },
        other => {
            trace!("mDNS event: {other:?}");
            None
        },
    }
}

fn record_from_info(service: &ServiceInfo) -> ServiceRecord {
    let mut addresses: Vec<IpAddr> = service.get_addresses().iter().copied().collect();
    addresses.sort();

    let txt: BTreeMap<String, String> = service
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();

    ServiceRecord {
        addresses,
        txt,
        fqdn: service.get_hostname().trim_end_matches('.').to_string(),
    }
}

impl ServiceFeed for MdnsFeed {
    fn poll_changes(&mut self) -> Vec<ServiceChange> {
        self.rx.try_iter().collect()
    }

    fn refresh(&mut self) {
        trace!("Refreshing mDNS browse");
        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            debug!("Failed to stop mDNS browse: {e}");
        }
        if let Err(e) = self.browse() {
            warn!("Failed to restart mDNS browse: {e}");
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!("Failed to shutdown mDNS daemon: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver_info(instance: &str, host: &str, addrs: &str) -> ServiceInfo {
        ServiceInfo::new(
            HTTP_SERVICE_TYPE,
            instance,
            host,
            addrs,
            80,
            &[
                ("vendor", "elrs"),
                ("type", "rx"),
                ("target", "RX_2400"),
                ("version", "3.4.0"),
            ][..],
        )
        .unwrap()
    }

    #[test]
    fn test_record_from_info() {
        let record = record_from_info(&receiver_info("rx1", "rx1.local.", "10.0.0.9,10.0.0.2"));

        assert_eq!(record.fqdn, "rx1.local");
        let addrs: Vec<String> = record.addresses.iter().map(ToString::to_string).collect();
        assert_eq!(addrs, ["10.0.0.2", "10.0.0.9"]);
        assert_eq!(record.txt.get("vendor").map(String::as_str), Some("elrs"));
        assert_eq!(record.txt.get("version").map(String::as_str), Some("3.4.0"));
        assert!(record.is_receiver());
    }

    #[test]
    fn test_removal_keyed_by_resolved_host() {
        let info = receiver_info("rx1", "rx1.local.", "10.0.0.5");
        let fullname = info.get_fullname().to_string();
        let mut hosts = HashMap::new();

        let resolved = translate(&mut hosts, ServiceEvent::ServiceResolved(info)).unwrap();
        assert_eq!(resolved.action, ServiceAction::Resolved);
        assert_eq!(resolved.record.fqdn, "rx1.local");
        assert_eq!(hosts.get(&fullname).map(String::as_str), Some("rx1.local"));

        let removed = translate(
            &mut hosts,
            ServiceEvent::ServiceRemoved(HTTP_SERVICE_TYPE.to_string(), fullname.clone()),
        )
        .unwrap();
        assert_eq!(removed.action, ServiceAction::Removed);
        assert_eq!(removed.record.fqdn, "rx1.local");
        assert!(removed.record.addresses.is_empty());
        assert!(hosts.is_empty());

        // Second removal has nothing left to map
        let again = translate(
            &mut hosts,
            ServiceEvent::ServiceRemoved(HTTP_SERVICE_TYPE.to_string(), fullname),
        );
        assert!(again.is_none());
    }

    #[test]
    fn test_removal_of_unresolved_instance_ignored() {
        let mut hosts = HashMap::new();
        let change = translate(
            &mut hosts,
            ServiceEvent::ServiceRemoved(
                HTTP_SERVICE_TYPE.to_string(),
                format!("ghost.{HTTP_SERVICE_TYPE}"),
            ),
        );
        assert!(change.is_none());

        let found = translate(
            &mut hosts,
            ServiceEvent::ServiceFound(
                HTTP_SERVICE_TYPE.to_string(),
                format!("ghost.{HTTP_SERVICE_TYPE}"),
            ),
        );
        assert!(found.is_none());
        assert!(hosts.is_empty());
    }
}
