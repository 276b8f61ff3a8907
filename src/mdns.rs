//! mDNS collaborator contract (§6.2): publishing and browsing
//! `_apple-midi._udp` service records.
//!
//! Publishing/browsing is abstracted behind a trait so a session can be
//! constructed against any advertiser: a real `mdns_sd` daemon, a test
//! double, or the no-op default when the `mdns` feature is disabled.

use std::net::IpAddr;

/// A remote AppleMIDI session observed on the network.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSessionDetail {
    pub name: String,
    pub ipv4: Option<IpAddr>,
    pub ipv6: Option<IpAddr>,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteSessionEvent {
    Up(RemoteSessionDetail),
    Down(RemoteSessionDetail),
}

/// Publishes and browses `_apple-midi._udp.local.` service records.
///
/// Consumed by a `Session` when its config's `published` flag is set; a
/// session never talks to mDNS directly so it can be built and tested
/// without a working multicast stack.
pub trait MdnsAdvertiser: Send + Sync {
    /// Publishes `name` on `port`. Idempotent; called again on rebind.
    fn publish(&self, name: &str, port: u16) -> Result<(), MdnsError>;

    /// Withdraws a previously published record.
    fn unpublish(&self, name: &str) -> Result<(), MdnsError>;

    /// Subscribes to `up`/`down` notifications for remote sessions.
    /// Implementations deliver events by invoking `on_event` from whatever
    /// thread their underlying library uses.
    fn browse(&self, on_event: Box<dyn Fn(RemoteSessionEvent) + Send + Sync>) -> Result<(), MdnsError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MdnsError {
    #[error("mdns operation failed: {0}")]
    Backend(String),
}

/// The default advertiser when the `mdns` feature is disabled, or when a
/// caller explicitly opts out of discovery: publish/unpublish/browse are all
/// no-ops that succeed immediately.
#[derive(Debug, Default)]
pub struct NoopAdvertiser;

impl MdnsAdvertiser for NoopAdvertiser {
    fn publish(&self, _name: &str, _port: u16) -> Result<(), MdnsError> {
        Ok(())
    }

    fn unpublish(&self, _name: &str) -> Result<(), MdnsError> {
        Ok(())
    }

    fn browse(&self, _on_event: Box<dyn Fn(RemoteSessionEvent) + Send + Sync>) -> Result<(), MdnsError> {
        Ok(())
    }
}

#[cfg(feature = "mdns")]
pub use mdns_sd_advertiser::MdnsSdAdvertiser;

#[cfg(feature = "mdns")]
mod mdns_sd_advertiser {
    use super::{MdnsAdvertiser, MdnsError, RemoteSessionDetail, RemoteSessionEvent};
    use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
    use std::net::IpAddr;

    const SERVICE_TYPE: &str = "_apple-midi._udp.local.";

    /// `mdns_sd`-backed advertiser: publishes this host's service record and
    /// supports browsing for remote sessions.
    pub struct MdnsSdAdvertiser {
        daemon: ServiceDaemon,
    }

    impl MdnsSdAdvertiser {
        pub fn new() -> Result<Self, MdnsError> {
            let daemon = ServiceDaemon::new().map_err(|e| MdnsError::Backend(e.to_string()))?;
            Ok(Self { daemon })
        }
    }

    impl MdnsAdvertiser for MdnsSdAdvertiser {
        fn publish(&self, name: &str, port: u16) -> Result<(), MdnsError> {
            let ip = local_ip_address::local_ip().map_err(|e| MdnsError::Backend(e.to_string()))?.to_string();
            let raw_hostname = hostname::get().map_err(|e| MdnsError::Backend(e.to_string()))?.to_string_lossy().to_string();
            let hostname = format!("{raw_hostname}.local.");
            let service = ServiceInfo::new(SERVICE_TYPE, name, &hostname, ip, port, None).map_err(|e| MdnsError::Backend(e.to_string()))?;
            self.daemon.register(service).map_err(|e| MdnsError::Backend(e.to_string()))
        }

        fn unpublish(&self, name: &str) -> Result<(), MdnsError> {
            let fullname = format!("{name}.{SERVICE_TYPE}");
            self.daemon.unregister(&fullname).map(|_| ()).map_err(|e| MdnsError::Backend(e.to_string()))
        }

        fn browse(&self, on_event: Box<dyn Fn(RemoteSessionEvent) + Send + Sync>) -> Result<(), MdnsError> {
            let receiver = self.daemon.browse(SERVICE_TYPE).map_err(|e| MdnsError::Backend(e.to_string()))?;
            std::thread::spawn(move || {
                while let Ok(event) = receiver.recv() {
                    match event {
                        ServiceEvent::ServiceResolved(info) => {
                            let detail = RemoteSessionDetail {
                                name: info.get_fullname().to_string(),
                                ipv4: info.get_addresses().iter().find(|a| a.is_ipv4()).copied(),
                                ipv6: info.get_addresses().iter().find(|a| a.is_ipv6()).copied(),
                                port: info.get_port(),
                            };
                            on_event(RemoteSessionEvent::Up(detail));
                        }
                        ServiceEvent::ServiceRemoved(_, fullname) => {
                            let detail = RemoteSessionDetail { name: fullname, ipv4: None, ipv6: None, port: 0 };
                            on_event(RemoteSessionEvent::Down(detail));
                        }
                        _ => {}
                    }
                }
            });
            Ok(())
        }
    }
}
