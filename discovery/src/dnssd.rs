//! Thin adapter over `mdns-sd`: the only module allowed to touch the mDNS
//! daemon directly. Everything above this layer talks in `Remote`s and
//! `DeviceInfo`s, not in `ServiceInfo`s.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use mdns_sd::{Receiver, ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::error::DiscoveryError;

pub struct MdnsAdapter {
    daemon: ServiceDaemon,
}

impl MdnsAdapter {
    pub fn new() -> Result<Self, DiscoveryError> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
        })
    }

    /// Publishes `instance_name` under `service_type` on `port`, letting
    /// `mdns-sd` fill in this host's interface addresses automatically.
    pub fn register(
        &self,
        service_type: &str,
        instance_name: &str,
        port: u16,
        txt: HashMap<String, String>,
    ) -> Result<(), DiscoveryError> {
        let host_name = format!("{instance_name}.local.");
        let service_info = ServiceInfo::new(service_type, instance_name, &host_name, "", port, txt)?
            .enable_addr_auto();
        self.daemon.register(service_info)?;
        Ok(())
    }

    pub fn unregister(&self, fullname: &str) -> Result<(), DiscoveryError> {
        self.daemon.unregister(fullname)?;
        Ok(())
    }

    pub fn browse(&self, service_type: &str) -> Result<Receiver<ServiceEvent>, DiscoveryError> {
        Ok(self.daemon.browse(service_type)?)
    }

    pub fn stop_browse(&self, service_type: &str) -> Result<(), DiscoveryError> {
        self.daemon.stop_browse(service_type)?;
        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), DiscoveryError> {
        self.daemon.shutdown()?;
        Ok(())
    }
}

pub fn query_a(info: &ServiceInfo) -> Vec<Ipv4Addr> {
    info.get_addresses()
        .iter()
        .filter_map(|addr| match addr.to_ip_addr() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect()
}

pub fn query_aaaa(info: &ServiceInfo) -> Vec<Ipv6Addr> {
    info.get_addresses()
        .iter()
        .filter_map(|addr| match addr.to_ip_addr() {
            IpAddr::V6(v6) => Some(v6),
            IpAddr::V4(_) => None,
        })
        .collect()
}

pub fn txt_value<'a>(info: &'a ServiceInfo, key: &str) -> Option<&'a str> {
    info.get_property_val_str(key)
}
