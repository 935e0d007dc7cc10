//! mDNS/DNS-SD based discovery: advertises this device and finds others.
//!
//! [`dnssd`] is the thin, mechanical adapter over the `mdns-sd` crate.
//! [`DiscoveryService`] is the policy layer on top: the protocol-version
//! check, the A/AAAA fallback, and peer de-duplication.

pub mod dnssd;
mod error;
mod service;

pub use error::DiscoveryError;
pub use service::{DiscoveryService, IpFamily, Remote, SERVICE_TYPE};
