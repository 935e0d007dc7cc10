use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{DeviceInfo, PROTOCOL_VERSION};
use mdns_sd::ServiceEvent;
use tokio_util::sync::CancellationToken;

use crate::dnssd::{query_a, query_aaaa, txt_value, MdnsAdapter};
use crate::error::DiscoveryError;

/// DNS-SD service type FlowDrop instances register under and browse for.
pub const SERVICE_TYPE: &str = "_flowdrop._tcp.local.";

const TXT_KEY_VERSION: &str = "v";
const TXT_KEY_IPFAMILY: &str = "ipf";

/// Which address family a [`Remote`] was reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

/// The resolved transport endpoint of a peer. Ephemeral; holds no resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub ip: IpAddr,
    pub port: u16,
    pub ip_family: IpFamily,
}

fn base_url(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("http://{v4}:{port}"),
        IpAddr::V6(v6) => format!("http://[{v6}]:{port}"),
    }
}

async fn fetch_device_info(ip: IpAddr, port: u16) -> Result<DeviceInfo, DiscoveryError> {
    let url = format!("{}/device_info", base_url(ip, port));
    let response = reqwest::get(url).await?;
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

fn remote_from_resolved(info: &mdns_sd::ServiceInfo) -> Option<Remote> {
    let recorded_version = txt_value(info, TXT_KEY_VERSION)?;
    if recorded_version.parse::<u32>() != Ok(PROTOCOL_VERSION) {
        return None;
    }

    let prefer_ipv4 = txt_value(info, TXT_KEY_IPFAMILY) == Some("4");
    let port = info.get_port();

    let ip = if prefer_ipv4 {
        query_a(info)
            .into_iter()
            .next()
            .map(IpAddr::V4)
            .or_else(|| query_aaaa(info).into_iter().next().map(IpAddr::V6))
    } else {
        query_aaaa(info)
            .into_iter()
            .next()
            .map(IpAddr::V6)
            .or_else(|| query_a(info).into_iter().next().map(IpAddr::V4))
    }?;

    Some(Remote {
        ip_family: if ip.is_ipv4() { IpFamily::V4 } else { IpFamily::V6 },
        ip,
        port,
    })
}

/// Orchestrates the mDNS adapter to announce this device and to find and
/// resolve peers.
pub struct DiscoveryService {
    adapter: Arc<MdnsAdapter>,
}

impl DiscoveryService {
    pub fn new() -> Result<Self, DiscoveryError> {
        Ok(Self {
            adapter: Arc::new(MdnsAdapter::new()?),
        })
    }

    /// Publishes this device as `id` on `port`. `prefer_ipv4` advertises the
    /// `ipf=4` TXT hint so resolvers that only got a hostname back (no
    /// socket address) query an A record instead of AAAA.
    pub fn announce(&self, id: &str, port: u16, prefer_ipv4: bool) -> Result<(), DiscoveryError> {
        let mut txt = HashMap::new();
        txt.insert(TXT_KEY_VERSION.to_string(), PROTOCOL_VERSION.to_string());
        if prefer_ipv4 {
            txt.insert(TXT_KEY_IPFAMILY.to_string(), "4".to_string());
        }
        self.adapter.register(SERVICE_TYPE, id, port, txt)
    }

    pub fn unregister(&self, id: &str) -> Result<(), DiscoveryError> {
        self.adapter.unregister(&format!("{id}.{SERVICE_TYPE}"))
    }

    /// Resolves `id` into a `Remote`, rejecting a peer whose advertised
    /// protocol version doesn't match ours. Returns `Ok(None)` on a mismatch,
    /// an address that never resolves, or once `timeout` elapses.
    pub async fn resolve_and_query(&self, id: &str, timeout: Duration) -> Result<Option<Remote>, DiscoveryError> {
        let fullname = format!("{id}.{SERVICE_TYPE}");
        let receiver = self.adapter.browse(SERVICE_TYPE)?;
        let deadline = tokio::time::Instant::now() + timeout;

        let result = loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break None;
            }

            let event = match tokio::time::timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(event)) => event,
                _ => break None,
            };

            if let ServiceEvent::ServiceResolved(info) = event {
                if info.get_fullname() != fullname {
                    continue;
                }
                break remote_from_resolved(&info);
            }
        };

        let _ = self.adapter.stop_browse(SERVICE_TYPE);
        Ok(result)
    }

    /// Browses continuously for peers, invoking `on_found` once per distinct
    /// device id as soon as that peer's `/device_info` has been fetched.
    /// Runs until `stop` is cancelled.
    pub async fn discover<F>(&self, on_found: F, stop: CancellationToken)
    where
        F: Fn(DeviceInfo) + Send + Sync + 'static,
    {
        let on_found = Arc::new(on_found);

        let receiver = match self.adapter.browse(SERVICE_TYPE) {
            Ok(receiver) => receiver,
            Err(err) => {
                log::warn!("failed to browse for flowdrop peers: {err}");
                return;
            }
        };

        let mut seen = HashSet::new();

        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => break,
                event = receiver.recv_async() => match event {
                    Ok(event) => event,
                    Err(err) => {
                        log::warn!("mdns receiver closed: {err}");
                        break;
                    }
                },
            };

            if let ServiceEvent::ServiceResolved(info) = event {
                if !seen.insert(info.get_fullname().to_string()) {
                    continue;
                }

                let Some(remote) = remote_from_resolved(&info) else {
                    continue;
                };

                log::debug!("resolved flowdrop peer at {}:{}", remote.ip, remote.port);

                let on_found = Arc::clone(&on_found);
                tokio::spawn(async move {
                    match fetch_device_info(remote.ip, remote.port).await {
                        Ok(device_info) => on_found(device_info),
                        Err(err) => log::debug!("failed to fetch device_info from {}: {err}", remote.ip),
                    }
                });
            }
        }

        let _ = self.adapter.stop_browse(SERVICE_TYPE);
    }
}
