#![doc = include_str!("../../README.md")]

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use common::{
    AskResponse, AvailablePortFinder, DeviceInfo, File, FileInfo, FileMetadata, NativeFile, SendAsk,
    StdFileMetadata, StdPortFinder, PROTOCOL_VERSION,
};
pub use discovery::{DiscoveryError, DiscoveryService, IpFamily, Remote, SERVICE_TYPE};
pub use tfa::{TfaError, TfaReader, TfaReaderListener, TfaWriter, TfaWriterListener};
pub use transport::{EventListener, SendRequest, Server, TransportError, DEFAULT_PORT};

/// Union of every error a FlowDrop operation can fail with.
#[derive(Debug, Error)]
pub enum FlowDropError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Archive(#[from] TfaError),
}

/// Browses the LAN for FlowDrop peers until `stop` is cancelled, invoking
/// `on_found` once per distinct device as soon as its identity has been
/// fetched.
///
/// This is the library-level convenience wrapper around
/// [`DiscoveryService::discover`] for callers that don't otherwise need a
/// `DiscoveryService` (e.g. to also `announce`).
pub async fn discover<F>(on_found: F, stop: CancellationToken) -> Result<(), FlowDropError>
where
    F: Fn(DeviceInfo) + Send + Sync + 'static,
{
    let service = DiscoveryService::new()?;
    service.discover(on_found, stop).await;
    Ok(())
}

/// Convenience constructor mirroring [`SendRequest::new`], for callers that
/// only import the top-level crate.
pub fn send_request(device_info: DeviceInfo, receiver_id: impl Into<String>) -> Result<SendRequest, FlowDropError> {
    Ok(SendRequest::new(device_info, receiver_id)?)
}

/// Convenience constructor mirroring [`Server::new`].
pub fn server(device_info: DeviceInfo) -> Result<Server, FlowDropError> {
    Ok(Server::new(device_info)?)
}

/// Shared reference to an [`EventListener`], for code that wires the same
/// listener into both a [`Server`] and a [`SendRequest`].
pub type SharedEventListener = Arc<dyn EventListener>;
