use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use common::{AskResponse, AvailablePortFinder, DeviceInfo, FileInfo, SendAsk, StdPortFinder};
use discovery::DiscoveryService;
use futures::StreamExt;
use parking_lot::Mutex;
use tfa::{TfaError, TfaReader, TfaReaderListener};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::listener::EventListener;

/// Default port FlowDrop servers try first.
pub const DEFAULT_PORT: u16 = 39979;
const MAX_PORT_ATTEMPTS: u32 = 16;
const DEVICEINFO_HEADER: &str = "X-DeviceInfo";

type AskCallback = dyn Fn(&SendAsk) -> bool + Send + Sync;

fn acquire_port(finder: &dyn AvailablePortFinder) -> Result<u16, TransportError> {
    use rand::Rng;

    if finder.is_available(DEFAULT_PORT) {
        return Ok(DEFAULT_PORT);
    }

    let mut rng = rand::thread_rng();
    for _ in 0..MAX_PORT_ATTEMPTS {
        let candidate = rng.gen_range(1024..=65535u16);
        if finder.is_available(candidate) {
            return Ok(candidate);
        }
    }

    Err(TransportError::PortExhaustion)
}

struct AppState {
    device_info: DeviceInfo,
    device_info_json: Vec<u8>,
    dest_dir: PathBuf,
    ask_callback: Option<Arc<AskCallback>>,
    listener: Option<Arc<dyn EventListener>>,
}

/// Forwards `TfaReader` progress callbacks into the server's `EventListener`,
/// attaching the sender identity and the request's advertised total size.
struct ReceivingProgressAdapter {
    listener: Arc<dyn EventListener>,
    sender: DeviceInfo,
    total_size: u64,
}

impl TfaReaderListener for ReceivingProgressAdapter {
    fn total_progress(&self, bytes_so_far: u64) {
        self.listener
            .on_receiving_total_progress(&self.sender, self.total_size, bytes_so_far);
    }
    fn file_start(&self, info: &FileInfo) {
        self.listener.on_receiving_file_start(&self.sender, info);
    }
    fn file_progress(&self, info: &FileInfo, bytes_in_file: u64) {
        self.listener
            .on_receiving_file_progress(&self.sender, info, bytes_in_file);
    }
    fn file_end(&self, info: &FileInfo) {
        self.listener.on_receiving_file_end(&self.sender, info);
    }
}

fn json_response(status: StatusCode, body: &impl serde::Serialize) -> axum::response::Response {
    let payload = serde_json::to_vec(body).unwrap_or_default();
    (status, [(header::CONTENT_TYPE, "application/json")], payload).into_response()
}

async fn device_info_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        state.device_info_json.clone(),
    )
}

async fn ask_handler(State(state): State<Arc<AppState>>, body: Bytes) -> axum::response::Response {
    let ask: SendAsk = match serde_json::from_slice(&body) {
        Ok(ask) => ask,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid JSON").into_response(),
    };

    if let Some(listener) = &state.listener {
        listener.on_sender_ask(&ask.sender);
    }

    let accepted = state.ask_callback.as_ref().map(|cb| cb(&ask)).unwrap_or(true);

    json_response(StatusCode::OK, &AskResponse { accepted })
}

fn tfa_error_status(err: &TfaError) -> StatusCode {
    match err {
        TfaError::CorruptHeader | TfaError::EntryTooLong(_) => StatusCode::BAD_REQUEST,
        TfaError::UnsafePath(_) | TfaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn send_handler(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    body: Body,
) -> axum::response::Response {
    let sender: DeviceInfo = match headers
        .get(DEVICEINFO_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| serde_json::from_str(s).ok())
    {
        Some(sender) => sender,
        None => return (StatusCode::BAD_REQUEST, "missing or invalid X-DeviceInfo header").into_response(),
    };

    let total_size: u64 = match headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
    {
        Some(n) => n,
        None => return (StatusCode::BAD_REQUEST, "missing Content-Length").into_response(),
    };

    if let Err(err) = tokio::fs::create_dir_all(&state.dest_dir).await {
        log::error!("could not create destination directory {:?}: {err}", state.dest_dir);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Some(listener) = &state.listener {
        listener.on_receiving_start(&sender, total_size);
    }

    let progress_listener: Option<Box<dyn TfaReaderListener>> = state.listener.clone().map(|listener| {
        Box::new(ReceivingProgressAdapter {
            listener,
            sender: sender.clone(),
            total_size,
        }) as Box<dyn TfaReaderListener>
    });

    let mut reader = TfaReader::with_listener(state.dest_dir.clone(), progress_listener);
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                log::warn!("error reading /send body: {err}");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };

        let mut slice: &[u8] = &chunk;
        while !slice.is_empty() && !reader.is_done() {
            match reader.feed(slice) {
                Ok(0) => break,
                Ok(n) => slice = &slice[n..],
                Err(err) => {
                    log::warn!("/send archive error: {err}");
                    return tfa_error_status(&err).into_response();
                }
            }
        }

        if reader.is_done() {
            if !slice.is_empty() {
                log::warn!("/send body carried {} byte(s) past the archive trailer", slice.len());
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            break;
        }
    }

    if !reader.is_done() {
        log::warn!("/send body ended before the archive was fully received");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let received_files = reader.received_files().to_vec();
    if let Some(listener) = &state.listener {
        listener.on_receiving_end(&sender, total_size, &received_files);
    }

    StatusCode::OK.into_response()
}

/// Receives incoming FlowDrop transfers: serves `/device_info`, `/ask`,
/// `/send` over HTTP and announces itself on the LAN via mDNS.
///
/// Configure with the setters before calling [`Server::run`]; `run` blocks
/// (asynchronously) until [`Server::stop`] is called.
pub struct Server {
    device_info: DeviceInfo,
    dest_dir: PathBuf,
    ask_callback: Option<Arc<AskCallback>>,
    listener: Option<Arc<dyn EventListener>>,
    port_finder: Arc<dyn AvailablePortFinder>,
    discovery: Arc<DiscoveryService>,
    shutdown: CancellationToken,
    port: Mutex<Option<u16>>,
}

impl Server {
    pub fn new(device_info: DeviceInfo) -> Result<Self, TransportError> {
        Ok(Self {
            device_info,
            dest_dir: PathBuf::from("."),
            ask_callback: None,
            listener: None,
            port_finder: Arc::new(StdPortFinder),
            discovery: Arc::new(DiscoveryService::new()?),
            shutdown: CancellationToken::new(),
            port: Mutex::new(None),
        })
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn set_dest_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dest_dir = dir.into();
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub fn set_ask_callback<F>(&mut self, callback: F)
    where
        F: Fn(&SendAsk) -> bool + Send + Sync + 'static,
    {
        self.ask_callback = Some(Arc::new(callback));
    }

    pub fn set_event_listener(&mut self, listener: Arc<dyn EventListener>) {
        self.listener = Some(listener);
    }

    pub fn event_listener(&self) -> Option<&Arc<dyn EventListener>> {
        self.listener.as_ref()
    }

    /// Swaps in a custom port-availability check, e.g. for tests that pin a
    /// deterministic port.
    pub fn set_port_finder(&mut self, finder: Arc<dyn AvailablePortFinder>) {
        self.port_finder = finder;
    }

    /// The bound port, once `run` has acquired one.
    pub fn port(&self) -> Option<u16> {
        *self.port.lock()
    }

    /// Acquires a port (preferring [`DEFAULT_PORT`], falling back to a
    /// handful of random attempts), announces the device on the LAN, and
    /// serves HTTP until [`Server::stop`] cancels it.
    pub async fn run(&self) -> Result<(), TransportError> {
        let port = acquire_port(self.port_finder.as_ref())?;
        *self.port.lock() = Some(port);

        let device_info_json = serde_json::to_vec(&self.device_info).unwrap_or_default();
        let state = Arc::new(AppState {
            device_info: self.device_info.clone(),
            device_info_json,
            dest_dir: self.dest_dir.clone(),
            ask_callback: self.ask_callback.clone(),
            listener: self.listener.clone(),
        });

        let app = Router::new()
            .route("/device_info", get(device_info_handler))
            .route("/ask", post(ask_handler))
            .route("/send", post(send_handler))
            .with_state(state);

        let v6_addr: SocketAddr = format!("[::]:{port}").parse().expect("well-formed socket address");
        let listener = match TcpListener::bind(v6_addr).await {
            Ok(listener) => listener,
            Err(err) => {
                log::warn!("dual-stack bind on {v6_addr} failed ({err}), falling back to 0.0.0.0:{port}");
                let v4_addr: SocketAddr = format!("0.0.0.0:{port}").parse().expect("well-formed socket address");
                TcpListener::bind(v4_addr).await?
            }
        };

        if let Some(event_listener) = &self.listener {
            event_listener.on_receiver_started(port);
        }

        if let Err(err) = self.discovery.announce(&self.device_info.id, port, false) {
            log::warn!("failed to announce flowdrop service: {err}");
        }

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }

    /// Idempotent. Unregisters the mDNS advertisement and cancels the HTTP
    /// server's graceful shutdown.
    pub fn stop(&self) {
        self.shutdown.cancel();
        if let Err(err) = self.discovery.unregister(&self.device_info.id) {
            log::debug!("unregister on stop: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysTaken;
    impl AvailablePortFinder for AlwaysTaken {
        fn is_available(&self, port: u16) -> bool {
            port == 0
        }
    }

    #[test]
    fn acquire_port_prefers_the_default() {
        let port = acquire_port(&StdPortFinder).unwrap();
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn acquire_port_exhausts_when_nothing_is_free() {
        let err = acquire_port(&AlwaysTaken).unwrap_err();
        assert!(matches!(err, TransportError::PortExhaustion));
    }
}
