use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use common::{AskResponse, DeviceInfo, File, SendAsk};
use discovery::DiscoveryService;
use futures::Stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tfa::{TfaWriter, TfaWriterListener};

use crate::error::TransportError;
use crate::listener::EventListener;

const DEVICEINFO_HEADER: &str = "X-DeviceInfo";
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Forwards `TfaWriter` progress callbacks into the client's `EventListener`.
struct SendingProgressAdapter {
    listener: Arc<dyn EventListener>,
}

impl TfaWriterListener for SendingProgressAdapter {
    fn total_progress(&self, bytes_so_far: u64, total_size: u64) {
        self.listener.on_sending_total_progress(total_size, bytes_so_far);
    }
    fn file_start(&self, info: &common::FileInfo) {
        self.listener.on_sending_file_start(info);
    }
    fn file_progress(&self, info: &common::FileInfo, bytes_in_file: u64) {
        self.listener.on_sending_file_progress(info, bytes_in_file);
    }
    fn file_end(&self, info: &common::FileInfo) {
        self.listener.on_sending_file_end(info);
    }
}

/// Adapts [`TfaWriter`]'s pull interface to a `reqwest` request body stream.
struct ArchiveBody {
    writer: TfaWriter,
    chunk_size: usize,
}

impl Stream for ArchiveBody {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut buf = vec![0u8; this.chunk_size];
        let n = this.writer.write_to(&mut buf);
        if n == 0 {
            Poll::Ready(None)
        } else {
            buf.truncate(n);
            Poll::Ready(Some(Ok(Bytes::from(buf))))
        }
    }
}

fn base_url(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("http://{v4}:{port}"),
        IpAddr::V6(v6) => format!("http://[{v6}]:{port}"),
    }
}

/// Sends a set of files to a peer discovered by id: resolve, ask, then
/// stream the archive.
///
/// Configure with the builder methods, then call [`SendRequest::execute`]
/// (blocking) or [`SendRequest::execute_async`].
pub struct SendRequest {
    device_info: DeviceInfo,
    receiver_id: String,
    files: Vec<Box<dyn File>>,
    resolve_timeout: Duration,
    ask_timeout: Duration,
    event_listener: Option<Arc<dyn EventListener>>,
    discovery: DiscoveryService,
}

impl SendRequest {
    pub fn new(device_info: DeviceInfo, receiver_id: impl Into<String>) -> Result<Self, TransportError> {
        Ok(Self {
            device_info,
            receiver_id: receiver_id.into(),
            files: Vec::new(),
            resolve_timeout: Duration::from_secs(10),
            ask_timeout: Duration::from_secs(60),
            event_listener: None,
            discovery: DiscoveryService::new()?,
        })
    }

    pub fn with_files(mut self, files: Vec<Box<dyn File>>) -> Self {
        self.files = files;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_ask_timeout(mut self, timeout: Duration) -> Self {
        self.ask_timeout = timeout;
        self
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.event_listener = Some(listener);
        self
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn resolve_timeout(&self) -> Duration {
        self.resolve_timeout
    }

    pub fn ask_timeout(&self) -> Duration {
        self.ask_timeout
    }

    fn fire(&self, f: impl FnOnce(&dyn EventListener)) {
        if let Some(listener) = &self.event_listener {
            f(listener.as_ref());
        }
    }

    /// Blocks the calling thread until the transfer finishes, running the
    /// async algorithm on the shared FlowDrop runtime.
    pub fn execute(self) -> bool {
        common::runtime::get_runtime_handle().block_on(self.execute_async())
    }

    /// Resolves `receiver_id`, asks permission, then streams the archive.
    /// Returns `true` only once the receiver accepted and the upload
    /// completed; every other outcome (not found, declined, transport
    /// failure) returns `false`. Files are dropped unconditionally once this
    /// returns.
    pub async fn execute_async(self) -> bool {
        self.fire(|l| l.on_resolving());

        let remote = match self
            .discovery
            .resolve_and_query(&self.receiver_id, self.resolve_timeout)
            .await
        {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                self.fire(|l| l.on_receiver_not_found());
                return false;
            }
            Err(err) => {
                log::warn!("resolve error for {}: {err}", self.receiver_id);
                self.fire(|l| l.on_receiver_not_found());
                return false;
            }
        };

        self.fire(|l| l.on_resolved());
        let base_url = base_url(remote.ip, remote.port);

        self.fire(|l| l.on_asking_receiver());

        let ask_client = match reqwest::Client::builder().timeout(self.ask_timeout).build() {
            Ok(client) => client,
            Err(err) => {
                log::error!("failed to build http client: {err}");
                return false;
            }
        };

        let files_info = self
            .files
            .iter()
            .map(|f| common::FileInfo {
                name: f.relative_path().to_string(),
                size: f.size(),
            })
            .collect();
        let ask = SendAsk {
            sender: self.device_info.clone(),
            files: files_info,
        };
        let ask_body = match serde_json::to_vec(&ask) {
            Ok(body) => body,
            Err(err) => {
                log::error!("failed to serialize SendAsk: {err}");
                return false;
            }
        };

        let ask_response = ask_client
            .post(format!("{base_url}/ask"))
            .header(CONTENT_TYPE, "application/json")
            .body(ask_body)
            .send()
            .await;

        let accepted = match ask_response {
            Ok(response) if response.status().is_success() => response
                .bytes()
                .await
                .ok()
                .and_then(|body| serde_json::from_slice::<AskResponse>(&body).ok())
                .map(|parsed| parsed.accepted)
                .unwrap_or(false),
            Ok(response) => {
                log::warn!("/ask returned {}", response.status());
                false
            }
            Err(err) => {
                log::warn!("/ask transport failure: {err}");
                false
            }
        };

        if !accepted {
            self.fire(|l| l.on_receiver_declined());
            return false;
        }
        self.fire(|l| l.on_receiver_accepted());

        let progress_listener: Option<Box<dyn TfaWriterListener>> = self.event_listener.clone().map(|listener| {
            Box::new(SendingProgressAdapter { listener }) as Box<dyn TfaWriterListener>
        });

        let writer = match TfaWriter::with_listener(self.files, progress_listener) {
            Ok(writer) => writer,
            Err(err) => {
                log::error!("failed to build archive: {err}");
                return false;
            }
        };
        let content_length = writer.calc_size();

        let device_info_header = match serde_json::to_string(&self.device_info) {
            Ok(header) => header,
            Err(err) => {
                log::error!("failed to serialize device info header: {err}");
                return false;
            }
        };

        self.fire(|l| l.on_sending_start());

        let body = reqwest::Body::wrap_stream(ArchiveBody {
            writer,
            chunk_size: DEFAULT_CHUNK_SIZE,
        });

        // No bound on the send phase itself; only resolve/ask are timed.
        let send_client = reqwest::Client::new();
        let result = send_client
            .post(format!("{base_url}/send"))
            .header(DEVICEINFO_HEADER, device_info_header)
            .header(CONTENT_LENGTH, content_length)
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.fire(|l| l.on_sending_end());
                true
            }
            Ok(response) => {
                log::warn!("/send returned {}", response.status());
                false
            }
            Err(err) => {
                log::warn!("/send transport failure: {err}");
                false
            }
        }
    }
}
