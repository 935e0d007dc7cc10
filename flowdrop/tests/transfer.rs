use std::io;
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{AvailablePortFinder, DeviceInfo, File, FileInfo};
use flowdrop::{EventListener, SendRequest, Server};
use parking_lot::Mutex;

/// A [`File`] backed by an in-memory buffer, for archives built without
/// touching the filesystem.
struct MemFile {
    path: String,
    data: Vec<u8>,
    cursor: usize,
}

impl MemFile {
    fn new(path: &str, data: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            data,
            cursor: 0,
        }
    }
}

impl File for MemFile {
    fn relative_path(&self) -> &str {
        &self.path
    }
    fn size(&self) -> u64 {
        self.data.len() as u64
    }
    fn created_time(&self) -> u64 {
        1_700_000_000
    }
    fn modified_time(&self) -> u64 {
        1_700_000_000
    }
    fn permissions(&self) -> u32 {
        0o644
    }
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.cursor = pos as usize;
        Ok(())
    }
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.cursor..];
        let n = remaining.len().min(buffer.len());
        buffer[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }
}

/// Binds an ephemeral port, releases it, and reports the number. The
/// `Server`'s own bind happens a moment later; a fixed port finder closes
/// the gap between probing and binding.
fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

struct FixedPort(u16);
impl AvailablePortFinder for FixedPort {
    fn is_available(&self, port: u16) -> bool {
        port == self.0
    }
}

#[derive(Default)]
struct RecordingListener {
    receiver_started: AtomicBool,
    sender_ask_seen: AtomicBool,
    receiving_start: AtomicBool,
    receiving_end: AtomicBool,
    received_files: Mutex<Vec<FileInfo>>,
    file_end_order: Mutex<Vec<String>>,

    resolving: AtomicBool,
    receiver_not_found: AtomicBool,
    resolved: AtomicBool,
    receiver_declined: AtomicBool,
    receiver_accepted: AtomicBool,
    sending_end: AtomicBool,
    bytes_sent: AtomicU64,
}

impl EventListener for RecordingListener {
    fn on_receiver_started(&self, _port: u16) {
        self.receiver_started.store(true, Ordering::SeqCst);
    }
    fn on_sender_ask(&self, _sender: &DeviceInfo) {
        self.sender_ask_seen.store(true, Ordering::SeqCst);
    }
    fn on_receiving_start(&self, _sender: &DeviceInfo, _total_size: u64) {
        self.receiving_start.store(true, Ordering::SeqCst);
    }
    fn on_receiving_file_end(&self, _sender: &DeviceInfo, file: &FileInfo) {
        self.file_end_order.lock().push(file.name.clone());
    }
    fn on_receiving_end(&self, _sender: &DeviceInfo, _total_size: u64, received_files: &[FileInfo]) {
        *self.received_files.lock() = received_files.to_vec();
        self.receiving_end.store(true, Ordering::SeqCst);
    }

    fn on_resolving(&self) {
        self.resolving.store(true, Ordering::SeqCst);
    }
    fn on_receiver_not_found(&self) {
        self.receiver_not_found.store(true, Ordering::SeqCst);
    }
    fn on_resolved(&self) {
        self.resolved.store(true, Ordering::SeqCst);
    }
    fn on_receiver_declined(&self) {
        self.receiver_declined.store(true, Ordering::SeqCst);
    }
    fn on_receiver_accepted(&self) {
        self.receiver_accepted.store(true, Ordering::SeqCst);
    }
    fn on_sending_end(&self) {
        self.sending_end.store(true, Ordering::SeqCst);
    }
    fn on_sending_total_progress(&self, _total_size: u64, current_size: u64) {
        self.bytes_sent.store(current_size, Ordering::SeqCst);
    }
}

fn receiver_device(id: &str) -> DeviceInfo {
    DeviceInfo::new(id)
}

async fn spawn_server(
    id: &str,
    dest_dir: &std::path::Path,
    accept: bool,
    listener: Arc<RecordingListener>,
) -> (Arc<Server>, u16) {
    let port = free_port();
    let mut server = Server::new(receiver_device(id)).unwrap();
    server.set_dest_dir(dest_dir);
    server.set_port_finder(Arc::new(FixedPort(port)));
    server.set_ask_callback(move |_ask| accept);
    server.set_event_listener(listener);
    let server = Arc::new(server);

    let run_handle = server.clone();
    tokio::spawn(async move {
        if let Err(err) = run_handle.run().await {
            log::debug!("test server exited: {err}");
        }
    });

    for _ in 0..200 {
        if server.port().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    (server, port)
}

#[tokio::test]
async fn s1_sends_a_single_small_file() {
    let dest = tempfile::tempdir().unwrap();
    let server_listener = Arc::new(RecordingListener::default());
    let (server, _port) = spawn_server("bbbbbbbbbbbb", dest.path(), true, server_listener.clone()).await;

    let sender_listener = Arc::new(RecordingListener::default());
    let files: Vec<Box<dyn File>> = vec![Box::new(MemFile::new("hello.txt", b"hello".to_vec()))];
    let request = SendRequest::new(receiver_device("aaaaaaaaaaaa"), "bbbbbbbbbbbb")
        .unwrap()
        .with_resolve_timeout(Duration::from_secs(5))
        .with_ask_timeout(Duration::from_secs(5))
        .with_files(files)
        .with_event_listener(sender_listener.clone());

    let ok = request.execute_async().await;
    assert!(ok, "expected the transfer to succeed");

    assert!(sender_listener.receiver_accepted.load(Ordering::SeqCst));
    assert!(sender_listener.sending_end.load(Ordering::SeqCst));

    let received = server_listener.received_files.lock().clone();
    assert_eq!(received, vec![FileInfo { name: "hello.txt".into(), size: 5 }]);

    let written = std::fs::read(dest.path().join("hello.txt")).unwrap();
    assert_eq!(written, b"hello");

    server.stop();
}

#[tokio::test]
async fn s2_sends_two_files_in_order() {
    let dest = tempfile::tempdir().unwrap();
    let server_listener = Arc::new(RecordingListener::default());
    let (server, _port) = spawn_server("cccccccccccc", dest.path(), true, server_listener.clone()).await;

    let files: Vec<Box<dyn File>> = vec![
        Box::new(MemFile::new("a/b.bin", vec![0xAAu8; 1024])),
        Box::new(MemFile::new("a/c.bin", vec![0x00u8; 1])),
    ];
    let request = SendRequest::new(receiver_device("aaaaaaaaaaaa"), "cccccccccccc")
        .unwrap()
        .with_resolve_timeout(Duration::from_secs(5))
        .with_ask_timeout(Duration::from_secs(5))
        .with_files(files);

    assert!(request.execute_async().await);

    let order = server_listener.file_end_order.lock().clone();
    assert_eq!(order, vec!["a/b.bin".to_string(), "a/c.bin".to_string()]);

    let b = std::fs::read(dest.path().join("a/b.bin")).unwrap();
    let c = std::fs::read(dest.path().join("a/c.bin")).unwrap();
    assert_eq!(b.len() + c.len(), 1025);

    server.stop();
}

#[tokio::test]
async fn s3_unknown_receiver_reports_not_found() {
    let sender_listener = Arc::new(RecordingListener::default());
    let request = SendRequest::new(receiver_device("aaaaaaaaaaaa"), "zzzzzzzzzzzz")
        .unwrap()
        .with_resolve_timeout(Duration::from_millis(200))
        .with_event_listener(sender_listener.clone());

    let started = tokio::time::Instant::now();
    let ok = request.execute_async().await;
    assert!(!ok);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(sender_listener.receiver_not_found.load(Ordering::SeqCst));
}

#[tokio::test]
async fn s4_declined_ask_leaves_no_files_behind() {
    let dest = tempfile::tempdir().unwrap();
    let server_listener = Arc::new(RecordingListener::default());
    let (server, _port) = spawn_server("dddddddddddd", dest.path(), false, server_listener.clone()).await;

    let sender_listener = Arc::new(RecordingListener::default());
    let files: Vec<Box<dyn File>> = vec![Box::new(MemFile::new("secret.txt", b"nope".to_vec()))];
    let request = SendRequest::new(receiver_device("aaaaaaaaaaaa"), "dddddddddddd")
        .unwrap()
        .with_resolve_timeout(Duration::from_secs(5))
        .with_ask_timeout(Duration::from_secs(5))
        .with_files(files)
        .with_event_listener(sender_listener.clone());

    let ok = request.execute_async().await;
    assert!(!ok);
    assert!(sender_listener.receiver_declined.load(Ordering::SeqCst));
    assert!(!std::path::Path::new(dest.path()).join("secret.txt").exists());

    server.stop();
}

#[tokio::test]
async fn s5_malformed_ask_body_returns_bad_request() {
    let dest = tempfile::tempdir().unwrap();
    let server_listener = Arc::new(RecordingListener::default());
    let (server, port) = spawn_server("eeeeeeeeeeee", dest.path(), true, server_listener.clone()).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{port}/ask"))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("{")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(!server_listener.sender_ask_seen.load(Ordering::SeqCst));

    // the connection (and the server) is still usable afterwards.
    let device_info = client
        .get(format!("http://127.0.0.1:{port}/device_info"))
        .send()
        .await
        .unwrap();
    assert_eq!(device_info.status(), reqwest::StatusCode::OK);

    server.stop();
}

#[tokio::test]
async fn s6_path_traversal_entry_is_rejected() {
    let dest_parent = tempfile::tempdir().unwrap();
    let dest = dest_parent.path().join("dest");
    let server_listener = Arc::new(RecordingListener::default());
    let (server, port) = spawn_server("ffffffffffff", &dest, true, server_listener.clone()).await;

    let files: Vec<Box<dyn File>> = vec![Box::new(MemFile::new("../evil", b"pwned".to_vec()))];
    let writer = tfa::TfaWriter::new(files).unwrap();
    let content_length = writer.calc_size();

    let mut remaining = writer;
    let mut archive = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = remaining.write_to(&mut buf);
        if n == 0 {
            break;
        }
        archive.extend_from_slice(&buf[..n]);
    }
    assert_eq!(archive.len() as u64, content_length);

    let device_info_header = serde_json::to_string(&receiver_device("aaaaaaaaaaaa")).unwrap();
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{port}/send"))
        .header("X-DeviceInfo", device_info_header)
        .header(reqwest::header::CONTENT_LENGTH, content_length)
        .body(archive)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!dest_parent.path().join("evil").exists());
    assert!(!dest.join("evil").exists());

    server.stop();
}
