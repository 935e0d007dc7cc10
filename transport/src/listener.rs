use common::{DeviceInfo, FileInfo};

/// Observer of both sides of a transfer. Every method is a no-op by default;
/// implementers override only the events they care about.
///
/// Shared by reference across HTTP worker threads on the receiving side:
/// implementations that keep mutable state must synchronize it internally.
pub trait EventListener: Send + Sync {
    // sender-side events, fired by `SendRequest::execute`.
    fn on_resolving(&self) {}
    fn on_receiver_not_found(&self) {}
    fn on_resolved(&self) {}
    fn on_asking_receiver(&self) {}
    fn on_receiver_declined(&self) {}
    fn on_receiver_accepted(&self) {}
    fn on_sending_start(&self) {}
    fn on_sending_total_progress(&self, total_size: u64, current_size: u64) {
        let _ = (total_size, current_size);
    }
    fn on_sending_file_start(&self, file: &FileInfo) {
        let _ = file;
    }
    fn on_sending_file_progress(&self, file: &FileInfo, current_size: u64) {
        let _ = (file, current_size);
    }
    fn on_sending_file_end(&self, file: &FileInfo) {
        let _ = file;
    }
    fn on_sending_end(&self) {}

    // receiver-side events, fired by `Server`.
    fn on_receiver_started(&self, port: u16) {
        let _ = port;
    }
    fn on_sender_ask(&self, sender: &DeviceInfo) {
        let _ = sender;
    }
    fn on_receiving_start(&self, sender: &DeviceInfo, total_size: u64) {
        let _ = (sender, total_size);
    }
    fn on_receiving_total_progress(&self, sender: &DeviceInfo, total_size: u64, received_size: u64) {
        let _ = (sender, total_size, received_size);
    }
    fn on_receiving_file_start(&self, sender: &DeviceInfo, file: &FileInfo) {
        let _ = (sender, file);
    }
    fn on_receiving_file_progress(&self, sender: &DeviceInfo, file: &FileInfo, received_size: u64) {
        let _ = (sender, file, received_size);
    }
    fn on_receiving_file_end(&self, sender: &DeviceInfo, file: &FileInfo) {
        let _ = (sender, file);
    }
    fn on_receiving_end(&self, sender: &DeviceInfo, total_size: u64, received_files: &[FileInfo]) {
        let _ = (sender, total_size, received_files);
    }
}
