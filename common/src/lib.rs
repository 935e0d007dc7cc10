pub mod device;
pub mod file;
pub mod logger;
pub mod port;
pub mod runtime;

pub use device::{AskResponse, DeviceInfo, FileInfo, SendAsk, PROTOCOL_VERSION};
pub use file::{File, FileMetadata, NativeFile, StdFileMetadata};
pub use port::{AvailablePortFinder, StdPortFinder};
