pub mod file;
pub mod monitor;
pub mod registry;
pub mod util;

pub use file::{FileRecord, FileRecordView};
pub use monitor::{FilesystemMonitor, MonitorHandle, RawEvent};
pub use registry::FileRegistries;
