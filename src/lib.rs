pub mod config;
pub mod constants;
pub mod core;
pub mod err;
pub mod fs;
pub mod sync;
pub mod utilities;
pub mod web;

// Re-export commonly used items for external crates/tests
pub use fs::{FileRecord, FileRegistries};
