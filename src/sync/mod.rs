pub mod command;
pub mod rsync;
pub mod ssh;

pub use rsync::{HookSet, RsyncManager, RsyncSettings};
