//! Crate-wide error plumbing.
//!
//! Errors travel across module boundaries as boxed trait objects.
//! `FsrsyncError` is the concrete error this crate raises itself: every
//! failure carries the part of the pipeline it came from and the site
//! that raised it. Only configuration failures abort the process; the
//! rest are contained at the destination-worker boundary, logged, and
//! retried on a later cycle or healed by the full-sync scheduler.

use std::fmt::{Debug, Display, Formatter};

pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

/// Which part of the pipeline raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Startup configuration and binding; aborts the process.
    Config,
    /// Installing or reading kernel filesystem watches.
    Watch,
    /// The rsync subprocess layer.
    Transfer,
    /// A pre/post sync hook, local or over ssh.
    Hook,
    /// Talking to a peer's control plane.
    PeerLock,
    /// States the pipeline should never reach.
    Internal,
}

pub struct FsrsyncError {
    kind: ErrorKind,
    message: String,
    file: &'static str,
    line: u32,
    // Store Send + Sync error for thread-safety; still exposed as `&dyn Error` in `source()`
    source: Option<Error>,
}

impl FsrsyncError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        file: &'static str,
        line: u32,
        source: Option<Error>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            file,
            line,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[macro_export]
macro_rules! fsrsync_error {
    ($kind:ident, $fmt:expr $(, $($args:tt)*)?) => {
        $crate::err::FsrsyncError::new(
            $crate::err::ErrorKind::$kind,
            format!($fmt $(,$($args)*)?),
            file!(), line!(), None)
    };
}

#[macro_export]
macro_rules! fsrsync_error_with_source {
    ($kind:ident, $source:expr, $fmt:expr $(, $($args:tt)*)?) => {
        $crate::err::FsrsyncError::new(
            $crate::err::ErrorKind::$kind,
            format!($fmt $(,$($args)*)?),
            file!(), line!(), Some(Box::new($source) as $crate::err::Error))
    }
}

impl Debug for FsrsyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} error ({}:{}): {}",
            self.kind, self.file, self.line, self.message
        )
    }
}

impl Display for FsrsyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FsrsyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error))
    }
}
