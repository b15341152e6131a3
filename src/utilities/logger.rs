//! Channel-backed async file logger.
//!
//! A cloneable handle sends records over an mpsc channel to a background
//! task that owns the log file, so callers never block on disk I/O. The
//! writer enforces the size cap on the log file by truncating it in place
//! once it grows past the limit.

use crate::constants::MAX_LOG_SIZE;
use crate::err::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Log level for messages. Mirrors the levels accepted by the `loglevel`
/// configuration key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "\x1b[34mDEBUG\x1b[0m",
            LogLevel::Info => "INFO ",
            LogLevel::Warning => "\x1b[33mWARN \x1b[0m",
            LogLevel::Error => "\x1b[31mERROR\x1b[0m",
            LogLevel::Critical => "\x1b[31;1mCRIT \x1b[0m",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for LogLevel {
    type Err = crate::err::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!("Unknown log level: {}", other).into()),
        }
    }
}

/// A simple async logger handle. Cloning creates another sender handle
/// sharing the same writer task and minimum level.
#[derive(Clone, Debug)]
pub struct AsyncLogger {
    tx: mpsc::Sender<LogRecord>,
    min_level: LogLevel,
}

impl AsyncLogger {
    /// Log a message at a specific level.
    fn log<S: Into<String>>(&self, level: LogLevel, msg: S) {
        if level < self.min_level {
            return;
        }
        match self.tx.try_send(LogRecord::new(level, msg.into())) {
            Ok(_) => {}
            Err(err) => {
                eprintln!("Failed to send log message: {}", err);
            }
        }
    }

    /// Request the logger task to flush and shut down.
    pub async fn shutdown(&self) {
        // Ignore send error (e.g., task already closed)
        let _ = self.tx.send(LogRecord::Shutdown).await;
    }

    pub fn debug<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Debug, msg);
    }
    pub fn info<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Info, msg);
    }
    pub fn warning<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Warning, msg);
    }
    pub fn error<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Error, msg);
    }
    pub fn critical<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Critical, msg);
    }

    /// A logger with no backing task. Records are accepted and discarded;
    /// used by tests and as a stand-in before the real logger exists.
    pub fn disabled() -> Self {
        let (tx, rx) = mpsc::channel::<LogRecord>(64);
        // Keep the receiver alive without a runtime so try_send never errors.
        let _ = Box::leak(Box::new(rx));
        AsyncLogger {
            tx,
            min_level: LogLevel::Critical,
        }
    }
}

#[derive(Debug)]
enum LogRecord {
    Message {
        level: LogLevel,
        msg: String,
        ts_millis: i64,
    },
    Shutdown,
}

impl LogRecord {
    fn new(level: LogLevel, msg: String) -> Self {
        let ts_millis = Utc::now().timestamp_millis();
        Self::Message {
            level,
            msg,
            ts_millis,
        }
    }

    fn format_line(&self) -> Option<String> {
        match self {
            LogRecord::Message {
                level,
                msg,
                ts_millis,
            } => {
                // Format: 2025-10-08T21:22:33.123Z [LEVEL] message\n
                let dt = DateTime::from_timestamp_millis(*ts_millis).unwrap_or_else(Utc::now);
                let time_stamp = dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                Some(format!("{} [{}] {}\n", time_stamp, level, msg))
            }
            LogRecord::Shutdown => None,
        }
    }
}

/// Initialize a file-based async logger. Returns the logger handle and the
/// background task handle. `min_level` filters on the sending side, so
/// suppressed records never cross the channel.
pub async fn init_file_logger<P: AsRef<Path>>(
    path: P,
    min_level: LogLevel,
) -> Result<(AsyncLogger, JoinHandle<()>)> {
    let path_buf: PathBuf = path.as_ref().to_path_buf();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path_buf)
        .await?;

    let (tx, mut rx) = mpsc::channel::<LogRecord>(1024);

    let task = tokio::spawn(async move {
        let mut writer = BufWriter::new(file);
        while let Some(rec) = rx.recv().await {
            match &rec {
                LogRecord::Message { .. } => {
                    if let Some(line) = rec.format_line() {
                        if log_file_exceeds_cap(&path_buf) {
                            // Truncate in place rather than rotate; the cap
                            // bounds disk usage, history is expendable.
                            if let Ok(fresh) = OpenOptions::new()
                                .create(true)
                                .write(true)
                                .truncate(true)
                                .open(&path_buf)
                                .await
                            {
                                writer = BufWriter::new(fresh);
                            }
                        }
                        let _ = writer.write_all(line.as_bytes()).await;
                        let _ = writer.flush().await;
                    }
                }
                LogRecord::Shutdown => {
                    break;
                }
            }
        }
        let _ = writer.flush().await;
    });

    Ok((AsyncLogger { tx, min_level }, task))
}

fn log_file_exceeds_cap(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.len() > MAX_LOG_SIZE)
        .unwrap_or(false)
}
