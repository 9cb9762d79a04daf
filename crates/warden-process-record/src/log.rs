//! Per-process log sinks.
//!
//! A process record owns a log sink bound to a file the platform locates
//! for it. Two seams keep the record testable: [`FileLocator`] answers
//! "where does this process's log live" and [`LogTransport`] turns that
//! path into a [`LogSink`]. The production transport writes through a
//! daily-rotating file appender.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use warden_common::{ProcessError, ProcessResult};

/// Severity of a log entry written on behalf of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Destination for a process's log entries.
pub trait LogSink: Send + Sync {
    fn write(&self, level: LogLevel, message: &str);
}

/// How a file-backed sink rotates its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    Daily,
}

/// Opens a [`LogSink`] for a resolved log file path. `id` names the
/// process the sink belongs to and appears in errors.
pub trait LogTransport: Send + Sync {
    fn open(&self, id: &str, path: &Path, rotation: RotationPolicy)
        -> ProcessResult<Arc<dyn LogSink>>;
}

/// Resolves log file locations on behalf of process records. The lookup
/// may create directories or consult configuration, hence async and
/// fallible.
#[async_trait]
pub trait FileLocator: Send + Sync {
    async fn find_log_file(&self, file_name: &str) -> ProcessResult<PathBuf>;
}

/// File-backed sink that rotates daily, named after the process log file
/// it was opened for.
#[derive(Debug)]
pub struct RotatingFileSink {
    appender: Mutex<RollingFileAppender>,
}

impl RotatingFileSink {
    pub fn open(id: &str, path: &Path, rotation: RotationPolicy) -> ProcessResult<Self> {
        let directory = path.parent().ok_or_else(|| {
            ProcessError::logging(id, format!("log path '{}' has no parent", path.display()))
        })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ProcessError::logging(id, format!("log path '{}' has no file name", path.display()))
            })?;

        let RotationPolicy::Daily = rotation;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(file_name)
            .build(directory)
            .map_err(|err| ProcessError::logging(id, err.to_string()))?;

        Ok(RotatingFileSink {
            appender: Mutex::new(appender),
        })
    }
}

impl LogSink for RotatingFileSink {
    fn write(&self, level: LogLevel, message: &str) {
        let line = format!(
            "{} [{}] {}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            level,
            message
        );
        let mut appender = self.appender.lock();
        // Log delivery is best-effort; a failed write must not take the
        // supervisor down.
        let _ = appender.write_all(line.as_bytes());
    }
}

/// Production transport backed by [`RotatingFileSink`].
pub struct RotatingFileTransport;

impl LogTransport for RotatingFileTransport {
    fn open(
        &self,
        id: &str,
        path: &Path,
        rotation: RotationPolicy,
    ) -> ProcessResult<Arc<dyn LogSink>> {
        let sink = RotatingFileSink::open(id, path, rotation)?;
        Ok(Arc::new(sink))
    }
}
