//! ProcessRecord - per-process crash accounting and log binding.
//!
//! The orchestrator keeps one record per supervised process. The record
//! tracks two counters: `restarts`, the number of crashes inside the
//! current recovery window, and `total_restarts`, the lifetime count.
//! Every crash re-arms a quiet-period timer; when the process stays up
//! for the whole period it is considered recovered and the short-term
//! counter resets.
//!
//! Restart policy stays with the orchestrator. The record only counts and
//! answers [`exhausted_retries`](ProcessRecord::exhausted_retries).

use crate::log::{FileLocator, LogLevel, LogSink, LogTransport, RotationPolicy};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Quiet period after which a crashing process counts as recovered.
pub const DEFAULT_CRASH_RECOVERY_PERIOD: Duration = Duration::from_millis(5000);

/// Default number of in-window restarts the orchestrator tolerates.
pub const DEFAULT_RESTART_RETRIES: u32 = 5;

/// Restart policy knobs for one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordOptions {
    /// Restart the process when it exits abnormally.
    pub restart_on_error: bool,
    /// In-window restarts tolerated before the process is given up on.
    pub restart_retries: u32,
    /// Quiet period that must elapse before `restarts` resets.
    pub crash_recovery_period: Duration,
}

impl Default for RecordOptions {
    fn default() -> Self {
        RecordOptions {
            restart_on_error: true,
            restart_retries: DEFAULT_RESTART_RETRIES,
            crash_recovery_period: DEFAULT_CRASH_RECOVERY_PERIOD,
        }
    }
}

struct RecordInner {
    name: String,
    options: RecordOptions,
    restarts: AtomicU32,
    total_restarts: AtomicU32,
    /// Cancels the armed recovery timer; exactly one timer is live
    /// whenever `restarts > 0`.
    recovery_timer: Mutex<Option<CancellationToken>>,
    /// Bound lazily by the background lookup task. Writes before the bind
    /// are dropped.
    sink: RwLock<Option<Arc<dyn LogSink>>>,
}

impl RecordInner {
    fn write_log(&self, level: LogLevel, message: &str) {
        match self.sink.read().as_ref() {
            Some(sink) => sink.write(level, message),
            None => {
                debug!(name = %self.name, %message, "log sink not bound yet, dropping entry");
            }
        }
    }
}

/// Crash accounting record for one supervised process. Cloneable; every
/// clone shares the counters and the sink.
#[derive(Clone)]
pub struct ProcessRecord {
    inner: Arc<RecordInner>,
}

impl ProcessRecord {
    /// Create a record and start binding its log sink in the background.
    ///
    /// The sink lookup asks `locator` for `{name}.log` and opens it
    /// through `transport` with daily rotation. A failure at either step
    /// is logged and swallowed; crash accounting works without a sink.
    pub fn new(
        name: impl Into<String>,
        options: RecordOptions,
        locator: Arc<dyn FileLocator>,
        transport: Arc<dyn LogTransport>,
    ) -> Self {
        let record = ProcessRecord {
            inner: Arc::new(RecordInner {
                name: name.into(),
                options,
                restarts: AtomicU32::new(0),
                total_restarts: AtomicU32::new(0),
                recovery_timer: Mutex::new(None),
                sink: RwLock::new(None),
            }),
        };

        let inner = Arc::clone(&record.inner);
        tokio::spawn(async move {
            let file_name = format!("{}.log", inner.name);
            let path = match locator.find_log_file(&file_name).await {
                Ok(path) => path,
                Err(err) => {
                    warn!(name = %inner.name, error = %err, "log file lookup failed");
                    return;
                }
            };
            match transport.open(&inner.name, &path, RotationPolicy::Daily) {
                Ok(sink) => {
                    debug!(name = %inner.name, path = %path.display(), "log sink bound");
                    *inner.sink.write() = Some(sink);
                }
                Err(err) => {
                    warn!(name = %inner.name, error = %err, "log sink open failed");
                }
            }
        });

        record
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &RecordOptions {
        &self.inner.options
    }

    /// Crashes inside the current recovery window.
    pub fn restarts(&self) -> u32 {
        self.inner.restarts.load(Ordering::SeqCst)
    }

    /// Lifetime crash count; never resets.
    pub fn total_restarts(&self) -> u32 {
        self.inner.total_restarts.load(Ordering::SeqCst)
    }

    /// Whether the in-window crash count has passed the configured retry
    /// budget.
    pub fn exhausted_retries(&self) -> bool {
        self.restarts() > self.inner.options.restart_retries
    }

    /// Write a log entry on behalf of the process. Entries issued before
    /// the sink binds are dropped.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.inner.write_log(level, message);
    }

    /// Register another crash.
    ///
    /// Increments both counters and re-arms the recovery timer: any
    /// previously armed timer is cancelled first, so the quiet period is
    /// measured from the most recent crash. Returns the new in-window
    /// count.
    ///
    /// Cancellation and reset are serialized on the timer lock. A timer
    /// whose sleep elapses concurrently with a crash either resets the
    /// counter before the crash is counted or observes its own
    /// cancellation and does nothing; it can never wipe a crash that was
    /// counted after the cancel.
    pub fn still_crashing(&self) -> u32 {
        let token = CancellationToken::new();
        let restarts;
        {
            let mut timer = self.inner.recovery_timer.lock();
            if let Some(previous) = timer.replace(token.clone()) {
                previous.cancel();
            }
            restarts = self.inner.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.total_restarts.fetch_add(1, Ordering::SeqCst);
        }
        debug!(name = %self.inner.name, restarts, "process crashed again");

        let inner = Arc::clone(&self.inner);
        let period = self.inner.options.crash_recovery_period;
        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = token.cancelled() => {}
                _ = tokio::time::sleep(period) => {
                    let mut timer = inner.recovery_timer.lock();
                    // A crash may have re-armed between the sleep elapsing
                    // and this poll; its cancel wins.
                    if token.is_cancelled() {
                        return;
                    }
                    timer.take();
                    info!(name = %inner.name, "process recovered");
                    inner.write_log(LogLevel::Info, "process recovered");
                    inner.restarts.store(0, Ordering::SeqCst);
                }
            }
        });

        restarts
    }
}
