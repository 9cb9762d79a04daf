//! Crash accounting and per-process logging for supervised processes.
//!
//! [`ProcessRecord`] is the supervisor-side ledger for one process: how
//! often it crashed recently, how often it crashed ever, and where its
//! log entries go. Crash counting is debounced: a process that stays up
//! for the configured quiet period counts as recovered and its short-term
//! counter resets.
//!
//! The log sink is bound lazily in the background through the seams in
//! [`log`]: an async [`log::FileLocator`] resolves the log file path and
//! a [`log::LogTransport`] opens a daily-rotating sink for it.

pub mod log;

mod record;


pub use record::{
    ProcessRecord, RecordOptions, DEFAULT_CRASH_RECOVERY_PERIOD, DEFAULT_RESTART_RETRIES,
};
