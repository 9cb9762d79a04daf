//! Error types for supervisor-side process control.

use thiserror::Error;

/// Result type for process-control operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Error type for supervisor-side process control.
///
/// `Clone` is required because a single connection outcome is fanned out to
/// every caller queued behind an in-flight attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The process is misconfigured for the requested operation, e.g. a
    /// connection attempt without a socket.
    #[error("Process configuration error: {id} - {reason}")]
    Configuration { id: String, reason: String },

    /// The RPC channel failed to open or reported an error signal.
    #[error("RPC channel error: {id} - {reason}")]
    Channel { id: String, reason: String },

    /// A proxied operation returned an error from the remote side.
    #[error("Remote operation failed: {id} - {operation}: {reason}")]
    RemoteOperation {
        id: String,
        operation: String,
        reason: String,
    },

    /// A worker operation was invoked on a process that is not a cluster
    /// manager.
    #[error("Process is not a cluster manager: {id}")]
    NotClusterManager { id: String },

    /// The process actor is gone (command channel closed or response
    /// dropped).
    #[error("Process handle unavailable: {id} - {reason}")]
    HandleUnavailable { id: String, reason: String },

    /// Log sink lookup or open failed. Never fatal for process control.
    #[error("Process logging error: {id} - {reason}")]
    Logging { id: String, reason: String },
}

impl ProcessError {
    pub fn configuration(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn channel(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Channel {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn remote_operation(
        id: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::RemoteOperation {
            id: id.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn not_cluster_manager(id: impl Into<String>) -> Self {
        Self::NotClusterManager { id: id.into() }
    }

    pub fn handle_unavailable(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandleUnavailable {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn logging(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Logging {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = ProcessError::configuration("web", "no socket specified");
        assert!(matches!(error, ProcessError::Configuration { .. }));
        assert_eq!(
            format!("{}", error),
            "Process configuration error: web - no socket specified"
        );

        let error = ProcessError::remote_operation("web", "kill", "permission denied");
        assert!(format!("{}", error).contains("kill"));
    }

    #[test]
    fn test_error_clone_equality() {
        let error = ProcessError::channel("web", "connection refused");
        assert_eq!(error.clone(), error);
    }
}
