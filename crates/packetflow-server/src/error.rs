//! Server-level and dispatch-level error taxonomy.

use packetflow_core::ConnectionError;

/// Failures at the listener/server level.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configured bind address could not be parsed or bound.
    #[error("failed to bind {address}: {reason}")]
    Bind {
        /// The address that failed to bind.
        address: String,
        /// The underlying OS error.
        reason: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A per-connection error propagated out of the read loop.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A socket I/O failure outside of bind (read/write/shutdown).
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures surfaced by the dispatcher while routing a single packet.
///
/// Per the propagation policy, none of these tear down the connection; the
/// dispatcher turns most of them into an error-response packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The connection's permission level is below the handler's
    /// requirement, or the packet's `Encrypted` flag does not match the
    /// handler's requirement.
    #[error("permission denied for command {command}")]
    PermissionDenied {
        /// The command that was rejected.
        command: u16,
    },

    /// No handler is registered for this command id.
    #[error("unknown command {command}")]
    UnknownCommand {
        /// The command that has no handler.
        command: u16,
    },

    /// The connection×command sliding window rejected this packet.
    #[error("rate limited for command {command}")]
    RateLimited {
        /// The command that was rate limited.
        command: u16,
    },

    /// `register()` was called twice for the same command id.
    #[error("command {command} already has a registered handler")]
    DuplicateHandler {
        /// The command that was already registered.
        command: u16,
    },

    /// The handler did not complete within the configured timeout.
    #[error("handler for command {command} timed out")]
    HandlerTimeout {
        /// The command whose handler timed out.
        command: u16,
    },
}

impl DispatchError {
    /// The command id this error pertains to, if any.
    #[must_use]
    pub fn command(&self) -> u16 {
        match self {
            Self::PermissionDenied { command }
            | Self::UnknownCommand { command }
            | Self::RateLimited { command }
            | Self::DuplicateHandler { command }
            | Self::HandlerTimeout { command } => *command,
        }
    }

    /// Whether this error should be reported to the peer as an error
    /// response packet (as opposed to silently dropped, e.g. unknown
    /// commands which must not reveal which commands exist).
    #[must_use]
    pub fn reports_to_peer(&self) -> bool {
        !matches!(self, Self::UnknownCommand { .. })
    }
}

/// A handler's own failure, distinct from pipeline-level [`DispatchError`]s.
///
/// Per the propagation policy, a `Failed` handler error is logged (or
/// handed to an installed error callback) and otherwise ignored; only
/// `Fatal` recommends tearing down the connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// The handler could not complete the request; the connection stays
    /// open.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler hit a condition severe enough to warrant closing the
    /// connection (e.g. detected state corruption).
    #[error("handler failed fatally: {0}")]
    Fatal(String),
}

impl HandlerError {
    /// Whether this error should tear down the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_does_not_report_to_peer() {
        let err = DispatchError::UnknownCommand { command: 7 };
        assert!(!err.reports_to_peer());
    }

    #[test]
    fn permission_denied_reports_to_peer() {
        let err = DispatchError::PermissionDenied { command: 3 };
        assert!(err.reports_to_peer());
    }

    #[test]
    fn only_fatal_handler_errors_are_fatal() {
        assert!(!HandlerError::Failed("bad input".to_string()).is_fatal());
        assert!(HandlerError::Fatal("corrupted state".to_string()).is_fatal());
    }
}
