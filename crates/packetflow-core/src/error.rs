//! Errors surfaced by the connection state machine.

use std::time::Duration;

use packetflow_crypto::CryptoError;
use packetflow_proto::CodecError;

use crate::connection::ConnectionState;

/// Failure modes of a [`crate::Connection`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Frame decoding failed.
    #[error("frame decode failed: {0}")]
    Codec(#[from] CodecError),

    /// Encryption or compression failed.
    #[error("crypto pipeline failed: {0}")]
    Crypto(#[from] CryptoError),

    /// No activity was observed within the configured idle timeout.
    #[error("idle for {elapsed:?}, exceeding the configured timeout")]
    IdleTimeout {
        /// Time elapsed since the last observed activity.
        elapsed: Duration,
    },

    /// The remote end closed the connection.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The peer sent a well-formed frame that violates protocol rules
    /// (e.g. a command before authentication completed).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An operation was attempted that the current state does not allow.
    #[error("cannot {operation} while in state {state:?}")]
    InvalidState {
        /// The state the connection was in.
        state: ConnectionState,
        /// The operation that was rejected.
        operation: &'static str,
    },
}

impl ConnectionError {
    /// Whether retrying the operation later might succeed, as opposed to a
    /// fatal condition that must close the connection.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Codec(CodecError::NeedMore) => true,
            Self::Codec(_)
            | Self::Crypto(_)
            | Self::IdleTimeout { .. }
            | Self::PeerClosed
            | Self::ProtocolViolation(_)
            | Self::InvalidState { .. } => false,
        }
    }
}
