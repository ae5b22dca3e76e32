//! Client-side errors.

use std::time::Duration;

use thiserror::Error;
use tonic::Code;

/// Convenience alias for fallible gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by the gateways.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The server address could not be parsed.
    #[error("invalid server address: {0}")]
    Address(#[from] url::ParseError),

    /// The server address parsed but is unusable.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    /// The transport failed to establish or broke down.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The server answered a call with an error status.
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// Connecting did not succeed within the configured budget.
    #[error("timed out connecting to {addr} after {waited:?}")]
    ConnectTimeout {
        /// Address that was being dialed.
        addr: String,
        /// Total time spent retrying.
        waited: Duration,
    },

    /// The connection broke mid-call and recovery was exhausted.
    #[error("connection lost and not recovered: {0}")]
    ConnectionLost(String),

    /// A reconnect reached a server backed by a different data resource.
    ///
    /// Fatal: recovery stops immediately, the call is never re-issued.
    #[error("server identity changed: expected {expected:?}, found {found:?}")]
    IdentityMismatch {
        /// Resource id recorded at first connect.
        expected: String,
        /// Resource id the new server reported.
        found: String,
    },

    /// An operation was attempted before [`connect`](crate::gateway::InstrumentGateway::connect).
    #[error("gateway is not connected")]
    NotConnected,

    /// The server returned a payload the client could not interpret.
    #[error("malformed server response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    /// Whether this failure is a transport loss the recovery layer may
    /// resolve by reconnecting. Server-side statuses pass through
    /// untouched; only the transport itself going away qualifies.
    pub fn is_transport_lost(&self) -> bool {
        match self {
            GatewayError::Transport(_) | GatewayError::ConnectionLost(_) => true,
            GatewayError::Rpc(status) => {
                status.code() == Code::Unavailable
                    || (status.code() == Code::Unknown
                        && is_transport_message(status.message()))
            }
            _ => false,
        }
    }
}

/// Heuristics for `Unknown` statuses that are really transport failures
/// reported through the HTTP/2 layer.
fn is_transport_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["transport error", "connection reset", "broken pipe", "connection refused"]
        .iter()
        .any(|needle| message.contains(needle))
}
