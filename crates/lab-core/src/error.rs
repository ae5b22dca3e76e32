//! Error taxonomy for the lab-control network.

use thiserror::Error;

/// Convenience alias for fallible lab-control operations.
pub type LabResult<T> = Result<T, LabError>;

/// Errors produced across the instrument-control network.
///
/// Variants split along recovery lines: losing the transport is the only
/// condition a client may transparently retry, an identity mismatch is
/// always fatal, and registry or storage conflicts surface synchronously
/// to the caller that caused them.
#[derive(Debug, Error)]
pub enum LabError {
    /// The connection to a server was lost.
    ///
    /// Recoverable: gateways may reconnect and re-issue the call.
    #[error("connection to server lost: {0}")]
    TransportLost(String),

    /// A reconnect reached a server backed by a different data resource.
    ///
    /// Never retried. Continuing would silently mix two sessions' data.
    #[error("server identity changed: expected {expected:?}, found {found:?}")]
    IdentityMismatch {
        /// Resource id recorded at first connect.
        expected: String,
        /// Resource id the new server reported.
        found: String,
    },

    /// A device with this name is already registered.
    #[error("device '{0}' is already registered")]
    DeviceExists(String),

    /// No device with this name is registered.
    #[error("no device named '{0}' is registered")]
    DeviceUnknown(String),

    /// Driver construction failed while adding or restarting a device.
    ///
    /// Carries the full cause chain as text; after a failed restart the
    /// device is absent from the registry.
    #[error("driver for device '{name}' failed to initialize: {reason}")]
    DriverInit {
        /// Device the driver was being built for.
        name: String,
        /// Flattened cause chain from the factory.
        reason: String,
    },

    /// A registered driver failed while being used.
    #[error("driver fault: {0}")]
    DriverFault(String),

    /// The requested measurement cannot coexist with the current one.
    #[error("measurement conflict: {0}")]
    MeasurementConflict(String),

    /// No measurement with this name is currently held by the server.
    #[error("no measurement named '{0}'")]
    MeasurementUnknown(String),

    /// No records exist under this data path.
    #[error("no data under path '{0}'")]
    PathUnknown(String),

    /// The path exists but none of its records carry this field.
    #[error("path '{path}' has no field '{field}'")]
    FieldUnknown {
        /// Data path that was queried.
        path: String,
        /// Field name that was requested.
        field: String,
    },

    /// A data path was syntactically invalid.
    #[error("invalid data path '{0}'")]
    InvalidPath(String),

    /// A slice argument could not be applied.
    #[error("invalid slice: {0}")]
    InvalidSlice(String),

    /// Configuration was structurally valid but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connecting to a server did not succeed within the allowed time.
    #[error("timed out connecting to {addr} after {waited_ms} ms")]
    ConnectTimeout {
        /// Address that was being dialed.
        addr: String,
        /// Total time spent retrying.
        waited_ms: u64,
    },

    /// Underlying file I/O failed.
    #[error("storage I/O error")]
    Io(#[from] std::io::Error),

    /// A stored or transmitted record could not be (de)serialized.
    #[error("serialization error")]
    Serde(#[from] serde_json::Error),
}

impl LabError {
    /// Wrap a driver construction failure, flattening the cause chain.
    pub fn driver_init(name: &str, err: &anyhow::Error) -> Self {
        LabError::DriverInit {
            name: name.to_string(),
            reason: format!("{err:#}"),
        }
    }

    /// Whether a client may recover from this error by reconnecting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LabError::TransportLost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_loss_is_the_only_recoverable_error() {
        assert!(LabError::TransportLost("broken pipe".into()).is_recoverable());
        assert!(!LabError::IdentityMismatch {
            expected: "a.jsonl".into(),
            found: "b.jsonl".into(),
        }
        .is_recoverable());
        assert!(!LabError::DeviceExists("probe".into()).is_recoverable());
    }

    #[test]
    fn driver_init_flattens_the_cause_chain() {
        let cause = anyhow::anyhow!("port not present").context("opening /dev/ttyUSB0");
        let err = LabError::driver_init("source", &cause);
        let text = err.to_string();
        assert!(text.contains("source"), "{text}");
        assert!(text.contains("port not present"), "{text}");
    }

    #[test]
    fn messages_name_the_offending_entity() {
        assert_eq!(
            LabError::DeviceUnknown("magnet".into()).to_string(),
            "no device named 'magnet' is registered"
        );
        assert_eq!(
            LabError::FieldUnknown {
                path: "/status/probe".into(),
                field: "phase".into(),
            }
            .to_string(),
            "path '/status/probe' has no field 'phase'"
        );
    }
}
