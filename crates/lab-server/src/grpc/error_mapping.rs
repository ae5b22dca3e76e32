//! Translation from [`LabError`] to gRPC status codes.
//!
//! Codes are chosen so clients can react semantically: `AlreadyExists`
//! and `NotFound` for registry conflicts, `FailedPrecondition` for
//! measurement conflicts and driver construction failures (the request
//! was well-formed, the server state refused it), `InvalidArgument` for
//! malformed paths, slices and configs.

use tonic::{Code, Status};

use lab_core::LabError;

/// Map a domain error onto the closest gRPC status code.
pub fn to_status(err: LabError) -> Status {
    let code = match &err {
        LabError::DeviceExists(_) => Code::AlreadyExists,
        LabError::DeviceUnknown(_)
        | LabError::MeasurementUnknown(_)
        | LabError::PathUnknown(_) => Code::NotFound,
        LabError::FieldUnknown { .. }
        | LabError::InvalidPath(_)
        | LabError::InvalidSlice(_)
        | LabError::InvalidConfig(_) => Code::InvalidArgument,
        LabError::MeasurementConflict(_) | LabError::DriverInit { .. } => Code::FailedPrecondition,
        LabError::TransportLost(_)
        | LabError::ConnectTimeout { .. }
        | LabError::IdentityMismatch { .. } => Code::Unavailable,
        LabError::DriverFault(_) | LabError::Io(_) | LabError::Serde(_) => Code::Internal,
    };
    Status::new(code, err.to_string())
}

/// Convenience for service impls returning [`lab_core::LabResult`].
pub trait LabResultExt<T> {
    /// Convert the error side into a [`Status`].
    fn map_lab_err(self) -> Result<T, Status>;
}

impl<T> LabResultExt<T> for Result<T, LabError> {
    fn map_lab_err(self) -> Result<T, Status> {
        self.map_err(to_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_conflicts_map_to_semantic_codes() {
        assert_eq!(
            to_status(LabError::DeviceExists("probe".into())).code(),
            Code::AlreadyExists
        );
        assert_eq!(
            to_status(LabError::DeviceUnknown("probe".into())).code(),
            Code::NotFound
        );
        assert_eq!(
            to_status(LabError::MeasurementConflict("running".into())).code(),
            Code::FailedPrecondition
        );
    }

    #[test]
    fn data_errors_distinguish_missing_from_malformed() {
        assert_eq!(
            to_status(LabError::PathUnknown("/x".into())).code(),
            Code::NotFound
        );
        assert_eq!(
            to_status(LabError::InvalidSlice("step".into())).code(),
            Code::InvalidArgument
        );
    }

    #[test]
    fn status_message_carries_the_domain_text() {
        let status = to_status(LabError::DeviceExists("probe".into()));
        assert!(status.message().contains("probe"));
    }
}
