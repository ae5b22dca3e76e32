//! Generated wire types for the lab-control network.
//!
//! The `lab` module is produced by `tonic-build` from `proto/lab.proto`;
//! [`convert`] bridges the generated messages and the shared types in
//! `lab-core`.

/// Generated prost/tonic types for the `lab` protobuf package.
pub mod lab {
    #![allow(clippy::all)]
    tonic::include_proto!("lab");
}

pub mod convert;
