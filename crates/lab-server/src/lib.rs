//! Server side of the lab-control network.
//!
//! An [`InstrumentServer`](server::InstrumentServer) hosts the device
//! registry and the append-only data store behind two gRPC services,
//! runs the background status loop, and owns the at-most-one user
//! measurement.

pub mod config;
pub mod console;
pub mod grpc;
pub mod measurement;
pub mod registry;
pub mod server;

pub use config::ServerConfig;
pub use measurement::{LoopState, Measurement, Measurements, StatusMeasurement};
pub use registry::DeviceRegistry;
pub use server::InstrumentServer;
