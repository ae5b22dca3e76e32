//! gRPC service implementations.

pub mod data;
pub mod error_mapping;
pub mod instrument;

pub use data::DataSvc;
pub use instrument::InstrumentSvc;
