//! Shared types for the lab-control network.
//!
//! Everything the server, storage and client crates agree on lives here:
//! the error taxonomy, the [`Sample`] record type that flows over the wire
//! and into the data store, and the driver traits the instrument registry
//! builds devices through.

pub mod driver;
pub mod error;
pub mod sample;

pub use driver::{DeviceSpec, DriverFactory, InstrumentDriver};
pub use error::{LabError, LabResult};
pub use sample::{now_ns, Sample, SliceArg};
