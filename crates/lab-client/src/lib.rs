//! Client side of the lab-control network.
//!
//! [`InstrumentGateway`] and [`DataGateway`] wrap the generated service
//! stubs with explicit connect/disconnect/reconnect, fixed-interval
//! connect retries, and a recovery layer that re-dials after a transport
//! loss, verifies the server still serves the same data resource, and
//! re-issues the interrupted call.

pub mod connection;
pub mod error;
pub mod gateway;
pub mod reconnect;

pub use connection::{ServerAddress, DEFAULT_DATA_PORT, DEFAULT_INSTRUMENT_PORT};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{DataGateway, InstrumentGateway, MeasureSpec};
pub use reconnect::{AutoReconnect, ConnectConfig, NoReconnect, ReconnectPolicy};
