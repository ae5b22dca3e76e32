//! Typed gateways over the generated service stubs.
//!
//! Both gateways pin the server's resource id on first connect. Calls go
//! through a recovery layer: when the transport drops mid-call the
//! gateway consults its [`ReconnectPolicy`], re-dials from the recorded
//! address, verifies the new server reports the same resource id, and
//! re-issues the call. A different resource id aborts recovery with
//! [`GatewayError::IdentityMismatch`]; server-side statuses are never
//! retried.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tonic::transport::Channel;
use tonic::Status;
use tracing::{debug, info, warn};

use lab_core::{Sample, SliceArg};
use lab_proto::lab::data_service_client::DataServiceClient;
use lab_proto::lab::instrument_service_client::InstrumentServiceClient;
use lab_proto::lab::{
    AddDeviceRequest, AppendRequest, DeviceInfo, GetDataRequest, ListDevicesRequest,
    MeasureRequest, MeasurementStateRequest, MeasurementStatus, ReadDeviceRequest,
    RemoveDeviceRequest, RestartDeviceRequest, ServerInfoRequest, ServerInfoResponse,
    StartMeasurementRequest, StopMeasurementRequest,
};

use crate::connection::ServerAddress;
use crate::error::{GatewayError, GatewayResult};
use crate::reconnect::{AutoReconnect, ChannelFactory, ConnectConfig, ReconnectPolicy};

/// Parameters of an [`InstrumentGateway::measure`] request.
#[derive(Debug, Clone, Default)]
pub struct MeasureSpec {
    /// Measurement name; the server generates one when unset.
    pub name: Option<String>,
    /// Devices to poll; all registered devices when empty.
    pub include: Vec<String>,
    /// Devices to leave out.
    pub exclude: Vec<String>,
    /// Polling cadence; server default when unset.
    pub interval: Option<Duration>,
}

/// Session state, constructors and the recovery layer are identical for
/// both gateways apart from the generated client type; this expands them
/// once per gateway.
macro_rules! gateway_common {
    ($gateway:ident, $inner:ident, $state:ident, $client:ident) => {
        struct $state {
            client: Option<$client<Channel>>,
            resource_id: Option<String>,
        }

        struct $inner {
            factory: ChannelFactory,
            policy: Arc<dyn ReconnectPolicy>,
            state: Mutex<$state>,
        }

        impl $gateway {
            /// A gateway with default connect and recovery behavior.
            pub fn new(addr: ServerAddress) -> Self {
                Self::with_config(
                    addr,
                    ConnectConfig::default(),
                    Arc::new(AutoReconnect::default()),
                )
            }

            /// A gateway with explicit connect retries and recovery policy.
            pub fn with_config(
                addr: ServerAddress,
                config: ConnectConfig,
                policy: Arc<dyn ReconnectPolicy>,
            ) -> Self {
                $gateway {
                    inner: Arc::new($inner {
                        factory: ChannelFactory::new(addr, config),
                        policy,
                        state: Mutex::new($state {
                            client: None,
                            resource_id: None,
                        }),
                    }),
                }
            }

            /// The address this gateway dials.
            pub fn addr(&self) -> &ServerAddress {
                self.inner.factory.addr()
            }

            /// The resource id pinned at first connect, if any.
            pub async fn resource_id(&self) -> Option<String> {
                self.inner.state.lock().await.resource_id.clone()
            }

            /// Establish the session. Dial attempts are paced at a fixed
            /// interval within the configured budget; on the first
            /// success the server's resource id is pinned, and every
            /// later connect must see the same id. Connecting while
            /// connected is a no-op.
            pub async fn connect(&self) -> GatewayResult<()> {
                let mut state = self.inner.state.lock().await;
                if state.client.is_some() {
                    debug!(addr = %self.addr(), "connect ignored, already connected");
                    return Ok(());
                }
                let channel = self.inner.factory.connect().await?;
                let mut client = $client::new(channel);
                let info = client.server_info(ServerInfoRequest {}).await?.into_inner();
                match &state.resource_id {
                    Some(expected) if *expected != info.resource_id => {
                        return Err(GatewayError::IdentityMismatch {
                            expected: expected.clone(),
                            found: info.resource_id,
                        });
                    }
                    Some(_) => {}
                    None => {
                        info!(
                            addr = %self.addr(),
                            resource = %info.resource_id,
                            "session established"
                        );
                        state.resource_id = Some(info.resource_id);
                    }
                }
                state.client = Some(client);
                Ok(())
            }

            /// End the session. Idempotent. The pinned resource id stays,
            /// so a later connect still verifies identity.
            pub async fn disconnect(&self) {
                let mut state = self.inner.state.lock().await;
                if state.client.take().is_some() {
                    debug!(addr = %self.addr(), "disconnected");
                }
            }

            /// Drop the session and establish a new one, verifying the
            /// server still serves the same resource.
            pub async fn reconnect(&self) -> GatewayResult<()> {
                self.disconnect().await;
                self.connect().await
            }

            /// Live connectivity probe: a `ServerInfo` round trip, not
            /// cached state.
            pub async fn connected(&self) -> bool {
                let client = self.inner.state.lock().await.client.clone();
                match client {
                    Some(mut client) => client.server_info(ServerInfoRequest {}).await.is_ok(),
                    None => false,
                }
            }

            /// Connect, run `f` on a clone of the gateway, and disconnect
            /// whether or not `f` succeeded.
            pub async fn with_connection<T, Fut>(
                &self,
                f: impl FnOnce(Self) -> Fut,
            ) -> GatewayResult<T>
            where
                Fut: Future<Output = GatewayResult<T>>,
            {
                self.connect().await?;
                let result = f(self.clone()).await;
                self.disconnect().await;
                result
            }

            async fn current_client(&self) -> GatewayResult<$client<Channel>> {
                self.inner
                    .state
                    .lock()
                    .await
                    .client
                    .clone()
                    .ok_or(GatewayError::NotConnected)
            }

            /// Issue `op`, recovering from transport loss per the policy.
            async fn call<T, Fut>(
                &self,
                op: impl Fn($client<Channel>) -> Fut,
            ) -> GatewayResult<T>
            where
                Fut: Future<Output = Result<tonic::Response<T>, Status>>,
            {
                let client = self.current_client().await?;
                match op(client).await {
                    Ok(response) => Ok(response.into_inner()),
                    Err(status) => {
                        let err = GatewayError::Rpc(status);
                        if !err.is_transport_lost() {
                            return Err(err);
                        }
                        self.recover(err, op).await
                    }
                }
            }

            /// Reconnect-and-retry loop entered after a transport loss.
            async fn recover<T, Fut>(
                &self,
                cause: GatewayError,
                op: impl Fn($client<Channel>) -> Fut,
            ) -> GatewayResult<T>
            where
                Fut: Future<Output = Result<tonic::Response<T>, Status>>,
            {
                warn!(addr = %self.addr(), %cause, "connection lost mid-call, attempting recovery");
                self.disconnect().await;
                let mut attempt: u32 = 0;
                loop {
                    attempt += 1;
                    if !self.inner.policy.should_reconnect(attempt, &cause).await {
                        return Err(GatewayError::ConnectionLost(cause.to_string()));
                    }
                    match self.reconnect().await {
                        Ok(()) => {}
                        Err(err @ GatewayError::IdentityMismatch { .. }) => return Err(err),
                        Err(err) => {
                            debug!(attempt, %err, "reconnect attempt failed");
                            continue;
                        }
                    }
                    let client = self.current_client().await?;
                    match op(client).await {
                        Ok(response) => {
                            info!(addr = %self.addr(), attempt, "call recovered after reconnect");
                            return Ok(response.into_inner());
                        }
                        Err(status) => {
                            let err = GatewayError::Rpc(status);
                            if !err.is_transport_lost() {
                                return Err(err);
                            }
                            debug!(attempt, %err, "retried call lost the transport again");
                        }
                    }
                }
            }
        }
    };
}

/// Gateway to the instrument service: device registry and measurements.
#[derive(Clone)]
pub struct InstrumentGateway {
    inner: Arc<InstrumentInner>,
}

gateway_common!(
    InstrumentGateway,
    InstrumentInner,
    InstrumentState,
    InstrumentServiceClient
);

impl InstrumentGateway {
    /// Server identity and version.
    pub async fn server_info(&self) -> GatewayResult<ServerInfoResponse> {
        self.call(|mut c| async move { c.server_info(ServerInfoRequest {}).await })
            .await
    }

    /// Register a device on the server.
    pub async fn add_device(
        &self,
        name: &str,
        driver_type: &str,
        config: &serde_json::Value,
    ) -> GatewayResult<()> {
        let request = AddDeviceRequest {
            name: name.to_string(),
            driver_type: driver_type.to_string(),
            config_json: if config.is_null() {
                String::new()
            } else {
                config.to_string()
            },
        };
        self.call(move |mut c| {
            let request = request.clone();
            async move { c.add_device(request).await }
        })
        .await?;
        Ok(())
    }

    /// Remove a device from the server.
    pub async fn remove_device(&self, name: &str) -> GatewayResult<()> {
        let request = RemoveDeviceRequest {
            name: name.to_string(),
        };
        self.call(move |mut c| {
            let request = request.clone();
            async move { c.remove_device(request).await }
        })
        .await?;
        Ok(())
    }

    /// Tear a device down and rebuild it from its stored spec.
    pub async fn restart_device(&self, name: &str) -> GatewayResult<()> {
        let request = RestartDeviceRequest {
            name: name.to_string(),
        };
        self.call(move |mut c| {
            let request = request.clone();
            async move { c.restart_device(request).await }
        })
        .await?;
        Ok(())
    }

    /// All registered devices.
    pub async fn list_devices(&self) -> GatewayResult<Vec<DeviceInfo>> {
        let response = self
            .call(|mut c| async move { c.list_devices(ListDevicesRequest {}).await })
            .await?;
        Ok(response.devices)
    }

    /// Poll one device immediately.
    pub async fn read_device(&self, name: &str) -> GatewayResult<Sample> {
        let request = ReadDeviceRequest {
            name: name.to_string(),
        };
        let response = self
            .call(move |mut c| {
                let request = request.clone();
                async move { c.read_device(request).await }
            })
            .await?;
        response
            .sample
            .map(Sample::from)
            .ok_or_else(|| GatewayError::MalformedResponse("read response lacks a sample".into()))
    }

    /// Request a measurement over a device set.
    pub async fn measure(&self, spec: MeasureSpec) -> GatewayResult<MeasurementStatus> {
        let request = MeasureRequest {
            name: spec.name,
            include: spec.include,
            exclude: spec.exclude,
            interval_ms: spec.interval.map(|d| d.as_millis() as u64),
        };
        self.call(move |mut c| {
            let request = request.clone();
            async move { c.measure(request).await }
        })
        .await
    }

    /// Status of the server's current measurement.
    pub async fn measurement_state(&self) -> GatewayResult<MeasurementStatus> {
        self.call(|mut c| async move { c.measurement_state(MeasurementStateRequest {}).await })
            .await
    }

    /// Start a measurement by name; `Ok(true)` when it was already
    /// running.
    pub async fn start_measurement(&self, name: &str) -> GatewayResult<bool> {
        let request = StartMeasurementRequest {
            name: name.to_string(),
        };
        let response = self
            .call(move |mut c| {
                let request = request.clone();
                async move { c.start_measurement(request).await }
            })
            .await?;
        Ok(response.already_running)
    }

    /// Stop a measurement by name; `Ok(true)` when it was running.
    pub async fn stop_measurement(&self, name: &str) -> GatewayResult<bool> {
        let request = StopMeasurementRequest {
            name: name.to_string(),
        };
        let response = self
            .call(move |mut c| {
                let request = request.clone();
                async move { c.stop_measurement(request).await }
            })
            .await?;
        Ok(response.was_running)
    }
}

/// Gateway to the data service: append to and read from the shared store.
#[derive(Clone)]
pub struct DataGateway {
    inner: Arc<DataInner>,
}

gateway_common!(DataGateway, DataInner, DataState, DataServiceClient);

impl DataGateway {
    /// Server identity and version.
    pub async fn server_info(&self) -> GatewayResult<ServerInfoResponse> {
        self.call(|mut c| async move { c.server_info(ServerInfoRequest {}).await })
            .await
    }

    /// The store's backing file path, as reported by the server.
    pub async fn filename(&self) -> GatewayResult<String> {
        Ok(self.server_info().await?.resource_id)
    }

    /// Append one record under `path`, returning its dense index.
    pub async fn append(
        &self,
        path: &str,
        sample: Sample,
        attrs: &BTreeMap<String, String>,
    ) -> GatewayResult<u64> {
        let request = AppendRequest {
            path: path.to_string(),
            sample: Some(sample.into()),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let response = self
            .call(move |mut c| {
                let request = request.clone();
                async move { c.append(request).await }
            })
            .await?;
        Ok(response.index)
    }

    /// Records under `path`, optionally sliced.
    pub async fn get_data(&self, path: &str, slice: SliceArg) -> GatewayResult<Vec<Sample>> {
        let request = GetDataRequest {
            path: path.to_string(),
            slice: Some(slice.into()),
            field: None,
        };
        let response = self
            .call(move |mut c| {
                let request = request.clone();
                async move { c.get_data(request).await }
            })
            .await?;
        Ok(response.samples.into_iter().map(Sample::from).collect())
    }

    /// One field's values under `path`, optionally sliced.
    pub async fn get_field(
        &self,
        path: &str,
        field: &str,
        slice: SliceArg,
    ) -> GatewayResult<Vec<f64>> {
        let request = GetDataRequest {
            path: path.to_string(),
            slice: Some(slice.into()),
            field: Some(field.to_string()),
        };
        let response = self
            .call(move |mut c| {
                let request = request.clone();
                async move { c.get_data(request).await }
            })
            .await?;
        Ok(response.values)
    }
}
