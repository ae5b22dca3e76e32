//! The `InstrumentService` implementation.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};
use tracing::debug;

use lab_core::DeviceSpec;
use lab_proto::lab::instrument_service_server::InstrumentService;
use lab_proto::lab::{
    AddDeviceRequest, AddDeviceResponse, DeviceInfo, ListDevicesRequest, ListDevicesResponse,
    MeasureRequest, MeasurementStateRequest, MeasurementStatus, ReadDeviceRequest,
    ReadDeviceResponse, RemoveDeviceRequest, RemoveDeviceResponse, RestartDeviceRequest,
    RestartDeviceResponse, ServerInfoRequest, ServerInfoResponse, StartMeasurementRequest,
    StartMeasurementResponse, StopMeasurementRequest, StopMeasurementResponse,
};
use lab_storage::JsonlStore;

use crate::grpc::error_mapping::LabResultExt;
use crate::measurement::{LoopState, Measurement, Measurements};
use crate::registry::DeviceRegistry;

/// gRPC facade over the registry and the measurement holder.
pub struct InstrumentSvc {
    registry: Arc<DeviceRegistry>,
    measurements: Arc<Measurements>,
    store: Arc<JsonlStore>,
}

impl InstrumentSvc {
    /// A service delegating to the given registry and measurement holder.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        measurements: Arc<Measurements>,
        store: Arc<JsonlStore>,
    ) -> Self {
        InstrumentSvc {
            registry,
            measurements,
            store,
        }
    }
}

fn parse_config(config_json: &str) -> Result<serde_json::Value, Status> {
    if config_json.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(config_json)
        .map_err(|err| Status::invalid_argument(format!("config is not valid JSON: {err}")))
}

async fn status_of(measurement: &Measurement) -> MeasurementStatus {
    MeasurementStatus {
        name: measurement.name().to_string(),
        devices: measurement.devices().to_vec(),
        running: measurement.state().await == LoopState::Running,
        ticks: measurement.ticks(),
    }
}

#[tonic::async_trait]
impl InstrumentService for InstrumentSvc {
    async fn server_info(
        &self,
        _request: Request<ServerInfoRequest>,
    ) -> Result<Response<ServerInfoResponse>, Status> {
        Ok(Response::new(ServerInfoResponse {
            resource_id: self.store.filename(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }

    async fn add_device(
        &self,
        request: Request<AddDeviceRequest>,
    ) -> Result<Response<AddDeviceResponse>, Status> {
        let request = request.into_inner();
        let config = parse_config(&request.config_json)?;
        let spec = DeviceSpec {
            name: request.name,
            driver_type: request.driver_type,
            config,
        };
        self.registry.add(spec).await.map_lab_err()?;
        Ok(Response::new(AddDeviceResponse {}))
    }

    async fn remove_device(
        &self,
        request: Request<RemoveDeviceRequest>,
    ) -> Result<Response<RemoveDeviceResponse>, Status> {
        let request = request.into_inner();
        self.registry.remove(&request.name).await.map_lab_err()?;
        Ok(Response::new(RemoveDeviceResponse {}))
    }

    async fn restart_device(
        &self,
        request: Request<RestartDeviceRequest>,
    ) -> Result<Response<RestartDeviceResponse>, Status> {
        let request = request.into_inner();
        self.registry.restart(&request.name).await.map_lab_err()?;
        Ok(Response::new(RestartDeviceResponse {}))
    }

    async fn list_devices(
        &self,
        _request: Request<ListDevicesRequest>,
    ) -> Result<Response<ListDevicesResponse>, Status> {
        let devices = self
            .registry
            .list()
            .await
            .into_iter()
            .map(|spec| DeviceInfo {
                name: spec.name,
                driver_type: spec.driver_type,
                config_json: if spec.config.is_null() {
                    String::new()
                } else {
                    spec.config.to_string()
                },
            })
            .collect();
        Ok(Response::new(ListDevicesResponse { devices }))
    }

    async fn read_device(
        &self,
        request: Request<ReadDeviceRequest>,
    ) -> Result<Response<ReadDeviceResponse>, Status> {
        let request = request.into_inner();
        let fields = self.registry.read(&request.name).await.map_lab_err()?;
        let sample = lab_core::Sample {
            timestamp_ns: lab_core::now_ns(),
            tick: 0,
            fields,
        };
        Ok(Response::new(ReadDeviceResponse {
            sample: Some(sample.into()),
        }))
    }

    async fn measure(
        &self,
        request: Request<MeasureRequest>,
    ) -> Result<Response<MeasurementStatus>, Status> {
        let request = request.into_inner();
        debug!(name = ?request.name, include = ?request.include, "measure requested");
        let measurement = self
            .measurements
            .measure(
                request.name,
                request.include,
                request.exclude,
                request.interval_ms.map(Duration::from_millis),
            )
            .await
            .map_lab_err()?;
        Ok(Response::new(status_of(&measurement).await))
    }

    async fn measurement_state(
        &self,
        _request: Request<MeasurementStateRequest>,
    ) -> Result<Response<MeasurementStatus>, Status> {
        match self.measurements.current().await {
            Some(measurement) => Ok(Response::new(status_of(&measurement).await)),
            None => Err(Status::not_found("no measurement prepared")),
        }
    }

    async fn start_measurement(
        &self,
        request: Request<StartMeasurementRequest>,
    ) -> Result<Response<StartMeasurementResponse>, Status> {
        let request = request.into_inner();
        let measurement = self.measurements.named(&request.name).await.map_lab_err()?;
        let started = measurement.start().await;
        Ok(Response::new(StartMeasurementResponse {
            already_running: !started,
        }))
    }

    async fn stop_measurement(
        &self,
        request: Request<StopMeasurementRequest>,
    ) -> Result<Response<StopMeasurementResponse>, Status> {
        let request = request.into_inner();
        let measurement = self.measurements.named(&request.name).await.map_lab_err()?;
        let was_running = measurement.stop().await;
        Ok(Response::new(StopMeasurementResponse { was_running }))
    }
}

#[cfg(test)]
mod tests {
    use lab_drivers::driver_registry;
    use tempfile::tempdir;
    use tonic::Code;

    use super::*;

    fn svc(dir: &tempfile::TempDir) -> InstrumentSvc {
        let store = Arc::new(JsonlStore::create(dir.path().join("data.jsonl")).unwrap());
        let registry = Arc::new(DeviceRegistry::new(driver_registry()));
        let measurements = Arc::new(Measurements::new(
            registry.clone(),
            store.clone(),
            Duration::from_millis(10),
        ));
        InstrumentSvc::new(registry, measurements, store)
    }

    #[tokio::test]
    async fn add_list_remove_lifecycle() {
        let dir = tempdir().unwrap();
        let svc = svc(&dir);

        svc.add_device(Request::new(AddDeviceRequest {
            name: "probe".into(),
            driver_type: "mock_thermometer".into(),
            config_json: r#"{"base": 4.2}"#.into(),
        }))
        .await
        .unwrap();

        let listed = svc
            .list_devices(Request::new(ListDevicesRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(listed.devices.len(), 1);
        assert_eq!(listed.devices[0].name, "probe");

        let read = svc
            .read_device(Request::new(ReadDeviceRequest {
                name: "probe".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(read.sample.unwrap().fields.contains_key("temperature"));

        svc.remove_device(Request::new(RemoveDeviceRequest {
            name: "probe".into(),
        }))
        .await
        .unwrap();

        let err = svc
            .read_device(Request::new(ReadDeviceRequest {
                name: "probe".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn duplicate_add_surfaces_already_exists() {
        let dir = tempdir().unwrap();
        let svc = svc(&dir);
        let request = AddDeviceRequest {
            name: "probe".into(),
            driver_type: "mock_thermometer".into(),
            config_json: String::new(),
        };
        svc.add_device(Request::new(request.clone())).await.unwrap();
        let err = svc.add_device(Request::new(request)).await.unwrap_err();
        assert_eq!(err.code(), Code::AlreadyExists);
    }

    #[tokio::test]
    async fn malformed_config_is_invalid_argument() {
        let dir = tempdir().unwrap();
        let svc = svc(&dir);
        let err = svc
            .add_device(Request::new(AddDeviceRequest {
                name: "probe".into(),
                driver_type: "mock_thermometer".into(),
                config_json: "{not json".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn measure_start_stop_over_the_service() {
        let dir = tempdir().unwrap();
        let svc = svc(&dir);
        svc.add_device(Request::new(AddDeviceRequest {
            name: "probe".into(),
            driver_type: "mock_thermometer".into(),
            config_json: String::new(),
        }))
        .await
        .unwrap();

        let status = svc
            .measure(Request::new(MeasureRequest {
                name: None,
                include: vec![],
                exclude: vec![],
                interval_ms: Some(10),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(status.name, "m000000");
        assert!(!status.running);

        svc.start_measurement(Request::new(StartMeasurementRequest {
            name: status.name.clone(),
        }))
        .await
        .unwrap();

        let state = svc
            .measurement_state(Request::new(MeasurementStateRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert!(state.running);

        let stopped = svc
            .stop_measurement(Request::new(StopMeasurementRequest {
                name: status.name,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(stopped.was_running);
    }

    #[tokio::test]
    async fn start_with_a_stale_name_is_not_found() {
        let dir = tempdir().unwrap();
        let svc = svc(&dir);
        let err = svc
            .start_measurement(Request::new(StartMeasurementRequest {
                name: "m999999".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }
}
