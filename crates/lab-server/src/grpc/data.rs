//! The `DataService` implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use lab_core::{Sample, SliceArg};
use lab_proto::lab::data_service_server::DataService;
use lab_proto::lab::{
    AppendRequest, AppendResponse, GetDataRequest, GetDataResponse, ServerInfoRequest,
    ServerInfoResponse,
};
use lab_storage::JsonlStore;

use crate::grpc::error_mapping::LabResultExt;

/// gRPC facade over the append-only store.
pub struct DataSvc {
    store: Arc<JsonlStore>,
}

impl DataSvc {
    /// A service delegating to the given store.
    pub fn new(store: Arc<JsonlStore>) -> Self {
        DataSvc { store }
    }
}

#[tonic::async_trait]
impl DataService for DataSvc {
    async fn server_info(
        &self,
        _request: Request<ServerInfoRequest>,
    ) -> Result<Response<ServerInfoResponse>, Status> {
        Ok(Response::new(ServerInfoResponse {
            resource_id: self.store.filename(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }

    async fn append(
        &self,
        request: Request<AppendRequest>,
    ) -> Result<Response<AppendResponse>, Status> {
        let request = request.into_inner();
        // Materialize the payload as an owned record before touching the
        // store's writer lock.
        let sample: Sample = request
            .sample
            .ok_or_else(|| Status::invalid_argument("append requires a sample"))?
            .into();
        let attrs: BTreeMap<String, String> = request.attrs.into_iter().collect();
        let index = self
            .store
            .append(&request.path, sample, &attrs)
            .await
            .map_lab_err()?;
        Ok(Response::new(AppendResponse { index }))
    }

    async fn get_data(
        &self,
        request: Request<GetDataRequest>,
    ) -> Result<Response<GetDataResponse>, Status> {
        let request = request.into_inner();
        let slice = request.slice.map(SliceArg::from).unwrap_or_default();
        match request.field {
            Some(field) => {
                let values = self
                    .store
                    .get_field(&request.path, &field, slice)
                    .await
                    .map_lab_err()?;
                Ok(Response::new(GetDataResponse {
                    samples: vec![],
                    values,
                }))
            }
            None => {
                let samples = self
                    .store
                    .get_data(&request.path, slice)
                    .await
                    .map_lab_err()?;
                Ok(Response::new(GetDataResponse {
                    samples: samples.into_iter().map(Into::into).collect(),
                    values: vec![],
                }))
            }
        }
    }
}
