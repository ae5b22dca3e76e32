//! Server lifecycle: listeners, the status loop, and ordered shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{info, warn};

use lab_proto::lab::data_service_server::DataServiceServer;
use lab_proto::lab::instrument_service_server::InstrumentServiceServer;
use lab_storage::JsonlStore;

use lab_core::LabResult;

use crate::config::ServerConfig;
use crate::grpc::{DataSvc, InstrumentSvc};
use crate::measurement::{Measurements, StatusMeasurement};
use crate::registry::DeviceRegistry;

struct Listener {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

struct Running {
    instrument: Listener,
    data: Listener,
}

/// The instrument server: registry, data store, measurement loops and
/// both gRPC listeners under one start/stop pair.
///
/// Startup order is instrument listener, data listener, status loop, so
/// a reachable server always has live data paths behind it; shutdown
/// reverses it and also stops any running user measurement first. Both
/// operations are idempotent.
pub struct InstrumentServer {
    config: ServerConfig,
    registry: Arc<DeviceRegistry>,
    store: Arc<JsonlStore>,
    measurements: Arc<Measurements>,
    status: StatusMeasurement,
    running: Mutex<Option<Running>>,
}

impl InstrumentServer {
    /// Assemble a server around an existing registry and store.
    pub fn new(config: ServerConfig, registry: Arc<DeviceRegistry>, store: Arc<JsonlStore>) -> Self {
        let measurements = Arc::new(Measurements::new(
            registry.clone(),
            store.clone(),
            config.measure_interval(),
        ));
        let status = StatusMeasurement::new(registry.clone(), store.clone(), config.status_interval());
        InstrumentServer {
            config,
            registry,
            store,
            measurements,
            status,
            running: Mutex::new(None),
        }
    }

    /// The registry this server exposes.
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// The measurement holder this server exposes.
    pub fn measurements(&self) -> Arc<Measurements> {
        self.measurements.clone()
    }

    /// Actual bound address of the instrument service, once started.
    /// With a port-zero config this is where the ephemeral port shows up.
    pub async fn instrument_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.instrument.addr)
    }

    /// Actual bound address of the data service, once started.
    pub async fn data_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.data.addr)
    }

    /// Bind both listeners and start the status loop.
    pub async fn start(&self) -> LabResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("start ignored, server already running");
            return Ok(());
        }

        let instrument = {
            let listener = TcpListener::bind(self.config.instrument_addr()?).await?;
            let addr = listener.local_addr()?;
            let (tx, rx) = oneshot::channel::<()>();
            let svc = InstrumentServiceServer::new(InstrumentSvc::new(
                self.registry.clone(),
                self.measurements.clone(),
                self.store.clone(),
            ));
            let task = tokio::spawn(async move {
                Server::builder()
                    .add_service(svc)
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                        let _ = rx.await;
                    })
                    .await
            });
            Listener {
                addr,
                shutdown: tx,
                task,
            }
        };

        let data = {
            let listener = TcpListener::bind(self.config.data_addr()?).await?;
            let addr = listener.local_addr()?;
            let (tx, rx) = oneshot::channel::<()>();
            let svc = DataServiceServer::new(DataSvc::new(self.store.clone()));
            let task = tokio::spawn(async move {
                Server::builder()
                    .add_service(svc)
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                        let _ = rx.await;
                    })
                    .await
            });
            Listener {
                addr,
                shutdown: tx,
                task,
            }
        };

        self.status.start().await;
        info!(
            instrument = %instrument.addr,
            data = %data.addr,
            file = %self.store.filename(),
            "instrument server up"
        );
        *running = Some(Running { instrument, data });
        Ok(())
    }

    /// Stop everything in reverse start order, joining each piece.
    pub async fn stop(&self) -> LabResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            warn!("stop ignored, server not running");
            return Ok(());
        };
        self.measurements.stop_current().await;
        self.status.stop().await;
        for listener in [running.data, running.instrument] {
            let _ = listener.shutdown.send(());
            match listener.task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(%err, "listener exited with error"),
                Err(err) => warn!(%err, "listener task panicked"),
            }
        }
        self.registry.close_all().await;
        info!("instrument server stopped");
        Ok(())
    }
}
