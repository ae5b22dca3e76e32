//! Background polling loops.
//!
//! A [`Measurement`] polls a fixed device set at a fixed cadence and
//! appends one [`Sample`] per device per tick under
//! `/measurement/<name>/<device>`. The loop is an explicit task with a
//! watch-channel cancellation token; [`Measurement::stop`] signals it and
//! joins, so an in-progress tick finishes its appends first.
//! [`Measurements`] enforces that at most one user measurement exists,
//! and [`StatusMeasurement`] runs the same mechanics continuously over
//! whatever is registered, writing under `/status/<device>`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use lab_core::{now_ns, LabError, LabResult, Sample};
use lab_storage::JsonlStore;

use crate::registry::DeviceRegistry;

/// Observable state of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Prepared but not polling.
    Idle,
    /// The polling task is live.
    Running,
}

struct LoopHandle {
    cancel: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl LoopHandle {
    fn new() -> Self {
        LoopHandle {
            cancel: None,
            task: None,
        }
    }
}

/// A named measurement over a fixed, sorted device set.
pub struct Measurement {
    name: String,
    devices: Vec<String>,
    interval: Duration,
    registry: Arc<DeviceRegistry>,
    store: Arc<JsonlStore>,
    ticks: Arc<AtomicU64>,
    handle: Mutex<LoopHandle>,
}

impl std::fmt::Debug for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Measurement")
            .field("name", &self.name)
            .field("devices", &self.devices)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Measurement {
    pub(crate) fn new(
        name: String,
        devices: Vec<String>,
        interval: Duration,
        registry: Arc<DeviceRegistry>,
        store: Arc<JsonlStore>,
    ) -> Self {
        Measurement {
            name,
            devices,
            interval,
            registry,
            store,
            ticks: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(LoopHandle::new()),
        }
    }

    /// The measurement's name, e.g. `m000003`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The devices this measurement polls, sorted.
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Completed ticks so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Whether the polling task is currently live.
    pub async fn state(&self) -> LoopState {
        if self.handle.lock().await.cancel.is_some() {
            LoopState::Running
        } else {
            LoopState::Idle
        }
    }

    /// Spawn the polling task. Starting a running measurement is a
    /// warn-level no-op; returns whether the task was actually started.
    pub async fn start(&self) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.cancel.is_some() {
            warn!(measurement = %self.name, "start ignored, already running");
            return false;
        }
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(
            self.name.clone(),
            self.devices.clone(),
            format!("/measurement/{}", self.name),
            self.interval,
            self.registry.clone(),
            self.store.clone(),
            self.ticks.clone(),
            rx,
        ));
        handle.cancel = Some(tx);
        handle.task = Some(task);
        info!(
            measurement = %self.name,
            devices = ?self.devices,
            interval_ms = self.interval.as_millis() as u64,
            "measurement started"
        );
        true
    }

    /// Signal the polling task and join it.
    ///
    /// An in-progress tick completes its appends before the task exits.
    /// Stopping an idle measurement is a warn-level no-op; returns
    /// whether a live task was stopped.
    pub async fn stop(&self) -> bool {
        let mut handle = self.handle.lock().await;
        let Some(cancel) = handle.cancel.take() else {
            warn!(measurement = %self.name, "stop ignored, not running");
            return false;
        };
        let _ = cancel.send(true);
        if let Some(task) = handle.task.take() {
            if let Err(err) = task.await {
                warn!(measurement = %self.name, %err, "polling task panicked");
            }
        }
        info!(measurement = %self.name, ticks = self.ticks(), "measurement stopped");
        true
    }
}

/// Poll every device once per tick, appending under `prefix/<device>`.
///
/// Cancellation is only observed between ticks, so no append is ever cut
/// short. A failing device read skips that device for the tick.
#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    name: String,
    devices: Vec<String>,
    prefix: String,
    interval: Duration,
    registry: Arc<DeviceRegistry>,
    store: Arc<JsonlStore>,
    ticks: Arc<AtomicU64>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick: u64 = ticks.load(Ordering::Relaxed);
    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = cancel.changed() => break,
        }
        for device in &devices {
            match registry.read(device).await {
                Ok(fields) => {
                    let sample = Sample {
                        timestamp_ns: now_ns(),
                        tick,
                        fields,
                    };
                    let path = format!("{prefix}/{device}");
                    if let Err(err) = store.append(&path, sample, &BTreeMap::new()).await {
                        warn!(measurement = %name, device = %device, %err, "append failed");
                    }
                }
                Err(err) => {
                    warn!(measurement = %name, device = %device, %err, "device read failed")
                }
            }
        }
        tick += 1;
        ticks.store(tick, Ordering::Relaxed);
    }
    debug!(measurement = %name, ticks = tick, "polling loop exited");
}

/// Holder of the at-most-one user measurement.
pub struct Measurements {
    registry: Arc<DeviceRegistry>,
    store: Arc<JsonlStore>,
    default_interval: Duration,
    current: Mutex<Option<Arc<Measurement>>>,
}

impl Measurements {
    /// A holder with no measurement prepared.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        store: Arc<JsonlStore>,
        default_interval: Duration,
    ) -> Self {
        Measurements {
            registry,
            store,
            default_interval,
            current: Mutex::new(None),
        }
    }

    /// Request a measurement over the resolved device set.
    ///
    /// Returns the existing measurement when the device set matches and
    /// the requested name is unset or equal. A differing request is a
    /// conflict while the current one runs, and replaces it while idle.
    pub async fn measure(
        &self,
        name: Option<String>,
        include: Vec<String>,
        exclude: Vec<String>,
        interval: Option<Duration>,
    ) -> LabResult<Arc<Measurement>> {
        let all = self.registry.names().await;
        let mut devices = if include.is_empty() { all.clone() } else { include };
        for device in &devices {
            if !all.contains(device) {
                return Err(LabError::DeviceUnknown(device.clone()));
            }
        }
        devices.retain(|d| !exclude.contains(d));
        devices.sort();
        devices.dedup();
        if devices.is_empty() {
            return Err(LabError::MeasurementConflict(
                "no devices left to measure".into(),
            ));
        }

        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            let same_set = existing.devices() == devices.as_slice();
            let same_name = name.as_deref().map_or(true, |n| n == existing.name());
            if same_set && same_name {
                debug!(measurement = %existing.name(), "reusing existing measurement");
                return Ok(existing.clone());
            }
            if existing.state().await == LoopState::Running {
                return Err(LabError::MeasurementConflict(format!(
                    "measurement '{}' is running",
                    existing.name()
                )));
            }
        }

        let name = match name {
            Some(name) => name,
            None => self.next_name().await?,
        };
        let measurement = Arc::new(Measurement::new(
            name,
            devices,
            interval.unwrap_or(self.default_interval),
            self.registry.clone(),
            self.store.clone(),
        ));
        *current = Some(measurement.clone());
        Ok(measurement)
    }

    /// The currently held measurement, if any.
    pub async fn current(&self) -> Option<Arc<Measurement>> {
        self.current.lock().await.clone()
    }

    /// The held measurement, which must carry the given name.
    pub async fn named(&self, name: &str) -> LabResult<Arc<Measurement>> {
        self.current
            .lock()
            .await
            .as_ref()
            .filter(|m| m.name() == name)
            .cloned()
            .ok_or_else(|| LabError::MeasurementUnknown(name.to_string()))
    }

    /// Stop the held measurement if it is running. Used at shutdown.
    pub async fn stop_current(&self) {
        if let Some(measurement) = self.current().await {
            if measurement.state().await == LoopState::Running {
                measurement.stop().await;
            }
        }
    }

    /// Next auto-generated name, `m000000`-style. The counter lives in
    /// the store's `/measurement` attributes so numbering survives
    /// daemon restarts.
    async fn next_name(&self) -> LabResult<String> {
        let attrs = self.store.attrs("/measurement").await?;
        let next: u64 = attrs
            .get("next_index")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut update = BTreeMap::new();
        update.insert("next_index".to_string(), (next + 1).to_string());
        self.store.set_attrs("/measurement", update).await?;
        Ok(format!("m{next:06}"))
    }
}

/// Continuous low-cadence poll of every registered device.
///
/// Writes under `/status/<device>`, re-resolving the device set each
/// tick so added and removed devices are picked up automatically. Not
/// subject to the one-user-measurement rule.
pub struct StatusMeasurement {
    interval: Duration,
    registry: Arc<DeviceRegistry>,
    store: Arc<JsonlStore>,
    ticks: Arc<AtomicU64>,
    handle: Mutex<LoopHandle>,
}

impl StatusMeasurement {
    /// A status loop over the given registry.
    pub fn new(registry: Arc<DeviceRegistry>, store: Arc<JsonlStore>, interval: Duration) -> Self {
        StatusMeasurement {
            interval,
            registry,
            store,
            ticks: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(LoopHandle::new()),
        }
    }

    /// Completed status ticks so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Spawn the status task; a no-op when already running.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.cancel.is_some() {
            warn!("status loop already running");
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        let registry = self.registry.clone();
        let store = self.store.clone();
        let ticks = self.ticks.clone();
        let interval = self.interval;
        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = timer.tick() => {}
                    _ = rx.changed() => break,
                }
                for device in registry.names().await {
                    match registry.read(&device).await {
                        Ok(fields) => {
                            let sample = Sample {
                                timestamp_ns: now_ns(),
                                tick,
                                fields,
                            };
                            let path = format!("/status/{device}");
                            if let Err(err) = store.append(&path, sample, &BTreeMap::new()).await {
                                warn!(device = %device, %err, "status append failed");
                            }
                        }
                        Err(err) => debug!(device = %device, %err, "status read failed"),
                    }
                }
                tick += 1;
                ticks.store(tick, Ordering::Relaxed);
            }
            debug!(ticks = tick, "status loop exited");
        });
        handle.cancel = Some(tx);
        handle.task = Some(task);
        info!(interval_ms = self.interval.as_millis() as u64, "status loop started");
    }

    /// Signal the status task and join it; a no-op when idle.
    pub async fn stop(&self) {
        let mut handle = self.handle.lock().await;
        let Some(cancel) = handle.cancel.take() else {
            return;
        };
        let _ = cancel.send(true);
        if let Some(task) = handle.task.take() {
            if let Err(err) = task.await {
                warn!(%err, "status task panicked");
            }
        }
        info!(ticks = self.ticks(), "status loop stopped");
    }
}
