//! Incremental sync of remote channels into the local store.
//!
//! A run walks the configured devices one after another. For each device it
//! works out a window, fetches the diameter and sap flow channels side by
//! side, pairs the points by exact instant and merges them into the store
//! in bounded batches.
//!
//! # Windows
//!
//! - **Scheduled / manual**: from one minute past the newest stored reading,
//!   or `max(active_from, now - default_lookback)` for a device with no
//!   readings. Devices whose newest reading is younger than the freshness
//!   threshold are skipped without touching the remote API.
//! - **Backfill**: `[max(active_from, now - days), now]`, ignoring stored
//!   readings. Merges never erase values, so overlap is harmless.
//!
//! Only one run executes at a time. A run requested while another is in
//! progress is dropped, not queued.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sapwatch_core::RemoteDataClient;
use sapwatch_store::{NewReading, Store};
use sapwatch_types::{AggregationMode, ChannelKind, DataPoint, FetchResult, FetchWindow, SensorDevice};

/// Tuning for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Facility every plant is filed under.
    pub facility: String,
    /// Devices whose newest reading is younger than this are skipped.
    pub freshness: Duration,
    /// How far back the first sync of a device reaches.
    pub default_lookback: Duration,
    /// Scheduled runs skip devices whose range ended longer ago than this.
    pub stale_after: Duration,
    /// Readings per transaction.
    pub batch_size: usize,
    /// Backfill requests are clamped to this many days.
    pub max_backfill_days: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            facility: "Greenhouse".to_string(),
            freshness: Duration::minutes(5),
            default_lookback: Duration::days(7),
            stale_after: Duration::days(30),
            batch_size: 100,
            max_backfill_days: 365,
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunKind {
    /// Periodic tick.
    Scheduled,
    /// Out-of-band request.
    Manual,
    /// Historical reload over the last `days` days.
    Backfill { days: u32 },
}

impl RunKind {
    fn name(&self) -> &'static str {
        match self {
            RunKind::Scheduled => "scheduled",
            RunKind::Manual => "manual",
            RunKind::Backfill { .. } => "backfill",
        }
    }
}

/// How one device fared in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOutcome {
    /// The window was fetched and stored.
    Synced,
    /// The newest reading is recent enough.
    SkippedFresh,
    /// The device ended too long ago for a scheduled run.
    SkippedStale,
    /// The window is empty (device not yet active, or already ended).
    SkippedInactive,
    /// Nothing could be stored; see the error.
    Failed,
}

/// Per-device result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReport {
    pub code: String,
    pub outcome: DeviceOutcome,
    #[serde(with = "time::serde::rfc3339::option")]
    pub window_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub window_end: Option<OffsetDateTime>,
    pub diameter_points: usize,
    pub sap_flow_points: usize,
    pub readings_written: usize,
    /// Channels that failed while the other one succeeded.
    pub channel_errors: Vec<String>,
    pub error: Option<String>,
}

impl DeviceReport {
    fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            outcome: DeviceOutcome::Synced,
            window_start: None,
            window_end: None,
            diameter_points: 0,
            sap_flow_points: 0,
            readings_written: 0,
            channel_errors: Vec::new(),
            error: None,
        }
    }
}

/// Result of one run over every device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub kind: RunKind,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub devices: Vec<DeviceReport>,
}

impl SyncReport {
    /// Total readings merged across devices.
    pub fn readings_written(&self) -> usize {
        self.devices.iter().map(|d| d.readings_written).sum()
    }

    /// Number of devices that ended in [`DeviceOutcome::Failed`].
    pub fn failed_devices(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.outcome == DeviceOutcome::Failed)
            .count()
    }

    /// Report for one device.
    pub fn device(&self, code: &str) -> Option<&DeviceReport> {
        self.devices.iter().find(|d| d.code == code)
    }
}

/// Engine state as seen by status queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_started_at: Option<OffsetDateTime>,
    pub last_scheduled: Option<SyncReport>,
    pub last_manual: Option<SyncReport>,
    pub last_backfill: Option<SyncReport>,
}

/// A device-level failure. Recorded in the report, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("both channels failed (diameter: {diameter}; sap flow: {sap_flow})")]
    Fetch {
        diameter: sapwatch_core::Error,
        sap_flow: sapwatch_core::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] sapwatch_store::Error),
}

/// One instant with whatever each channel reported there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergedPoint {
    pub at: OffsetDateTime,
    pub diameter: Option<f64>,
    pub sap_flow: Option<f64>,
}

/// Pair two channel series by exact instant, oldest first.
pub fn merge_channels(diameter: &[DataPoint], sap_flow: &[DataPoint]) -> Vec<MergedPoint> {
    let mut merged: BTreeMap<OffsetDateTime, MergedPoint> = BTreeMap::new();

    for point in diameter {
        merged
            .entry(point.at)
            .or_insert_with(|| MergedPoint::empty(point.at))
            .diameter = Some(point.value);
    }
    for point in sap_flow {
        merged
            .entry(point.at)
            .or_insert_with(|| MergedPoint::empty(point.at))
            .sap_flow = Some(point.value);
    }

    merged.into_values().collect()
}

impl MergedPoint {
    fn empty(at: OffsetDateTime) -> Self {
        Self {
            at,
            diameter: None,
            sap_flow: None,
        }
    }
}

enum Plan {
    Fetch(FetchWindow),
    Skip(DeviceOutcome),
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Pulls remote channels into the store, one device at a time.
pub struct SyncEngine {
    store: Arc<Mutex<Store>>,
    client: RemoteDataClient,
    devices: Vec<SensorDevice>,
    settings: SyncSettings,
    running: AtomicBool,
    status: RwLock<SyncStatus>,
}

impl SyncEngine {
    /// Create an idle engine.
    pub fn new(
        store: Arc<Mutex<Store>>,
        client: RemoteDataClient,
        devices: Vec<SensorDevice>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            client,
            devices,
            settings,
            running: AtomicBool::new(false),
            status: RwLock::new(SyncStatus::default()),
        }
    }

    pub fn devices(&self) -> &[SensorDevice] {
        &self.devices
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Running flag plus the last report of each kind.
    pub async fn status(&self) -> SyncStatus {
        let mut status = self.status.read().await.clone();
        status.running = self.is_running();
        status
    }

    /// Run now. Returns `None` if another run was already in progress.
    pub async fn run(&self, kind: RunKind) -> Option<SyncReport> {
        self.run_at(kind, OffsetDateTime::now_utc()).await
    }

    /// Run as if the current instant were `now`.
    pub async fn run_at(&self, kind: RunKind, now: OffsetDateTime) -> Option<SyncReport> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!("Skipping {} sync: another run is in progress", kind.name());
            return None;
        };

        let started_at = OffsetDateTime::now_utc();
        self.status.write().await.last_started_at = Some(started_at);

        let kind = match kind {
            RunKind::Backfill { days } => RunKind::Backfill {
                days: days.clamp(1, self.settings.max_backfill_days),
            },
            other => other,
        };

        info!("Starting {} sync for {} device(s)", kind.name(), self.devices.len());

        let mut devices = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            devices.push(self.sync_device(device, kind, now).await);
        }

        let report = SyncReport {
            kind,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            devices,
        };

        info!(
            "Finished {} sync: {} readings written, {} device(s) failed",
            kind.name(),
            report.readings_written(),
            report.failed_devices()
        );

        let mut status = self.status.write().await;
        match kind {
            RunKind::Scheduled => status.last_scheduled = Some(report.clone()),
            RunKind::Manual => status.last_manual = Some(report.clone()),
            RunKind::Backfill { .. } => status.last_backfill = Some(report.clone()),
        }

        Some(report)
    }

    /// Start a manual run in the background.
    pub fn trigger_manual(self: &Arc<Self>) -> JoinHandle<Option<SyncReport>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(RunKind::Manual).await })
    }

    /// Start a backfill over the last `days` days in the background.
    pub fn trigger_backfill(self: &Arc<Self>, days: u32) -> JoinHandle<Option<SyncReport>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(RunKind::Backfill { days }).await })
    }

    async fn sync_device(
        &self,
        device: &SensorDevice,
        kind: RunKind,
        now: OffsetDateTime,
    ) -> DeviceReport {
        let mut report = DeviceReport::new(&device.code);

        if let Err(e) = self.sync_device_inner(device, kind, now, &mut report).await {
            error!("Sync failed for device {}: {}", device.code, e);
            report.outcome = DeviceOutcome::Failed;
            report.error = Some(e.to_string());
        }

        report
    }

    async fn sync_device_inner(
        &self,
        device: &SensorDevice,
        kind: RunKind,
        now: OffsetDateTime,
        report: &mut DeviceReport,
    ) -> Result<(), SyncError> {
        let window = match self.plan(device, kind, now).await? {
            Plan::Fetch(window) => window,
            Plan::Skip(outcome) => {
                report.outcome = outcome;
                return Ok(());
            }
        };
        report.window_start = Some(window.start);
        report.window_end = Some(window.end);

        let (diameter, sap_flow) = futures::future::join(
            self.client
                .fetch(device.diameter_channel, &window, AggregationMode::Raw),
            self.client
                .fetch(device.sap_flow_channel, &window, AggregationMode::Raw),
        )
        .await;

        let (diameter, sap_flow) = match (diameter, sap_flow) {
            (Err(diameter), Err(sap_flow)) => {
                return Err(SyncError::Fetch { diameter, sap_flow });
            }
            (diameter, sap_flow) => (
                self.channel_points(device, ChannelKind::Diameter, diameter, report),
                self.channel_points(device, ChannelKind::SapFlow, sap_flow, report),
            ),
        };
        report.diameter_points = diameter.len();
        report.sap_flow_points = sap_flow.len();

        let merged = merge_channels(&diameter, &sap_flow);
        if merged.is_empty() {
            debug!("No new data for device {}", device.code);
            return Ok(());
        }

        let plant_id = {
            let store = self.store.lock().await;
            let facility = store.ensure_facility(&self.settings.facility)?;
            store.ensure_plant(facility.id, device)?.id
        };

        let readings: Vec<NewReading> = merged
            .into_iter()
            .map(|p| {
                NewReading::for_device(device, p.at)
                    .diameter(p.diameter)
                    .sap_flow(p.sap_flow)
                    .plant(plant_id)
            })
            .collect();

        for batch in readings.chunks(self.settings.batch_size.max(1)) {
            let mut store = self.store.lock().await;
            match store.upsert_readings(batch) {
                Ok(written) => report.readings_written += written,
                Err(e) => {
                    error!(
                        "Rolled back batch of {} readings for device {}: {}",
                        batch.len(),
                        device.code,
                        e
                    );
                    return Err(e.into());
                }
            }
        }

        debug!(
            "Device {}: {} readings written",
            device.code, report.readings_written
        );
        Ok(())
    }

    async fn plan(
        &self,
        device: &SensorDevice,
        kind: RunKind,
        now: OffsetDateTime,
    ) -> Result<Plan, SyncError> {
        let start = match kind {
            RunKind::Backfill { days } => {
                device.clamp_start(now - Duration::days(i64::from(days)))
            }
            RunKind::Scheduled | RunKind::Manual => {
                if kind == RunKind::Scheduled && device.is_stale(now, self.settings.stale_after) {
                    debug!("Skipping stale device {}", device.code);
                    return Ok(Plan::Skip(DeviceOutcome::SkippedStale));
                }

                let latest = self.store.lock().await.latest_reading_at(&device.code)?;
                let (cursor, start) = match latest {
                    Some(at) => (at, at + Duration::minutes(1)),
                    None => {
                        let start = device.clamp_start(now - self.settings.default_lookback);
                        (start, start)
                    }
                };

                if now - cursor < self.settings.freshness {
                    debug!("Device {} is fresh (cursor {})", device.code, cursor);
                    return Ok(Plan::Skip(DeviceOutcome::SkippedFresh));
                }
                start
            }
        };

        let end = device.active_until.map_or(now, |until| until.min(now));
        if start >= end {
            debug!("Device {} has nothing to fetch before {}", device.code, end);
            return Ok(Plan::Skip(DeviceOutcome::SkippedInactive));
        }

        Ok(Plan::Fetch(FetchWindow::new(
            device.setup_id.clone(),
            start,
            end,
        )))
    }

    fn channel_points(
        &self,
        device: &SensorDevice,
        kind: ChannelKind,
        outcome: sapwatch_core::Result<FetchResult>,
        report: &mut DeviceReport,
    ) -> Vec<DataPoint> {
        match outcome {
            Ok(result) => result.points,
            Err(e) => {
                warn!(
                    "Channel {} ({}) failed for device {}: {}",
                    device.channel(kind),
                    kind.as_str(),
                    device.code,
                    e
                );
                report.channel_errors.push(format!("{}: {}", kind.as_str(), e));
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("devices", &self.devices.len())
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish()
    }
}
