//! Polling coordinator for one valve.
//!
//! Each cycle fetches the five endpoints one after another and publishes either a complete
//! new [`Snapshot`] or a failure. Entities never see a mix of two cycles.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::ClientError;
use super::client::DeviceClient;
use super::models::AutoShutOffReport;
use super::models::AutoShutOffState;
use super::models::DeviceState;
use super::models::NetworkingData;
use super::models::TelemetryData;

/// Everything fetched in one successful cycle
///
/// A `None` field means the firmware does not provide that record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub state: Option<DeviceState>,
    pub telemetry: Option<TelemetryData>,
    pub networking: Option<NetworkingData>,
    pub auto_shut_off_state: Option<AutoShutOffState>,
    pub auto_shut_off_report: Option<AutoShutOffReport>,
}

/// Outcome of the latest cycle, as seen by listeners
#[derive(Debug, Clone, Default)]
pub struct PollResult {
    /// Number of cycles run so far
    pub cycle: u64,
    pub last_update_success: bool,
    /// Last known good snapshot
    pub data: Option<Arc<Snapshot>>,
}

#[derive(Debug, thiserror::Error)]
#[error("update failed: {0}")]
pub struct UpdateFailed(#[from] pub ClientError);

pub struct Coordinator {
    name: String,
    client: Arc<dyn DeviceClient>,
    update_interval: Duration,
    data: ArcSwapOption<Snapshot>,
    last_update_success: AtomicBool,
    results: watch::Sender<PollResult>,
}

impl Coordinator {
    pub fn new(name: String, client: Arc<dyn DeviceClient>, update_interval: Duration) -> Self {
        let (results, _) = watch::channel(PollResult::default());
        Self {
            name,
            client,
            update_interval,
            data: ArcSwapOption::empty(),
            last_update_success: AtomicBool::new(false),
            results,
        }
    }

    pub fn client(&self) -> &Arc<dyn DeviceClient> {
        &self.client
    }

    /// Last known good snapshot; `None` until a cycle has succeeded
    pub fn data(&self) -> Option<Arc<Snapshot>> {
        self.data.load_full()
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    /// Receive the result of every cycle from now on
    pub fn subscribe(&self) -> watch::Receiver<PollResult> {
        self.results.subscribe()
    }

    /// Run one cycle and publish its outcome
    ///
    /// On failure the previous snapshot is kept and listeners see `last_update_success == false`.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, UpdateFailed> {
        match self.fetch().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.data.store(Some(snapshot.clone()));
                if !self.last_update_success.swap(true, Ordering::SeqCst) {
                    info!("{}: fetching data recovered", self.name);
                }
                self.publish(true);
                Ok(snapshot)
            }
            Err(e) => {
                warn!("{}: error fetching data: {}", self.name, e);
                self.last_update_success.store(false, Ordering::SeqCst);
                self.publish(false);
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<Snapshot, UpdateFailed> {
        Ok(Snapshot {
            state: self.client.get_device_state().await?,
            telemetry: self.client.get_telemetry().await?,
            networking: self.client.get_networking().await?,
            auto_shut_off_state: self.client.get_auto_shut_off_state().await?,
            auto_shut_off_report: self.client.get_auto_shut_off_report().await?,
        })
    }

    fn publish(&self, success: bool) {
        let data = self.data();
        self.results.send_modify(|result| {
            result.cycle += 1;
            result.last_update_success = success;
            result.data = data;
        });
    }

    /// Poll on the update interval until the task is aborted
    ///
    /// A request on `refresh_requests` runs a cycle immediately and restarts the interval.
    /// Cycles never overlap; a tick that comes due during a slow cycle is delayed.
    pub async fn run(&self, refresh_requests: Arc<Notify>) {
        let mut interval = tokio::time::interval(self.update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // the first cycle runs during setup

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = refresh_requests.notified() => {
                    debug!("{}: refresh requested", self.name);
                    interval.reset();
                }
            }

            // Failures are logged and published by refresh().
            let _ = self.refresh().await;
        }
    }
}
