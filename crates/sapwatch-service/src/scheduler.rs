//! Periodic timers: the scheduled sync and the cache sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::state::AppState;
use crate::sync::{RunKind, SyncEngine};

/// Starts and stops the background timers.
pub struct Scheduler {
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler for the given state.
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the sync timer and the cache sweeper.
    ///
    /// Returns immediately; both timers run until [`Scheduler::stop`].
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let (sync_every, sweep_every, run_on_startup) = {
            let config = self.state.config.read().await;
            (
                Duration::from_secs(config.sync.interval_secs.max(1)),
                Duration::from_secs(config.cache.sweep_interval_secs.max(1)),
                config.sync.run_on_startup,
            )
        };

        info!(
            "Starting scheduler: sync every {:?}, cache sweep every {:?}",
            sync_every, sweep_every
        );

        let sweeper = self
            .state
            .client
            .cache()
            .spawn_sweeper(sweep_every, self.cancel.clone());

        let sync = tokio::spawn(sync_loop(
            Arc::clone(&self.state.sync),
            sync_every,
            run_on_startup,
            self.cancel.clone(),
        ));

        vec![sync, sweeper]
    }

    /// Signal every timer to stop after its current tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// A token that is cancelled when the scheduler stops.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

async fn sync_loop(
    engine: Arc<SyncEngine>,
    period: Duration,
    run_on_startup: bool,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick completes immediately
    if !run_on_startup {
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Sync timer stopped");
                return;
            }
            _ = ticker.tick() => {
                engine.run(RunKind::Scheduled).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DeviceConfig};
    use sapwatch_core::{DataPoint, MockTelemetryApi, RemoteDataClient};
    use sapwatch_store::Store;
    use time::OffsetDateTime;
    use time::macros::datetime;

    fn test_state(run_on_startup: bool) -> (Arc<AppState>, Arc<MockTelemetryApi>) {
        let mut config = Config::default();
        config.sync.run_on_startup = run_on_startup;
        config.sync.interval_secs = 60;
        config.devices.push(DeviceConfig {
            code: "D1".to_string(),
            name: "Row 1".to_string(),
            setup_id: "12345".to_string(),
            diameter_channel: 1,
            sap_flow_channel: 2,
            active_from: datetime!(2023-01-01 0:00 UTC),
            active_until: None,
        });

        // A recent reading moves the cursor, so every run asks for a new window
        let recent = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap() - time::Duration::hours(1);
        let api = Arc::new(
            MockTelemetryApi::builder()
                .series(1, vec![DataPoint::new(recent, 4.2)])
                .build(),
        );
        let client = RemoteDataClient::new(api.clone());
        let state = AppState::with_client(Store::open_in_memory().unwrap(), config, client);
        (state, api)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    // Each run fetches both channels of the one device
    #[tokio::test(start_paused = true)]
    async fn test_runs_on_startup_then_every_interval() {
        let (state, api) = test_state(true);
        let scheduler = Scheduler::new(Arc::clone(&state));
        let handles = scheduler.start().await;

        settle().await;
        assert_eq!(api.request_count(), 2);
        assert!(state.sync.status().await.last_scheduled.is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(api.request_count(), 4);

        scheduler.stop();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_run_can_be_disabled() {
        let (state, api) = test_state(false);
        let scheduler = Scheduler::new(Arc::clone(&state));
        let handles = scheduler.start().await;

        settle().await;
        assert_eq!(api.request_count(), 0);
        assert!(state.sync.status().await.last_scheduled.is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(api.request_count(), 2);

        scheduler.stop();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
