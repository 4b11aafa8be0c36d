//! Parla roster: published client-directory snapshots and the refresh loop.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parla_core::RosterSnapshot;
use parla_gateway::{DeskGateway, GatewayResult};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One-shot directory fetch, published as version 1.
pub async fn load_roster(gateway: &dyn DeskGateway) -> GatewayResult<RosterSnapshot> {
    let t0 = Instant::now();
    let records = gateway.list_clients().await?;
    metrics::gauge!("roster_records", records.len() as f64);
    info!(count = records.len(), took_ms = %t0.elapsed().as_millis(), "roster: loaded");
    Ok(RosterSnapshot { version: 1, records })
}

/// Handle for readers: load the current snapshot, subscribe to version bumps.
#[derive(Clone)]
pub struct RosterHandle {
    snap: Arc<ArcSwap<RosterSnapshot>>,
    version_rx: watch::Receiver<u64>,
}

impl RosterHandle {
    /// Handle over one fixed snapshot, with no refresh loop behind it.
    /// One-shot tools load the roster once and wrap it this way.
    pub fn fixed(snapshot: RosterSnapshot) -> Self {
        let (_version_tx, version_rx) = watch::channel(snapshot.version);
        Self { snap: Arc::new(ArcSwap::from_pointee(snapshot)), version_rx }
    }

    pub fn current(&self) -> Arc<RosterSnapshot> {
        self.snap.load_full()
    }

    pub fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.version_rx.clone()
    }
}

/// Spawns the refresh loop: immediate fetch, then one per interval. Each
/// success swaps a new snapshot and publishes its version; failures keep the
/// last good snapshot. The loop stops once every handle is gone.
///
/// With `every = None` the interval comes from `PARLA_ROSTER_REFRESH_SECS`
/// (default 300).
pub fn spawn_refresh(
    gateway: Arc<dyn DeskGateway>,
    every: Option<Duration>,
) -> (RosterHandle, tokio::task::JoinHandle<()>) {
    let interval = every.unwrap_or_else(|| {
        let secs: u64 = std::env::var("PARLA_ROSTER_REFRESH_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);
        Duration::from_secs(secs)
    });
    let snap = Arc::new(ArcSwap::from_pointee(RosterSnapshot::default()));
    let (version_tx, version_rx) = watch::channel(0u64);
    let snap_clone = Arc::clone(&snap);

    let task = tokio::spawn(async move {
        let mut version = 0u64;
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            metrics::counter!("roster_refresh_total", 1u64);
            match gateway.list_clients().await {
                Ok(records) => {
                    version += 1;
                    metrics::gauge!("roster_records", records.len() as f64);
                    info!(version, count = records.len(), "roster: refreshed");
                    snap_clone.store(Arc::new(RosterSnapshot { version, records }));
                    if version_tx.send(version).is_err() {
                        debug!("roster: no subscribers left; stopping refresh loop");
                        break;
                    }
                }
                Err(e) => {
                    metrics::counter!("roster_refresh_errors_total", 1u64);
                    warn!(error = %e, "roster: refresh failed; keeping last snapshot");
                }
            }
        }
        info!("roster refresh loop stopped");
    });

    (RosterHandle { snap, version_rx }, task)
}
