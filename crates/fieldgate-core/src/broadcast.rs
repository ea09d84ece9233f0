// ── Broadcast loop ──
//
// One task per gateway. Every tick it assembles a single snapshot from
// the connection caches and pushes it through the subscriber registry;
// per-viewer filtering happens at push time, so the expensive part runs
// once per tick regardless of subscriber count.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::registry::ConnectionRegistry;
use crate::snapshot::TelemetrySnapshot;
use crate::subscription::Subscriptions;

pub(crate) async fn broadcast_loop(
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<Subscriptions>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if subscriptions.len() == 0 {
            trace!("no subscribers, skipping snapshot");
            continue;
        }

        let snapshot = TelemetrySnapshot::assemble(&registry);
        subscriptions.push(&snapshot);
        trace!(
            controllers = snapshot.controllers.len(),
            subscribers = subscriptions.len(),
            "snapshot broadcast"
        );
    }

    debug!("broadcast loop stopped");
}
