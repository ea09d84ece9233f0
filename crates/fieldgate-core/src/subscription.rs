// ── Subscriber registry ──
//
// Live viewers attached to the broadcast stream. A subscriber's scope is
// resolved once at registration and pinned for the life of the
// subscription; changing permissions means resubscribing.

use std::fmt;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::access::{AllowedScope, ViewerId};
use crate::snapshot::{TelemetryMessage, TelemetrySnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Subscriber {
    viewer: ViewerId,
    scope: AllowedScope,
    sender: mpsc::Sender<TelemetryMessage>,
}

/// Concurrent registry of attached subscribers.
#[derive(Default)]
pub(crate) struct Subscriptions {
    entries: DashMap<SubscriptionId, Subscriber>,
}

impl Subscriptions {
    pub fn insert(
        &self,
        viewer: ViewerId,
        scope: AllowedScope,
        sender: mpsc::Sender<TelemetryMessage>,
    ) -> SubscriptionId {
        let id = SubscriptionId::generate();
        debug!(subscription = %id, viewer = %viewer, "subscriber attached");
        self.entries.insert(
            id,
            Subscriber {
                viewer,
                scope,
                sender,
            },
        );
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "subscriber detached");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Push one snapshot to every subscriber, each filtered to its own
    /// scope. Delivery is non-blocking: a subscriber that cannot keep up
    /// (or has hung up) is dropped from the registry; the others are
    /// unaffected.
    pub fn push(&self, snapshot: &TelemetrySnapshot) {
        let mut dead = Vec::new();

        for entry in &self.entries {
            let subscriber = entry.value();
            let message = TelemetryMessage::TelemetryUpdate {
                data: snapshot.filtered(&subscriber.scope),
            };
            match subscriber.sender.try_send(message) {
                Ok(()) => trace!(subscription = %entry.key(), "snapshot delivered"),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscription = %entry.key(),
                        viewer = %subscriber.viewer,
                        "subscriber fell behind, dropping it"
                    );
                    dead.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }

        for id in dead {
            self.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn empty_snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            taken_at: Utc::now(),
            controllers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_without_disturbing_others() {
        let subs = Subscriptions::default();

        let (fast_tx, mut fast_rx) = mpsc::channel(4);
        let (slow_tx, _slow_rx_kept) = mpsc::channel(1);

        subs.insert("fast".into(), AllowedScope::All, fast_tx);
        subs.insert("slow".into(), AllowedScope::All, slow_tx);
        assert_eq!(subs.len(), 2);

        // First push fills the slow channel; second overflows it.
        subs.push(&empty_snapshot());
        subs.push(&empty_snapshot());

        assert_eq!(subs.len(), 1, "the slow subscriber should be gone");
        assert!(fast_rx.recv().await.is_some());
        assert!(fast_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn hung_up_subscriber_is_pruned() {
        let subs = Subscriptions::default();
        let (tx, rx) = mpsc::channel(4);
        subs.insert("gone".into(), AllowedScope::All, tx);
        drop(rx);

        subs.push(&empty_snapshot());
        assert_eq!(subs.len(), 0);
    }

    #[tokio::test]
    async fn removal_is_idempotent() {
        let subs = Subscriptions::default();
        let (tx, _rx) = mpsc::channel(4);
        let id = subs.insert("v".into(), AllowedScope::All, tx);

        assert!(subs.remove(id));
        assert!(!subs.remove(id));
    }
}
