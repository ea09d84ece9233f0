// ── Telemetry snapshots ──
//
// A snapshot is a point-in-time view over every configured controller,
// assembled from the connections' atomically swapped caches. Assembly
// never waits on a device; it only reads what the driving loops last
// published. Node values cross the wire as strings, so viewers render
// uniformly regardless of the underlying node type.

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::access::AllowedScope;
use crate::connection::LinkState;
use crate::registry::ConnectionRegistry;

/// One node's latest value, stringified for transport.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodePoint {
    pub name: String,
    pub value: String,
}

/// One controller's slice of a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerReadout {
    pub id: String,
    pub name: String,
    pub address: Url,
    pub status: LinkState,
    /// Device-reported display name; empty before the first connect.
    pub server_name: String,
    /// Last completed bulk read, empty when none has succeeded on the
    /// current connection.
    pub nodes: Vec<NodePoint>,
    pub last_read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// Point-in-time view over the whole fleet.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub taken_at: DateTime<Utc>,
    pub controllers: Vec<ControllerReadout>,
}

impl TelemetrySnapshot {
    /// Assemble one snapshot from the registry's published caches.
    pub(crate) fn assemble(registry: &ConnectionRegistry) -> Self {
        let controllers = registry
            .iter()
            .map(|conn| {
                let endpoint = conn.endpoint();
                let cache = conn.cache();
                let nodes = cache
                    .as_ref()
                    .map(|c| {
                        c.values
                            .iter()
                            .map(|(name, value)| NodePoint {
                                name: name.clone(),
                                value: value.to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                ControllerReadout {
                    id: endpoint.id.clone(),
                    name: endpoint.name.clone(),
                    address: endpoint.address.clone(),
                    status: conn.state(),
                    server_name: conn.server_name().as_str().to_owned(),
                    nodes,
                    last_read_at: cache.as_ref().map(|c| c.read_at),
                    fault: conn.fault().map(|f| f.message.clone()),
                }
            })
            .collect();

        Self {
            taken_at: Utc::now(),
            controllers,
        }
    }

    /// The subset of this snapshot a viewer with `scope` may see.
    pub fn filtered(&self, scope: &AllowedScope) -> Self {
        Self {
            taken_at: self.taken_at,
            controllers: self
                .controllers
                .iter()
                .filter(|c| scope.allows(&c.address))
                .cloned()
                .collect(),
        }
    }
}

/// Wire envelope pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryMessage {
    TelemetryUpdate { data: TelemetrySnapshot },
}
