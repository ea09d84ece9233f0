// ── Runtime gateway configuration ──
//
// These types describe the controller fleet and the core's timing knobs.
// The config crate builds them from file + environment and hands them in;
// core never reads config files.

use std::time::Duration;

use url::Url;

use fieldgate_proto::NodeAddress;

/// One configured controller. Loaded at startup, immutable for the
/// process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    /// Stable identifier used in payloads and logs.
    pub id: String,
    /// Human-readable display name (e.g. "Eco Solar").
    pub name: String,
    /// Protocol endpoint, e.g. `opc.tcp://10.0.40.11:4840`.
    pub address: Url,
}

/// Timing and sizing knobs shared by every connection and the broadcaster.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Address under which each controller's readable nodes are enumerated.
    pub root_node: NodeAddress,
    /// Cadence of bulk reads while a controller is connected.
    pub poll_interval: Duration,
    /// Minimum spacing between reconnect attempts for one controller.
    pub reconnect_delay: Duration,
    /// Cadence of snapshot fan-out to subscribers.
    pub broadcast_interval: Duration,
    /// How long a dispatched write may take before the caller gives up.
    pub write_timeout: Duration,
    /// Bound on the best-effort session teardown between error and
    /// reconnect, and on each loop's teardown at shutdown.
    pub disconnect_timeout: Duration,
    /// Bound on the whole core's shutdown.
    pub shutdown_timeout: Duration,
    /// Per-subscriber transport buffer, in broadcast ticks.
    pub subscriber_buffer: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            root_node: NodeAddress::from("ns=3;s=Telemetry"),
            poll_interval: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(600),
            broadcast_interval: Duration::from_secs(2),
            write_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            subscriber_buffer: 16,
        }
    }
}

/// Full static configuration for a gateway instance.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub controllers: Vec<ControllerEndpoint>,
    pub options: GatewayOptions,
}
