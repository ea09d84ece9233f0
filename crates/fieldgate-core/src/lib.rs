//! Telemetry core: controller connection lifecycle, periodic sampling,
//! scope-filtered broadcast fan-out, and validated write commands.
//!
//! The crate is transport-agnostic on both sides. Device access goes
//! through the session traits in `fieldgate-proto`; viewer access comes
//! in through [`Gateway`], with subscriptions delivered over plain
//! channels that an outer websocket (or any other) surface can drain.

pub mod access;
mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod snapshot;
pub mod subscription;
pub mod write;

pub use access::{AccessResolver, AllowedScope, StaticAccess, ViewerId};
pub use config::{ControllerEndpoint, GatewayConfig, GatewayOptions};
pub use connection::{ControllerConnection, FaultRecord, LinkState, NodeCache, NodeMap};
pub use error::CoreError;
pub use gateway::Gateway;
pub use registry::ConnectionRegistry;
pub use snapshot::{ControllerReadout, NodePoint, TelemetryMessage, TelemetrySnapshot};
pub use subscription::SubscriptionId;
pub use write::{CUTOFF_COMMAND, WriteOutcome, WriteRequest};
