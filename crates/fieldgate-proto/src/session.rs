// ── Session traits ──
//
// A controller session is stateful and blocking at the protocol level:
// every call may stall on the device. fieldgate-core therefore runs each
// call on a blocking worker, never more than one per controller at a time.

use url::Url;

use crate::address::NodeAddress;
use crate::error::ProtoError;
use crate::value::{NodeType, NodeValue};

/// One addressable data point discovered within a controller.
///
/// `name` is the display/browse name used by viewers and write commands;
/// indexed array elements discovered as `[i]` children of a parent `P`
/// are reported as `P[i]` so sibling families stay unambiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub name: String,
    pub address: NodeAddress,
    pub node_type: NodeType,
}

/// An open, stateful session with one controller.
///
/// All methods are blocking and take `&mut self`: a session handle is
/// never shared between threads, it is owned by the driving loop of its
/// controller.
pub trait NodeSession: Send {
    /// Best-effort read of the controller's self-reported display name.
    /// `None` when the device does not expose one or the read fails.
    fn server_name(&mut self) -> Option<String>;

    /// Enumerate every readable data point under `root`, recursively.
    fn browse(&mut self, root: &NodeAddress) -> Result<Vec<NodeDescriptor>, ProtoError>;

    /// Bulk read of the given addresses, in order.
    ///
    /// Either every address yields a value or the whole call fails;
    /// partial results are not returned.
    fn read_values(&mut self, addresses: &[NodeAddress]) -> Result<Vec<NodeValue>, ProtoError>;

    /// Write one typed value to one node.
    fn write_value(&mut self, address: &NodeAddress, value: NodeValue) -> Result<(), ProtoError>;

    /// Tear the session down without waiting for protocol-level goodbye
    /// exchanges. Must not block for longer than a socket close.
    fn close(&mut self);
}

/// Opens sessions to controllers. Implemented by real protocol stacks
/// and by [`crate::sim::SimFleet`] for tests and the demo binary.
pub trait SessionFactory: Send + Sync + 'static {
    fn connect(&self, endpoint: &Url) -> Result<Box<dyn NodeSession>, ProtoError>;
}
