// fieldgate-proto: the node-addressed control protocol seam.
//
// Defines the typed value model, node addressing, and the blocking
// session traits that `fieldgate-core` drives from its per-controller
// loops. Ships an in-process simulated controller for the demo binary
// and for tests; real protocol stacks plug in behind `SessionFactory`.

pub mod address;
pub mod error;
pub mod session;
pub mod sim;
pub mod value;

// ── Primary re-exports ──────────────────────────────────────────────
pub use address::NodeAddress;
pub use error::ProtoError;
pub use session::{NodeDescriptor, NodeSession, SessionFactory};
pub use sim::{SimController, SimFleet};
pub use value::{CoerceError, NodeType, NodeValue};
