// ── Simulated controllers ──
//
// An in-process controller fleet implementing the session traits.
// Backs the demo binary and every fieldgate test that needs a live-ish
// device: failure injection covers refused connects and dropped reads,
// and call counters let tests assert that validation rejected a write
// before any protocol contact happened.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use url::Url;

use crate::address::NodeAddress;
use crate::error::ProtoError;
use crate::session::{NodeDescriptor, NodeSession, SessionFactory};
use crate::value::{NodeType, NodeValue};

#[derive(Debug, Clone)]
struct SimNode {
    address: NodeAddress,
    node_type: NodeType,
    value: NodeValue,
}

struct SimInner {
    endpoint: Url,
    server_name: String,
    nodes: Mutex<IndexMap<String, SimNode>>,
    fail_connects: AtomicU32,
    fail_reads: AtomicBool,
    connect_count: AtomicU32,
    connect_times: Mutex<Vec<Instant>>,
    read_count: AtomicU32,
    write_count: AtomicU32,
}

/// One simulated controller. Cheaply cloneable; all clones share state,
/// so a test can keep a handle while the gateway owns the factory.
#[derive(Clone)]
pub struct SimController {
    inner: Arc<SimInner>,
}

impl SimController {
    pub fn new(endpoint: Url, server_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SimInner {
                endpoint,
                server_name: server_name.into(),
                nodes: Mutex::new(IndexMap::new()),
                fail_connects: AtomicU32::new(0),
                fail_reads: AtomicBool::new(false),
                connect_count: AtomicU32::new(0),
                connect_times: Mutex::new(Vec::new()),
                read_count: AtomicU32::new(0),
                write_count: AtomicU32::new(0),
            }),
        }
    }

    /// A solar-park-shaped address space used by the demo binary.
    pub fn demo(endpoint: Url, server_name: impl Into<String>) -> Self {
        let sim = Self::new(endpoint, server_name);
        sim.add_node("Active_Power_kW", NodeType::Double, NodeValue::Float(512.3));
        sim.add_node("Total_Energy_MWh", NodeType::Double, NodeValue::Float(10_934.7));
        sim.add_node("Inverter_Temp_C", NodeType::Float, NodeValue::Float(41.2));
        sim.add_node("Grid_Online", NodeType::Boolean, NodeValue::Boolean(true));
        sim.add_node("Setpoint_Power_kW", NodeType::Double, NodeValue::Float(600.0));
        sim.add_node(
            "CMD_Instant_Cutoff[0]",
            NodeType::Boolean,
            NodeValue::Boolean(false),
        );
        sim.add_node(
            "CMD_Instant_Cutoff[1]",
            NodeType::Boolean,
            NodeValue::Boolean(false),
        );
        sim
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Add (or replace) a data point. Node addresses are derived from the
    /// name; discovery order follows insertion order.
    pub fn add_node(&self, name: &str, node_type: NodeType, value: NodeValue) {
        let address = NodeAddress::new(format!("sim:{name}"));
        self.nodes_lock().insert(
            name.to_owned(),
            SimNode {
                address,
                node_type,
                value,
            },
        );
    }

    /// Drop the whole address space and install a new one. Used to model
    /// a firmware change between reconnects.
    pub fn replace_nodes<I>(&self, nodes: I)
    where
        I: IntoIterator<Item = (String, NodeType, NodeValue)>,
    {
        let mut guard = self.nodes_lock();
        guard.clear();
        for (name, node_type, value) in nodes {
            let address = NodeAddress::new(format!("sim:{name}"));
            guard.insert(
                name,
                SimNode {
                    address,
                    node_type,
                    value,
                },
            );
        }
    }

    /// Refuse the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Make every bulk read fail until cleared.
    pub fn set_read_failure(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> u32 {
        self.inner.connect_count.load(Ordering::SeqCst)
    }

    /// Arrival instants of every connect attempt, successful or refused.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.inner
            .connect_times
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn read_count(&self) -> u32 {
        self.inner.read_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u32 {
        self.inner.write_count.load(Ordering::SeqCst)
    }

    /// Current stored value of a node, by name.
    pub fn value_of(&self, name: &str) -> Option<NodeValue> {
        self.nodes_lock().get(name).map(|n| n.value.clone())
    }

    fn nodes_lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, SimNode>> {
        // Poisoning only happens if a holder panicked; the map itself
        // stays consistent, so keep going with the inner value.
        self.inner
            .nodes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// A set of simulated controllers addressable by endpoint URL.
pub struct SimFleet {
    controllers: HashMap<Url, SimController>,
}

impl SimFleet {
    pub fn new(controllers: impl IntoIterator<Item = SimController>) -> Self {
        Self {
            controllers: controllers
                .into_iter()
                .map(|c| (c.endpoint().clone(), c))
                .collect(),
        }
    }

}

impl SessionFactory for SimFleet {
    fn connect(&self, endpoint: &Url) -> Result<Box<dyn NodeSession>, ProtoError> {
        let Some(controller) = self.controllers.get(endpoint) else {
            return Err(ProtoError::Connect {
                endpoint: endpoint.to_string(),
                reason: "no route to controller".into(),
            });
        };

        controller.inner.connect_count.fetch_add(1, Ordering::SeqCst);
        controller
            .inner
            .connect_times
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Instant::now());

        let remaining = controller.inner.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            controller
                .inner
                .fail_connects
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ProtoError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused (injected)".into(),
            });
        }

        tracing::debug!(endpoint = %endpoint, "sim session opened");
        Ok(Box::new(SimSession {
            controller: controller.clone(),
            open: true,
        }))
    }
}

struct SimSession {
    controller: SimController,
    open: bool,
}

impl NodeSession for SimSession {
    fn server_name(&mut self) -> Option<String> {
        Some(self.controller.inner.server_name.clone())
    }

    fn browse(&mut self, _root: &NodeAddress) -> Result<Vec<NodeDescriptor>, ProtoError> {
        if !self.open {
            return Err(ProtoError::SessionClosed);
        }
        // The sim exposes its whole space under any root.
        Ok(self
            .controller
            .nodes_lock()
            .iter()
            .map(|(name, node)| NodeDescriptor {
                name: name.clone(),
                address: node.address.clone(),
                node_type: node.node_type,
            })
            .collect())
    }

    fn read_values(&mut self, addresses: &[NodeAddress]) -> Result<Vec<NodeValue>, ProtoError> {
        if !self.open {
            return Err(ProtoError::SessionClosed);
        }
        self.controller.inner.read_count.fetch_add(1, Ordering::SeqCst);

        if self.controller.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(ProtoError::Read {
                reason: "read fault (injected)".into(),
            });
        }

        let guard = self.controller.nodes_lock();
        addresses
            .iter()
            .map(|addr| {
                guard
                    .values()
                    .find(|n| &n.address == addr)
                    .map(|n| n.value.clone())
                    .ok_or_else(|| ProtoError::Read {
                        reason: format!("unknown address {addr}"),
                    })
            })
            .collect()
    }

    fn write_value(&mut self, address: &NodeAddress, value: NodeValue) -> Result<(), ProtoError> {
        if !self.open {
            return Err(ProtoError::SessionClosed);
        }

        let mut guard = self.controller.nodes_lock();
        let Some(node) = guard.values_mut().find(|n| &n.address == address) else {
            return Err(ProtoError::Write {
                address: address.to_string(),
                reason: "unknown address".into(),
            });
        };

        if !variant_matches(node.node_type, &value) {
            return Err(ProtoError::Write {
                address: address.to_string(),
                reason: format!("type mismatch: node is {:?}", node.node_type),
            });
        }

        node.value = value;
        drop(guard);
        self.controller.inner.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

fn variant_matches(node_type: NodeType, value: &NodeValue) -> bool {
    matches!(
        (node_type, value),
        (NodeType::Boolean, NodeValue::Boolean(_))
            | (
                NodeType::Int16 | NodeType::Int32 | NodeType::Int64,
                NodeValue::Integer(_)
            )
            | (
                NodeType::UInt16 | NodeType::UInt32 | NodeType::UInt64,
                NodeValue::Unsigned(_)
            )
            | (NodeType::Float | NodeType::Double, NodeValue::Float(_))
            | (NodeType::Text, NodeValue::Text(_))
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn endpoint() -> Url {
        "opc.tcp://127.0.0.1:4840/".parse().expect("static url")
    }

    #[test]
    fn browse_read_write_round_trip() {
        let sim = SimController::demo(endpoint(), "Demo Park");
        let fleet = SimFleet::new([sim.clone()]);

        let mut session = fleet.connect(&endpoint()).expect("connect");
        assert_eq!(session.server_name().as_deref(), Some("Demo Park"));

        let nodes = session.browse(&NodeAddress::from("sim:root")).expect("browse");
        assert_eq!(nodes.len(), 7);
        assert_eq!(nodes[0].name, "Active_Power_kW");

        let addresses: Vec<NodeAddress> = nodes.iter().map(|n| n.address.clone()).collect();
        let values = session.read_values(&addresses).expect("read");
        assert_eq!(values.len(), nodes.len());
        assert_eq!(values[3], NodeValue::Boolean(true));

        session
            .write_value(&nodes[3].address, NodeValue::Boolean(false))
            .expect("write");
        assert_eq!(sim.value_of("Grid_Online"), Some(NodeValue::Boolean(false)));
        assert_eq!(sim.write_count(), 1);
    }

    #[test]
    fn injected_connect_failures_are_consumed_in_order() {
        let sim = SimController::demo(endpoint(), "Demo Park");
        sim.fail_next_connects(2);
        let fleet = SimFleet::new([sim.clone()]);

        assert!(fleet.connect(&endpoint()).is_err());
        assert!(fleet.connect(&endpoint()).is_err());
        assert!(fleet.connect(&endpoint()).is_ok());
        assert_eq!(sim.connect_count(), 3);
    }

    #[test]
    fn read_failure_fails_the_whole_bulk_read() {
        let sim = SimController::demo(endpoint(), "Demo Park");
        let fleet = SimFleet::new([sim.clone()]);
        let mut session = fleet.connect(&endpoint()).expect("connect");

        sim.set_read_failure(true);
        let addresses = [NodeAddress::from("sim:Active_Power_kW")];
        assert!(session.read_values(&addresses).is_err());

        sim.set_read_failure(false);
        assert!(session.read_values(&addresses).is_ok());
    }

    #[test]
    fn typed_writes_reject_mismatched_variants() {
        let fleet = SimFleet::new([SimController::demo(endpoint(), "Demo Park")]);
        let mut session = fleet.connect(&endpoint()).expect("connect");

        let err = session
            .write_value(
                &NodeAddress::from("sim:Grid_Online"),
                NodeValue::Float(1.0),
            )
            .expect_err("bool node must reject float");
        assert!(matches!(err, ProtoError::Write { .. }));
    }

    #[test]
    fn unknown_endpoint_is_a_connect_error() {
        let fleet = SimFleet::new([]);
        assert!(matches!(
            fleet.connect(&endpoint()),
            Err(ProtoError::Connect { .. })
        ));
    }
}
