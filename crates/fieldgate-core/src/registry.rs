// ── Connection registry ──
//
// Fixed set of connections, built once from configuration. Lookup is by
// endpoint URL, which is how viewers and access scopes name controllers.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use fieldgate_proto::SessionFactory;

use crate::config::GatewayConfig;
use crate::connection::ControllerConnection;
use crate::error::CoreError;

pub struct ConnectionRegistry {
    connections: Vec<ControllerConnection>,
}

impl ConnectionRegistry {
    pub fn new(
        config: &GatewayConfig,
        factory: Arc<dyn SessionFactory>,
        cancel: &CancellationToken,
    ) -> Self {
        let connections = config
            .controllers
            .iter()
            .map(|endpoint| {
                ControllerConnection::new(
                    endpoint.clone(),
                    config.options.clone(),
                    Arc::clone(&factory),
                    cancel.child_token(),
                )
            })
            .collect();
        Self { connections }
    }

    /// Start every driving loop. Idempotent per connection.
    pub(crate) fn spawn_all(&self) -> Vec<JoinHandle<()>> {
        self.connections
            .iter()
            .filter_map(ControllerConnection::spawn)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControllerConnection> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn by_address(&self, address: &Url) -> Result<&ControllerConnection, CoreError> {
        self.connections
            .iter()
            .find(|c| c.endpoint().address == *address)
            .ok_or_else(|| CoreError::UnknownController {
                address: address.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerEndpoint, GatewayOptions};
    use fieldgate_proto::{SimController, SimFleet};

    fn config(addresses: &[&str]) -> GatewayConfig {
        GatewayConfig {
            controllers: addresses
                .iter()
                .enumerate()
                .map(|(i, a)| ControllerEndpoint {
                    id: format!("plc-{i}"),
                    name: format!("PLC {i}"),
                    address: a.parse().expect("static url"),
                })
                .collect(),
            options: GatewayOptions::default(),
        }
    }

    #[tokio::test]
    async fn lookup_is_by_endpoint_address() {
        let a: Url = "opc.tcp://a:4840/".parse().expect("static url");
        let b: Url = "opc.tcp://b:4840/".parse().expect("static url");
        let fleet = SimFleet::new([
            SimController::demo(a.clone(), "A"),
            SimController::demo(b.clone(), "B"),
        ]);

        let cancel = CancellationToken::new();
        let registry = config(&[a.as_str(), b.as_str()]);
        let registry = ConnectionRegistry::new(&registry, Arc::new(fleet), &cancel);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.by_address(&a).expect("a").endpoint().id, "plc-0");

        let missing: Url = "opc.tcp://c:4840/".parse().expect("static url");
        assert!(matches!(
            registry.by_address(&missing),
            Err(CoreError::UnknownController { .. })
        ));
    }
}
