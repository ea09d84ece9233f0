// ── Gateway façade ──
//
// The one public entry point: owns the connection registry, the
// subscriber registry and the broadcast loop, and mediates every viewer
// interaction through the access resolver.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fieldgate_proto::SessionFactory;

use crate::access::{AccessResolver, ViewerId};
use crate::broadcast::broadcast_loop;
use crate::config::GatewayConfig;
use crate::connection::LinkState;
use crate::error::CoreError;
use crate::registry::ConnectionRegistry;
use crate::snapshot::{TelemetryMessage, TelemetrySnapshot};
use crate::subscription::{SubscriptionId, Subscriptions};
use crate::write::{WriteOutcome, WriteRequest, plan_writes};

pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<Subscriptions>,
    access: Arc<dyn AccessResolver>,
    config: GatewayConfig,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        factory: Arc<dyn SessionFactory>,
        access: Arc<dyn AccessResolver>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let registry = Arc::new(ConnectionRegistry::new(&config, factory, &cancel));

        Self {
            registry,
            subscriptions: Arc::new(Subscriptions::default()),
            access,
            config,
            cancel,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the per-controller driving loops and the broadcast loop.
    /// Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks_lock();
        tasks.extend(self.registry.spawn_all());
        tasks.push(tokio::spawn(broadcast_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.subscriptions),
            self.config.options.broadcast_interval,
            self.cancel.child_token(),
        )));
        drop(tasks);

        info!(controllers = self.registry.len(), "gateway started");
    }

    /// Signal every loop to stop and wait for them, bounded by the
    /// configured shutdown timeout. Loops that miss the deadline are
    /// abandoned, not aborted mid-write.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks_lock());
        let joined = tokio::time::timeout(
            self.config.options.shutdown_timeout,
            futures_util::future::join_all(tasks),
        )
        .await;

        match joined {
            Ok(_) => info!("gateway stopped"),
            Err(_) => warn!(
                timeout_ms = self.config.options.shutdown_timeout.as_millis() as u64,
                "shutdown deadline elapsed with loops still running"
            ),
        }
    }

    /// Attach a viewer to the broadcast stream over a caller-provided
    /// transport. Scope is resolved once, here, and pinned for the life
    /// of the subscription.
    pub async fn subscribe_with(
        &self,
        viewer: &ViewerId,
        transport: mpsc::Sender<TelemetryMessage>,
    ) -> Result<SubscriptionId, CoreError> {
        let scope = self.access.resolve_access(viewer).await?;
        Ok(self.subscriptions.insert(viewer.clone(), scope, transport))
    }

    /// [`Self::subscribe_with`], allocating the transport channel with
    /// the configured buffer.
    pub async fn subscribe(
        &self,
        viewer: &ViewerId,
    ) -> Result<(SubscriptionId, mpsc::Receiver<TelemetryMessage>), CoreError> {
        let (tx, rx) = mpsc::channel(self.config.options.subscriber_buffer);
        let id = self.subscribe_with(viewer, tx).await?;
        Ok((id, rx))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(id)
    }

    /// An on-demand snapshot, filtered to the viewer's scope. Reads only
    /// the published caches; never touches a device.
    pub async fn current_snapshot(
        &self,
        viewer: &ViewerId,
    ) -> Result<TelemetrySnapshot, CoreError> {
        let scope = self.access.resolve_access(viewer).await?;
        Ok(TelemetrySnapshot::assemble(&self.registry).filtered(&scope))
    }

    /// Validate and execute a write request on behalf of a viewer.
    ///
    /// Rejection order: permission, controller existence, availability,
    /// then value validation. Nothing reaches the device unless every
    /// check passes for the whole request.
    pub async fn submit_write(
        &self,
        viewer: &ViewerId,
        request: WriteRequest,
    ) -> Result<Vec<WriteOutcome>, CoreError> {
        let scope = self.access.resolve_access(viewer).await?;
        if !scope.allows(&request.controller) {
            return Err(CoreError::PermissionDenied {
                viewer: viewer.to_string(),
                address: request.controller.to_string(),
            });
        }

        let connection = self.registry.by_address(&request.controller)?;
        let state = connection.state();
        if state != LinkState::Connected {
            return Err(CoreError::ControllerUnavailable {
                address: request.controller.to_string(),
                state,
            });
        }
        let Some(map) = connection.node_map() else {
            return Err(CoreError::ControllerUnavailable {
                address: request.controller.to_string(),
                state,
            });
        };

        let plan = plan_writes(&map, &request)?;
        connection.dispatch(plan).await
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn tasks_lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
