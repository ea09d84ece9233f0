// ── Controller connection & driving loop ──
//
// One `ControllerConnection` per configured endpoint, alive for the
// process lifetime, driven by its own loop task. The loop owns the
// protocol session outright; everything that touches the device --
// connect, discovery, bulk reads, writes, teardown -- happens inside
// this loop, one blocking call at a time. Observers see the connection
// only through atomically swapped caches and a watch channel.

use std::sync::Arc;
use std::sync::Mutex;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fieldgate_proto::{NodeAddress, NodeDescriptor, NodeSession, NodeValue, SessionFactory};

use crate::config::{ControllerEndpoint, GatewayOptions};
use crate::error::CoreError;
use crate::write::WriteOutcome;

const WRITE_CHANNEL_SIZE: usize = 16;

// ── LinkState ────────────────────────────────────────────────────────

/// Lifecycle state of one controller connection.
///
/// `Stopped` is terminal and only reached through the shutdown signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Stopped,
}

// ── Shared read models ───────────────────────────────────────────────

/// The last recorded fault on a connection. Cleared by the next
/// successful bulk read.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Result of the last completed bulk read. Replaced atomically as a
/// whole -- a reader can never observe values from two different reads.
#[derive(Debug, Clone)]
pub struct NodeCache {
    pub read_at: DateTime<Utc>,
    pub values: IndexMap<String, NodeValue>,
}

/// The discovered address space of one controller.
///
/// Built once per successful connection and replaced wholesale on every
/// reconnect; descriptors from an older session are never merged in.
#[derive(Debug, Clone, Default)]
pub struct NodeMap {
    entries: IndexMap<String, NodeDescriptor>,
}

impl NodeMap {
    pub(crate) fn from_discovery(discovered: Vec<NodeDescriptor>) -> Self {
        let mut entries = IndexMap::with_capacity(discovered.len());
        for descriptor in discovered {
            if let Some(previous) = entries.insert(descriptor.name.clone(), descriptor) {
                warn!(node = %previous.name, "duplicate browse name in discovery, keeping latest");
            }
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&NodeDescriptor> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn addresses(&self) -> Vec<NodeAddress> {
        self.entries.values().map(|d| d.address.clone()).collect()
    }

    /// The ordered family `base[0]`, `base[1]`, ... of indexed sibling
    /// nodes, stopping at the first gap.
    pub fn indexed_family(&self, base: &str) -> Vec<NodeDescriptor> {
        let mut family = Vec::new();
        loop {
            let name = format!("{base}[{}]", family.len());
            let Some(descriptor) = self.entries.get(&name) else {
                break;
            };
            family.push(descriptor.clone());
        }
        family
    }
}

// ── Write envelope ───────────────────────────────────────────────────

/// A validated, typed batch of writes routed into the driving loop.
pub(crate) struct WriteEnvelope {
    pub writes: Vec<(NodeDescriptor, NodeValue)>,
    pub respond_to: oneshot::Sender<Vec<WriteOutcome>>,
}

// ── ControllerConnection ─────────────────────────────────────────────

/// Handle to one controller's connection. Cheaply cloneable.
#[derive(Clone)]
pub struct ControllerConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    endpoint: ControllerEndpoint,
    options: GatewayOptions,
    factory: Arc<dyn SessionFactory>,
    state: watch::Sender<LinkState>,
    server_name: ArcSwap<String>,
    node_map: ArcSwapOption<NodeMap>,
    cache: ArcSwapOption<NodeCache>,
    fault: ArcSwapOption<FaultRecord>,
    write_tx: mpsc::Sender<WriteEnvelope>,
    write_rx: Mutex<Option<mpsc::Receiver<WriteEnvelope>>>,
    cancel: CancellationToken,
}

impl ControllerConnection {
    pub fn new(
        endpoint: ControllerEndpoint,
        options: GatewayOptions,
        factory: Arc<dyn SessionFactory>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (write_tx, write_rx) = mpsc::channel(WRITE_CHANNEL_SIZE);

        Self {
            inner: Arc::new(ConnectionInner {
                endpoint,
                options,
                factory,
                state,
                server_name: ArcSwap::from_pointee(String::new()),
                node_map: ArcSwapOption::empty(),
                cache: ArcSwapOption::empty(),
                fault: ArcSwapOption::empty(),
                write_tx,
                write_rx: Mutex::new(Some(write_rx)),
                cancel,
            }),
        }
    }

    /// Start the driving loop. Returns `None` if it was already started.
    pub(crate) fn spawn(&self) -> Option<JoinHandle<()>> {
        let rx = self
            .inner
            .write_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()?;
        let conn = self.clone();
        Some(tokio::spawn(run_loop(conn, rx)))
    }

    pub fn endpoint(&self) -> &ControllerEndpoint {
        &self.inner.endpoint
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Observe lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// [`Self::watch_state`] as a stream, yielding the current state
    /// first. Convenient for outer surfaces that multiplex state
    /// changes with other event sources.
    pub fn state_stream(&self) -> WatchStream<LinkState> {
        WatchStream::new(self.inner.state.subscribe())
    }

    /// The controller's self-reported display name; empty until the
    /// first successful connect, or when the device exposes none.
    pub fn server_name(&self) -> Arc<String> {
        self.inner.server_name.load_full()
    }

    pub fn node_map(&self) -> Option<Arc<NodeMap>> {
        self.inner.node_map.load_full()
    }

    pub fn cache(&self) -> Option<Arc<NodeCache>> {
        self.inner.cache.load_full()
    }

    pub fn fault(&self) -> Option<Arc<FaultRecord>> {
        self.inner.fault.load_full()
    }

    /// Route a typed write batch into the driving loop and await the
    /// per-node outcomes.
    pub(crate) async fn dispatch(
        &self,
        writes: Vec<(NodeDescriptor, NodeValue)>,
    ) -> Result<Vec<WriteOutcome>, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .write_tx
            .send(WriteEnvelope {
                writes,
                respond_to: tx,
            })
            .await
            .map_err(|_| self.unavailable())?;

        match tokio::time::timeout(self.inner.options.write_timeout, rx).await {
            Ok(Ok(outcomes)) => Ok(outcomes),
            Ok(Err(_)) => Err(self.unavailable()),
            Err(_) => Err(CoreError::Internal(format!(
                "write to {} timed out after {:?}",
                self.inner.endpoint.id, self.inner.options.write_timeout
            ))),
        }
    }

    fn unavailable(&self) -> CoreError {
        CoreError::ControllerUnavailable {
            address: self.inner.endpoint.address.to_string(),
            state: self.state(),
        }
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!(controller = %self.inner.endpoint.id, from = %previous, to = %state, "state change");
        }
    }

    /// Record a fault and drive the state machine to `Error`.
    fn fail(&self, message: String) {
        warn!(controller = %self.inner.endpoint.id, error = %message, "controller fault");
        self.inner.fault.store(Some(Arc::new(FaultRecord {
            at: Utc::now(),
            message,
        })));
        self.set_state(LinkState::Error);
    }
}

// ── Driving loop ─────────────────────────────────────────────────────

/// Per-connection loop: reconnect when eligible, poll while connected,
/// service write envelopes in between, and exit only on the stop signal.
/// A failed iteration never terminates the loop.
async fn run_loop(conn: ControllerConnection, mut write_rx: mpsc::Receiver<WriteEnvelope>) {
    let cancel = conn.inner.cancel.clone();
    let options = conn.inner.options.clone();
    let mut session: Option<Box<dyn NodeSession>> = None;
    let mut next_attempt = Instant::now();

    'outer: loop {
        if cancel.is_cancelled() {
            break;
        }

        match conn.state() {
            LinkState::Disconnected => {
                let wait = next_attempt.saturating_duration_since(Instant::now());
                if !wait.is_zero() {
                    // Writes that arrive during the reconnect wait are
                    // refused immediately; holding them for a delayed
                    // replay on the device would be far worse than a
                    // prompt failure.
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break 'outer,
                        envelope = write_rx.recv() => {
                            if let Some(envelope) = envelope {
                                refuse_envelope(&conn, envelope);
                            }
                        }
                        () = tokio::time::sleep(wait) => {}
                    }
                    continue;
                }

                conn.set_state(LinkState::Connecting);
                info!(
                    controller = %conn.inner.endpoint.id,
                    address = %conn.inner.endpoint.address,
                    "connecting"
                );
                match connect_and_discover(&conn).await {
                    Ok(opened) => {
                        session = Some(opened);
                        conn.set_state(LinkState::Connected);
                        info!(controller = %conn.inner.endpoint.id, "connected");
                    }
                    Err(reason) => conn.fail(
                        CoreError::ConnectionFailed {
                            address: conn.inner.endpoint.address.to_string(),
                            reason,
                        }
                        .to_string(),
                    ),
                }
            }

            LinkState::Error => {
                next_attempt = Instant::now() + options.reconnect_delay;
                fail_pending_writes(&conn, &mut write_rx);
                safe_disconnect(&conn, session.take()).await;
                conn.set_state(LinkState::Disconnected);
            }

            LinkState::Connected => {
                session = serve_connected(&conn, session, &mut write_rx, &cancel).await;
            }

            // The loop never rests in these states.
            LinkState::Connecting | LinkState::Stopped => break,
        }
    }

    fail_pending_writes(&conn, &mut write_rx);
    safe_disconnect(&conn, session.take()).await;
    conn.set_state(LinkState::Stopped);
    info!(controller = %conn.inner.endpoint.id, "connection loop stopped");
}

/// Open a session and rebuild the node map from a full discovery pass.
/// The previous map and cache are discarded on success -- data from an
/// older session never survives a reconnect.
async fn connect_and_discover(conn: &ControllerConnection) -> Result<Box<dyn NodeSession>, String> {
    let factory = Arc::clone(&conn.inner.factory);
    let endpoint = conn.inner.endpoint.address.clone();
    let root = conn.inner.options.root_node.clone();

    let joined = tokio::task::spawn_blocking(move || {
        let mut session = factory.connect(&endpoint)?;
        let server_name = session.server_name();
        let discovered = session.browse(&root)?;
        Ok::<_, fieldgate_proto::ProtoError>((session, server_name, discovered))
    })
    .await;

    match joined {
        Ok(Ok((session, server_name, discovered))) => {
            let map = NodeMap::from_discovery(discovered);
            info!(
                controller = %conn.inner.endpoint.id,
                nodes = map.len(),
                "node map built"
            );
            conn.inner
                .server_name
                .store(Arc::new(server_name.unwrap_or_default()));
            conn.inner.node_map.store(Some(Arc::new(map)));
            conn.inner.cache.store(None);
            Ok(session)
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(join) => Err(format!("connect task failed: {join}")),
    }
}

/// Poll and service writes until the state leaves `Connected` or the
/// stop signal fires. Returns the session (if still held) to the caller.
async fn serve_connected(
    conn: &ControllerConnection,
    mut session: Option<Box<dyn NodeSession>>,
    write_rx: &mut mpsc::Receiver<WriteEnvelope>,
    cancel: &CancellationToken,
) -> Option<Box<dyn NodeSession>> {
    let mut ticker = tokio::time::interval(conn.inner.options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return session,
            envelope = write_rx.recv() => {
                let Some(envelope) = envelope else { return session };
                session = perform_writes(conn, session, envelope).await;
            }
            _ = ticker.tick() => {
                session = read_all(conn, session).await;
            }
        }

        if conn.state() != LinkState::Connected {
            return session;
        }
    }
}

/// One bulk read over the whole node map. All-or-nothing: on success
/// the cache is replaced atomically and the fault record cleared; on
/// failure the cache is left untouched and the connection goes to `Error`.
async fn read_all(
    conn: &ControllerConnection,
    session: Option<Box<dyn NodeSession>>,
) -> Option<Box<dyn NodeSession>> {
    let Some(sess) = session else {
        conn.fail("no open session for bulk read".into());
        return None;
    };
    let Some(map) = conn.node_map() else {
        conn.fail("no node map for bulk read".into());
        return Some(sess);
    };

    let names: Vec<String> = map.names().map(str::to_owned).collect();
    let addresses = map.addresses();

    let mut sess = sess;
    let joined = tokio::task::spawn_blocking(move || {
        let result = sess.read_values(&addresses);
        (sess, result)
    })
    .await;

    match joined {
        Ok((sess, Ok(values))) => {
            let values: IndexMap<String, NodeValue> = names.into_iter().zip(values).collect();
            debug!(
                controller = %conn.inner.endpoint.id,
                nodes = values.len(),
                "bulk read complete"
            );
            conn.inner.cache.store(Some(Arc::new(NodeCache {
                read_at: Utc::now(),
                values,
            })));
            conn.inner.fault.store(None);
            Some(sess)
        }
        Ok((sess, Err(e))) => {
            conn.fail(
                CoreError::ReadFailed {
                    controller: conn.inner.endpoint.id.clone(),
                    reason: e.to_string(),
                }
                .to_string(),
            );
            Some(sess)
        }
        Err(join) => {
            conn.fail(format!("read task failed: {join}"));
            None
        }
    }
}

/// Execute a validated write batch, one independent node write at a
/// time, and reply with the per-node outcomes. Any protocol-level
/// failure also drives the connection to `Error` after the reply.
async fn perform_writes(
    conn: &ControllerConnection,
    session: Option<Box<dyn NodeSession>>,
    envelope: WriteEnvelope,
) -> Option<Box<dyn NodeSession>> {
    let WriteEnvelope { writes, respond_to } = envelope;
    let mut outcomes = Vec::with_capacity(writes.len());
    let mut last_error: Option<String> = None;
    let mut session = session;

    for (descriptor, value) in writes {
        let Some(mut sess) = session.take() else {
            outcomes.push(WriteOutcome::failed(&descriptor.name, "session lost"));
            last_error.get_or_insert_with(|| "session lost".into());
            continue;
        };

        let address = descriptor.address.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = sess.write_value(&address, value);
            (sess, result)
        })
        .await;

        match joined {
            Ok((sess, Ok(()))) => {
                info!(
                    controller = %conn.inner.endpoint.id,
                    node = %descriptor.name,
                    "write ok"
                );
                outcomes.push(WriteOutcome::ok(&descriptor.name));
                session = Some(sess);
            }
            Ok((sess, Err(e))) => {
                warn!(
                    controller = %conn.inner.endpoint.id,
                    node = %descriptor.name,
                    error = %e,
                    "write failed"
                );
                outcomes.push(WriteOutcome::failed(&descriptor.name, e.to_string()));
                last_error = Some(e.to_string());
                session = Some(sess);
            }
            Err(join) => {
                let message = format!("write task failed: {join}");
                outcomes.push(WriteOutcome::failed(&descriptor.name, &message));
                last_error = Some(message);
            }
        }
    }

    if let Some(message) = last_error {
        conn.fail(message);
    }
    let _ = respond_to.send(outcomes);
    session
}

/// Answer one write envelope that cannot be serviced.
fn refuse_envelope(conn: &ControllerConnection, envelope: WriteEnvelope) {
    let WriteEnvelope { writes, respond_to } = envelope;
    let outcomes = writes
        .iter()
        .map(|(descriptor, _)| WriteOutcome::failed(&descriptor.name, "controller not connected"))
        .collect();
    let _ = respond_to.send(outcomes);
    debug!(controller = %conn.inner.endpoint.id, "refused write envelope");
}

/// Answer queued write envelopes that can no longer be serviced.
fn fail_pending_writes(conn: &ControllerConnection, write_rx: &mut mpsc::Receiver<WriteEnvelope>) {
    while let Ok(envelope) = write_rx.try_recv() {
        refuse_envelope(conn, envelope);
    }
}

/// Best-effort session teardown under a hard deadline. Protocol stacks
/// are known to hang for tens of seconds in their polite goodbye; we
/// bound the wait and abandon the handle if it elapses.
async fn safe_disconnect(conn: &ControllerConnection, session: Option<Box<dyn NodeSession>>) {
    let Some(mut sess) = session else { return };
    let deadline = conn.inner.options.disconnect_timeout;

    let closed = tokio::time::timeout(
        deadline,
        tokio::task::spawn_blocking(move || sess.close()),
    )
    .await;

    match closed {
        Ok(Ok(())) => debug!(controller = %conn.inner.endpoint.id, "session closed"),
        Ok(Err(join)) => {
            warn!(controller = %conn.inner.endpoint.id, error = %join, "close task failed");
        }
        Err(_) => warn!(
            controller = %conn.inner.endpoint.id,
            deadline_ms = deadline.as_millis() as u64,
            "session close deadline elapsed, abandoning handle"
        ),
    }
}
