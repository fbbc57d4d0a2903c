//! Broker client core.
//!
//! # Purpose
//! Owns the per-client tables, the outbound send paths with response
//! correlation, and the duplicate family. One *parent* client owns the
//! WebSocket; *duplicates* share it with independent identities and tables.
//!
//! # Design notes
//! Response correlation is a typed map from message id to a single-shot
//! waiter; a timed-out id is removed from the map and a late response finds
//! no slot. Duplicates reach the parent's transport only through methods,
//! never a stored writer, and the parent holds them weakly.
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use hublink_wire::{self as wire, Message, MessageKind};

use crate::api::ApiTarget;
use crate::config::BrokerConfig;
use crate::error::{ClientError, Result};
use crate::handler::{
    ApiHandler, Args, EventHandler, RegisteredHandler, SubscriptionEntry, event_handler,
};
use crate::signal::{ClientSignal, SIGNAL_BUS_CAPACITY};
use crate::state::ClientState;

mod connection;
mod dispatch;

pub(crate) use dispatch::dispatch_frame;

/// Local names handled by the call façade; registering them would shadow it.
pub(crate) const RESERVED_LOCAL_NAMES: [&str; 6] =
    ["emit", "on", "off", "once", "callTimeout", "excludeClients"];

/// Construction options for a parent client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// This module's `vendor.module` name.
    pub module_name: String,
    /// WebSocket path on the hub.
    pub web_socket_url: String,
    pub config: BrokerConfig,
}

impl ClientOptions {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            web_socket_url: crate::bootstrap::DEFAULT_WS_PATH.to_string(),
            config: BrokerConfig::from_env(),
        }
    }
}

/// Hub endpoint for `connect`. Explicit host and port are required on
/// non-browser hosts; there is no ambient fallback.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: Option<u16>,
    pub tls: bool,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
        }
    }
}

pub(crate) enum WriterCommand {
    Text(String),
    Pong(Vec<u8>),
    Close,
}

pub(crate) struct ParentState {
    duplicates: Mutex<Vec<Weak<ClientInner>>>,
    writer: Mutex<Option<mpsc::Sender<WriterCommand>>>,
    last_connect: Mutex<Option<ConnectOptions>>,
    supervisor_running: AtomicBool,
    reconnect_now: tokio::sync::Notify,
}

pub(crate) enum FamilyRole {
    Parent(ParentState),
    Duplicate { parent: Arc<ClientInner> },
}

pub(crate) struct ClientInner {
    pub(crate) module_name: String,
    pub(crate) web_socket_url: String,
    pub(crate) config: BrokerConfig,
    pub(crate) state: Mutex<ClientState>,
    pub(crate) signals: broadcast::Sender<ClientSignal>,
    pub(crate) server_module: Mutex<Option<String>>,
    /// Connection flag; meaningful on the parent, duplicates delegate.
    pub(crate) connected: watch::Sender<bool>,
    pub(crate) destroyed: AtomicBool,
    pub(crate) role: FamilyRole,
}

impl ClientInner {
    fn new_parent(options: ClientOptions) -> Arc<Self> {
        let (signals, _) = broadcast::channel(SIGNAL_BUS_CAPACITY);
        let (connected, _) = watch::channel(false);
        Arc::new(Self {
            module_name: options.module_name,
            web_socket_url: options.web_socket_url,
            config: options.config,
            state: Mutex::new(ClientState::default()),
            signals,
            server_module: Mutex::new(None),
            connected,
            destroyed: AtomicBool::new(false),
            role: FamilyRole::Parent(ParentState {
                duplicates: Mutex::new(Vec::new()),
                writer: Mutex::new(None),
                last_connect: Mutex::new(None),
                supervisor_running: AtomicBool::new(false),
                reconnect_now: tokio::sync::Notify::new(),
            }),
        })
    }

    /// The transport-owning member of the family (self, for a parent).
    pub(crate) fn family_parent(&self) -> &ClientInner {
        match &self.role {
            FamilyRole::Parent(_) => self,
            FamilyRole::Duplicate { parent } => parent.as_ref(),
        }
    }

    pub(crate) fn is_parent(&self) -> bool {
        matches!(self.role, FamilyRole::Parent(_))
    }

    pub(crate) fn parent_state(&self) -> Option<&ParentState> {
        match &self.role {
            FamilyRole::Parent(state) => Some(state),
            FamilyRole::Duplicate { .. } => None,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        *self.family_parent().connected.borrow()
    }

    pub(crate) fn emit_signal(&self, signal: ClientSignal) {
        let _ = self.signals.send(signal);
    }

    /// Live duplicates of this parent, pruning dropped ones.
    pub(crate) fn live_duplicates(&self) -> Vec<Arc<ClientInner>> {
        let Some(parent_state) = self.parent_state() else {
            return Vec::new();
        };
        let mut slots = parent_state.duplicates.lock().expect("duplicates lock");
        let mut live = Vec::with_capacity(slots.len());
        slots.retain(|slot| match slot.upgrade() {
            Some(duplicate) if !duplicate.destroyed.load(Ordering::SeqCst) => {
                live.push(duplicate);
                true
            }
            _ => false,
        });
        live
    }

    pub(crate) fn has_duplicate_named(&self, module_name: &str) -> bool {
        self.live_duplicates()
            .iter()
            .any(|duplicate| duplicate.module_name == module_name)
    }

    fn remove_duplicate(&self, target: &ClientInner) {
        if let Some(parent_state) = self.parent_state() {
            parent_state
                .duplicates
                .lock()
                .expect("duplicates lock")
                .retain(|slot| {
                    slot.upgrade()
                        .is_some_and(|duplicate| !std::ptr::eq(duplicate.as_ref(), target))
                });
        }
    }

    fn make_duplicate(self: &Arc<Self>, module_name: &str) -> Result<Arc<ClientInner>> {
        if !wire::is_module_name(module_name) {
            return Err(ClientError::validation(format!(
                "module name must be \"vendor.module\", got {module_name:?}"
            )));
        }
        // Duplicates of duplicates attach to the original parent.
        let parent = match &self.role {
            FamilyRole::Parent(_) => Arc::clone(self),
            FamilyRole::Duplicate { parent } => Arc::clone(parent),
        };
        let (signals, _) = broadcast::channel(SIGNAL_BUS_CAPACITY);
        let (connected, _) = watch::channel(false);
        let duplicate = Arc::new(ClientInner {
            module_name: module_name.to_string(),
            web_socket_url: parent.web_socket_url.clone(),
            config: parent.config.clone(),
            state: Mutex::new(ClientState::default()),
            signals,
            server_module: Mutex::new(parent.server_module.lock().expect("server lock").clone()),
            connected,
            destroyed: AtomicBool::new(false),
            role: FamilyRole::Duplicate {
                parent: Arc::clone(&parent),
            },
        });
        let FamilyRole::Parent(parent_state) = &parent.role else {
            unreachable!("family parent is always a parent");
        };
        parent_state
            .duplicates
            .lock()
            .expect("duplicates lock")
            .push(Arc::downgrade(&duplicate));
        Ok(duplicate)
    }

    fn writer(&self) -> Option<mpsc::Sender<WriterCommand>> {
        self.family_parent()
            .parent_state()
            .and_then(|parent_state| parent_state.writer.lock().expect("writer lock").clone())
    }

    async fn write_frame(&self, text: String) -> Result<()> {
        let Some(writer) = self.writer() else {
            return Err(ClientError::NotConnected);
        };
        writer
            .send(WriterCommand::Text(text))
            .await
            .map_err(|_| ClientError::Transport("writer task stopped".into()))
    }

    /// Stamp id, send time, and sender. A relayed message keeps the original
    /// sender so the far side sees where the traffic came from.
    fn finalize(&self, message: &mut Message, relayed: bool) {
        message.id = Some(wire::new_id());
        message.time = Some(wire::now_millis());
        if !relayed || message.module_name.is_none() {
            message.module_name = Some(self.module_name.clone());
        }
    }

    fn encode_checked(&self, message: &Message) -> Result<String> {
        let encoded = message.encode()?;
        if encoded.len() > self.config.max_packet_size {
            // Oversize packets still go out; the transport has the final say.
            metrics::counter!("hublink_client_oversize_packets_total").increment(1);
            tracing::trace!(
                module = %self.module_name,
                size = encoded.len(),
                cap = self.config.max_packet_size,
                "outbound packet exceeds the configured maximum"
            );
        }
        Ok(encoded)
    }

    /// Fire-and-forget send for events and responses.
    pub(crate) async fn post(&self, mut message: Message, relayed: bool) -> Result<()> {
        self.finalize(&mut message, relayed);
        let encoded = self.encode_checked(&message)?;
        self.write_frame(encoded).await
    }

    /// Send a message and await its correlated response.
    pub(crate) async fn request(
        &self,
        mut message: Message,
        call_override: Option<Duration>,
        relayed: bool,
    ) -> Result<Args> {
        self.finalize(&mut message, relayed);
        let deadline = self.config.effective_timeout(call_override, message.timeout);
        self.await_connected(deadline).await?;

        let id = message.id.clone().expect("finalize assigns an id");
        let kind = message.kind.clone();
        let encoded = self.encode_checked(&message)?;
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.state
            .lock()
            .expect("state lock")
            .pending
            .insert(id.clone(), waiter_tx);
        if let Err(err) = self.write_frame(encoded).await {
            self.state.lock().expect("state lock").pending.remove(&id);
            return Err(err);
        }
        metrics::counter!("hublink_client_requests_total").increment(1);

        match tokio::time::timeout(deadline, waiter_rx).await {
            Err(_elapsed) => {
                // Tear the waiter down; a late response is dropped at dispatch.
                self.state.lock().expect("state lock").pending.remove(&id);
                metrics::counter!("hublink_client_request_timeouts_total").increment(1);
                tracing::debug!(module = %self.module_name, request = %kind, "request timed out");
                Err(ClientError::Timeout)
            }
            Ok(Err(_dropped)) => Err(ClientError::Transport(
                "connection lost while awaiting response".into(),
            )),
            Ok(Ok(response)) => {
                if response.success == Some(false) {
                    let remote = response
                        .data
                        .as_deref()
                        .and_then(|data| data.first())
                        .and_then(|value| value.get("error"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let text = remote.unwrap_or_else(|| {
                        let sender = response.module_name.as_deref().unwrap_or("server");
                        format!("{sender}'s \"{kind}\" request has failed")
                    });
                    Err(self.surface_rpc_error(ClientError::Broker(text)))
                } else {
                    Ok(response.data.unwrap_or_default())
                }
            }
        }
    }

    /// Broadcast a remote failure to attached observers; the `Result` path
    /// still carries the error either way.
    fn surface_rpc_error(&self, err: ClientError) -> ClientError {
        if self.signals.receiver_count() > 0 {
            let _ = self.signals.send(ClientSignal::RpcError {
                message: err.to_string(),
            });
        }
        err
    }

    /// Answer `original`, echoing its correlation fields. A relayed response
    /// names the module the caller addressed as its sender. Missing socket
    /// is a silent no-op.
    pub(crate) async fn respond(
        &self,
        original: &Message,
        success: bool,
        data: Args,
        relayed: bool,
    ) {
        let mut response = Message::new(MessageKind::Response);
        response.request_id = original.id.clone();
        response.timeout = original.timeout;
        response.instigator_id = original.instigator_id.clone();
        response.target_module_name = original.module_name.clone();
        response.success = Some(success);
        response.data = Some(data);
        if relayed {
            response.module_name = original.target_module_name.clone();
        }
        match self.post(response, relayed).await {
            Ok(()) | Err(ClientError::NotConnected) => {}
            Err(err) => {
                tracing::warn!(module = %self.module_name, error = %err, "failed to send response");
            }
        }
    }

    async fn await_connected(&self, deadline: Duration) -> Result<()> {
        let mut connected = self.family_parent().connected.subscribe();
        if *connected.borrow() {
            return Ok(());
        }
        match tokio::time::timeout(deadline, connected.wait_for(|flag| *flag)).await {
            Err(_elapsed) => Err(ClientError::Timeout),
            Ok(Err(_closed)) => Err(ClientError::Destroyed),
            Ok(Ok(_)) => Ok(()),
        }
    }

    /// Add a subscription entry and, unless suppressed, tell the owning
    /// module. Subscription timeouts are expected noise and only logged.
    pub(crate) async fn subscribe(
        &self,
        event_name: &str,
        handler: EventHandler,
        send_message: bool,
        once: bool,
    ) -> Result<()> {
        let message = Message::subscription(true, event_name)?;
        self.state
            .lock()
            .expect("state lock")
            .add_subscription(event_name, SubscriptionEntry { handler, once });
        if send_message {
            match self.request(message, None, false).await {
                Ok(_) | Err(ClientError::Timeout) | Err(ClientError::NotConnected) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub(crate) async fn unsubscribe(
        &self,
        event_name: &str,
        handler: Option<&EventHandler>,
        send_message: bool,
    ) -> Result<()> {
        let message = Message::subscription(false, event_name)?;
        self.state
            .lock()
            .expect("state lock")
            .remove_subscription(event_name, handler);
        if send_message {
            match self.request(message, None, false).await {
                Ok(_) | Err(ClientError::Timeout) | Err(ClientError::NotConnected) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Re-announce every table entry to the hub, in the background.
    pub(crate) fn spawn_resubscribe_all(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let events = inner.state.lock().expect("state lock").subscribed_events();
            for event_name in events {
                let Ok(message) = Message::subscription(true, &event_name) else {
                    continue;
                };
                if let Err(err) = inner.request(message, None, false).await {
                    tracing::debug!(
                        module = %inner.module_name,
                        event = %event_name,
                        error = %err,
                        "resubscribe failed"
                    );
                }
            }
        });
    }

    /// Drop an expired `once` entry that never fired so it cannot leak.
    pub(crate) fn spawn_once_expiry(
        self: &Arc<Self>,
        event_name: String,
        handler: EventHandler,
        expiry: Duration,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            let Some(inner) = weak.upgrade() else { return };
            let removed = {
                let mut state = inner.state.lock().expect("state lock");
                state.remove_subscription(&event_name, Some(&handler))
            };
            if removed {
                tracing::debug!(
                    module = %inner.module_name,
                    event = %event_name,
                    "one-shot subscription expired unfired"
                );
                let gone = !inner
                    .state
                    .lock()
                    .expect("state lock")
                    .subscriptions
                    .contains_key(&event_name);
                if gone && let Ok(message) = Message::subscription(false, &event_name) {
                    let _ = inner.request(message, None, false).await;
                }
            }
        });
    }

    /// (Re)install subscriptions for the hub's module lifecycle events.
    /// Idempotent: prior entries for the two names are removed first.
    pub(crate) async fn install_server_subscriptions(self: &Arc<Self>, server: &str) {
        let connect_event = format!("{server}.{}", wire::MODULE_CONNECT_EVENT);
        let disconnect_event = format!("{server}.{}", wire::MODULE_DISCONNECT_EVENT);
        {
            let mut state = self.state.lock().expect("state lock");
            state.remove_subscription(&connect_event, None);
            state.remove_subscription(&disconnect_event, None);
        }

        let weak = Arc::downgrade(self);
        let on_peer_connect = event_handler(move |args| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let peer = peer_name(args);
            inner.emit_signal(ClientSignal::PeerConnected { module_name: peer });
            // A newly appeared peer may own events we subscribe to.
            inner.spawn_resubscribe_all();
            Ok(())
        });
        let weak = Arc::downgrade(self);
        let on_peer_disconnect = event_handler(move |args| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let peer = peer_name(args);
            inner.emit_signal(ClientSignal::PeerDisconnected { module_name: peer });
            Ok(())
        });

        if let Err(err) = self.subscribe(&connect_event, on_peer_connect, true, false).await {
            tracing::debug!(module = %self.module_name, error = %err, "moduleconnect subscribe failed");
        }
        if let Err(err) = self
            .subscribe(&disconnect_event, on_peer_disconnect, true, false)
            .await
        {
            tracing::debug!(module = %self.module_name, error = %err, "moduledisconnect subscribe failed");
        }
    }

    pub(crate) fn register_api_handler_entry(
        &self,
        local_name: &str,
        handler: ApiHandler,
    ) -> Result<bool> {
        if local_name.is_empty() || local_name.contains('.') {
            return Err(ClientError::validation(format!(
                "handler name must be a plain local name, got {local_name:?}"
            )));
        }
        if RESERVED_LOCAL_NAMES.contains(&local_name) {
            return Err(ClientError::validation(format!(
                "{local_name:?} is reserved and cannot be registered"
            )));
        }
        let key = format!("{}.{local_name}", self.module_name);
        Ok(self
            .state
            .lock()
            .expect("state lock")
            .install_handler(key, RegisteredHandler { handler, relay: false }))
    }

    /// Record `target` as a registrar and announce this client's handler
    /// keys to it. Re-run automatically on every (re)connect.
    pub(crate) async fn register_handlers_to_remote(&self, target: &str) -> Result<()> {
        if !wire::is_module_name(target) {
            return Err(ClientError::validation(format!(
                "registrar must be \"vendor.module\", got {target:?}"
            )));
        }
        let keys = {
            let mut state = self.state.lock().expect("state lock");
            state.registrars.insert(target.to_string());
            state.handler_keys()
        };
        let data = keys.into_iter().map(Value::String).collect();
        let message = Message::method(target, wire::REGISTER_HANDLERS_METHOD, data);
        self.request(message, None, false).await.map(|_| ())
    }

    /// Withdraw this client's keys from every registrar; mirrors
    /// [`ClientInner::register_handlers_to_remote`] per registrar.
    pub(crate) async fn deregister_handlers_from_remotes(&self) {
        let (registrars, keys) = {
            let state = self.state.lock().expect("state lock");
            (
                state.registrars.iter().cloned().collect::<Vec<_>>(),
                state.handler_keys(),
            )
        };
        for registrar in registrars {
            let data = keys.iter().cloned().map(Value::String).collect();
            let message = Message::method(&registrar, wire::DEREGISTER_HANDLERS_METHOD, data);
            if let Err(err) = self.request(message, None, false).await {
                tracing::debug!(
                    module = %self.module_name,
                    registrar = %registrar,
                    error = %err,
                    "handler deregistration failed"
                );
            }
        }
    }

    pub(crate) async fn ping_server(&self) -> Result<Args> {
        let mut message = Message::new(MessageKind::Ping);
        message.target_module_name = self.server_module.lock().expect("server lock").clone();
        self.request(message, None, false).await
    }

    async fn destroy(self: &Arc<Self>) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        match &self.role {
            FamilyRole::Duplicate { parent } => {
                self.deregister_handlers_from_remotes().await;
                let events = self.state.lock().expect("state lock").subscribed_events();
                for event_name in events {
                    let _ = self.unsubscribe(&event_name, None, true).await;
                }
                // Tell the hub this identity is going away.
                let farewell =
                    Message::event(&format!("{}.disconnect", self.module_name), Vec::new());
                let _ = self.post(farewell, false).await;
                self.emit_signal(ClientSignal::Destroy);
                parent.remove_duplicate(self);
            }
            FamilyRole::Parent(parent_state) => {
                // Wake the supervisor; it observes the flag and stops. The
                // permit survives even when the read loop is mid-dispatch.
                parent_state.reconnect_now.notify_one();
                let writer = parent_state.writer.lock().expect("writer lock").take();
                if let Some(writer) = writer {
                    let _ = writer.send(WriterCommand::Close).await;
                }
                self.emit_signal(ClientSignal::Destroy);
            }
        }
        // In-flight waiters observe the teardown instead of hanging.
        self.state.lock().expect("state lock").pending.clear();
    }
}

fn peer_name(args: &[Value]) -> String {
    args.first()
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Handle every module embeds to participate in the broker.
///
/// Cheap to clone; all clones share one client.
///
/// ```no_run
/// use hublink_client::{ClientOptions, ConnectOptions, HubClient};
///
/// # async fn demo() -> hublink_client::Result<()> {
/// let client = HubClient::new(ClientOptions::new("acme.sum"));
/// client.connect(ConnectOptions::new("127.0.0.1", Some(9600)))?;
/// client.wait_connected(None).await?;
/// let sum = client.api("acme", "calc").call("add", vec![3.into(), 5.into()]).await?;
/// assert_eq!(sum, vec![serde_json::Value::from(8)]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<ClientInner>,
}

impl HubClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            inner: ClientInner::new_parent(options),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub fn module_name(&self) -> &str {
        &self.inner.module_name
    }

    /// Open the hub connection. Returns immediately; readiness is observed
    /// via [`HubClient::wait_connected`] or the `Connect` signal. Reconnects
    /// with the same options run until [`HubClient::destroy`].
    pub fn connect(&self, options: ConnectOptions) -> Result<()> {
        connection::connect(&self.inner, options)
    }

    /// Drop the current socket; the supervisor dials again.
    pub fn force_reconnect(&self) {
        if let Some(parent_state) = self.inner.family_parent().parent_state() {
            parent_state.reconnect_now.notify_one();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Block until the transport is open. `None` waits without a deadline.
    pub async fn wait_connected(&self, timeout: Option<Duration>) -> Result<()> {
        if self.inner.is_connected() {
            return Ok(());
        }
        let mut connected = self.inner.family_parent().connected.subscribe();
        let wait = connected.wait_for(|flag| *flag);
        match timeout {
            Some(deadline) if !deadline.is_zero() => {
                match tokio::time::timeout(deadline, wait).await {
                    Err(_elapsed) => Err(ClientError::Timeout),
                    Ok(Err(_closed)) => Err(ClientError::Destroyed),
                    Ok(Ok(_)) => Ok(()),
                }
            }
            _ => wait.await.map(|_| ()).map_err(|_| ClientError::Destroyed),
        }
    }

    /// Subscribe to this client's lifecycle and control signals.
    pub fn signals(&self) -> broadcast::Receiver<ClientSignal> {
        self.inner.signals.subscribe()
    }

    /// Module name of the hub, learned from its first ping.
    pub fn server_module_name(&self) -> Option<String> {
        self.inner.server_module.lock().expect("server lock").clone()
    }

    /// Create a sibling client sharing this connection under its own
    /// identity and tables.
    pub fn duplicate(&self, module_name: &str) -> Result<HubClient> {
        self.inner.make_duplicate(module_name).map(Self::from_inner)
    }

    /// Round-trip a ping through the hub.
    pub async fn ping(&self) -> Result<Args> {
        self.inner.ping_server().await
    }

    pub async fn destroy(&self) {
        self.inner.destroy().await;
    }

    /// Entry point of the call façade: a target bound to
    /// `vendor.module` with default call options.
    pub fn api(&self, vendor: &str, module: &str) -> ApiTarget {
        ApiTarget::new(Arc::clone(&self.inner), vendor, module)
    }

    /// Install a method handler at `<self>.<name>`. Returns `false` when the
    /// key is taken (the existing handler stays). Reserved names are
    /// rejected.
    pub fn register_api_handler(&self, name: &str, handler: ApiHandler) -> Result<bool> {
        self.inner.register_api_handler_entry(name, handler)
    }

    /// Bulk-install handlers, then announce them to `remote`
    /// (default `hub.core`).
    pub async fn register_api_handlers(
        &self,
        handlers: impl IntoIterator<Item = (String, ApiHandler)>,
        remote: Option<&str>,
    ) -> Result<()> {
        for (name, handler) in handlers {
            self.inner.register_api_handler_entry(&name, handler)?;
        }
        self.register_handlers_to_remote(remote.unwrap_or("hub.core"))
            .await
    }

    pub async fn register_handlers_to_remote(&self, target: &str) -> Result<()> {
        self.inner.register_handlers_to_remote(target).await
    }

    pub async fn subscribe_to_api_event(
        &self,
        event_name: &str,
        handler: EventHandler,
    ) -> Result<()> {
        self.inner.subscribe(event_name, handler, true, false).await
    }

    pub async fn unsubscribe_from_api_event(
        &self,
        event_name: &str,
        handler: Option<&EventHandler>,
    ) -> Result<()> {
        self.inner.unsubscribe(event_name, handler, true).await
    }

    pub async fn unsubscribe_from_all_events(&self) -> Result<()> {
        let events = self
            .inner
            .state
            .lock()
            .expect("state lock")
            .subscribed_events();
        for event_name in events {
            self.inner.unsubscribe(&event_name, None, true).await?;
        }
        Ok(())
    }
}
