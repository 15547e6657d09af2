//! Connection and subscription registry.
//!
//! One registry instance owns one connection per endpoint and the
//! subscription table that routes inbound command results to the correct
//! subscriber set. Handles:
//!
//! - Lazy connection establishment (created on first `send`/`connect`/`on`,
//!   reconnected in place when an existing connection reports not-connected)
//! - Fan-out of every inbound result or error to all subscribers of its
//!   (endpoint, command) pair
//! - Per-subscriber failure isolation: a failing success callback becomes
//!   an error delivery to that same subscriber; a failing error delivery is
//!   logged and dropped, never propagated to siblings
//! - The unsubscribe matrix of [`off`](SocketRegistry::off) and global
//!   teardown via [`off_all`](SocketRegistry::off_all)
//!
//! Registries are explicitly constructed and injected into callers; there
//! is no process-wide instance.

use dashmap::DashMap;
use std::sync::Arc;

use crate::connection::{ConnectionFactory, SocketConnection};
use crate::endpoint::Endpoint;
use crate::error::{RelayLinkError, Result};
use crate::listener::CommandListener;
use crate::poster::TaskPoster;
use crate::subscriptions::{Subscription, SubscriptionTable};

/// Client-side multiplexing registry: many subscribers per command, many
/// commands per connection, one connection per endpoint.
///
/// All operations return immediately; command results arrive solely
/// through the registered [`CommandListener`]s. When a [`TaskPoster`] is
/// configured, every fan-out runs on its dispatch thread through the
/// ordered queue, so deliveries keep submission order and thread affinity.
///
/// # Example
/// ```rust,no_run
/// use relay_link::{FnListener, SocketRegistry, TaskPoster, WsConnectionFactory, WsOptions};
/// use std::sync::Arc;
///
/// # fn example() -> relay_link::Result<()> {
/// let factory = Arc::new(WsConnectionFactory::new(WsOptions::default())?);
/// let poster = Arc::new(TaskPoster::new());
/// let registry = SocketRegistry::with_poster(factory, poster);
///
/// let listener = Arc::new(FnListener::new().on_result(|payload| {
///     println!("ticker update: {}", payload);
///     Ok(())
/// }));
/// registry.on("ws://127.0.0.1:9000", "ticker", 1, listener)?;
/// # Ok(())
/// # }
/// ```
pub struct SocketRegistry {
    connections: DashMap<Endpoint, Arc<dyn SocketConnection>>,
    subscriptions: Arc<SubscriptionTable>,
    factory: Arc<dyn ConnectionFactory>,
    poster: Option<Arc<TaskPoster>>,
}

impl SocketRegistry {
    /// Create a registry that delivers callbacks inline on the
    /// connection's delivery thread.
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            connections: DashMap::new(),
            subscriptions: Arc::new(SubscriptionTable::new()),
            factory,
            poster: None,
        }
    }

    /// Create a registry that routes every fan-out through `poster`'s
    /// ordered queue.
    pub fn with_poster(factory: Arc<dyn ConnectionFactory>, poster: Arc<TaskPoster>) -> Self {
        Self {
            poster: Some(poster),
            ..Self::new(factory)
        }
    }

    /// Forward `payload` to `endpoint` on the channel `command_id`, and
    /// subscribe `listener` to that channel's responses under `tag`.
    ///
    /// Every send implicitly subscribes: the response to a request arrives
    /// through the same fan-out path as unsolicited pushes. Connection
    /// establishment is lazy and reconnection is in-place, as in
    /// [`connect`](SocketRegistry::connect).
    ///
    /// Fails synchronously only with [`RelayLinkError::InvalidTarget`];
    /// connection errors surface later through `listener.on_error`.
    pub fn send(
        &self,
        endpoint: &str,
        command_id: &str,
        tag: u64,
        payload: &str,
        listener: Arc<dyn CommandListener>,
    ) -> Result<()> {
        let endpoint = Endpoint::try_new(endpoint)?;
        let connection = self.ensure_connected(&endpoint);
        connection.send(payload);
        self.register(&endpoint, command_id, tag, listener, &connection);
        Ok(())
    }

    /// Ensure a live connection for `endpoint`. Idempotent: creates and
    /// connects on first use, reconnects the cached instance in place when
    /// it reports not-connected (existing subscriptions stay valid), and
    /// is a no-op when already connected.
    pub fn connect(&self, endpoint: &str) -> Result<()> {
        let endpoint = Endpoint::try_new(endpoint)?;
        self.ensure_connected(&endpoint);
        Ok(())
    }

    /// Subscribe `listener` to `(endpoint, command_id)` under `tag`,
    /// ensuring connectivity as in [`connect`](SocketRegistry::connect).
    ///
    /// A subscription with the same tag is replaced. The first subscriber
    /// for a pair installs the single dispatch adapter with the
    /// connection; the adapter resolves the subscriber set at delivery
    /// time, so subscribers added later are still reached.
    pub fn on(
        &self,
        endpoint: &str,
        command_id: &str,
        tag: u64,
        listener: Arc<dyn CommandListener>,
    ) -> Result<()> {
        let endpoint = Endpoint::try_new(endpoint)?;
        let connection = self.ensure_connected(&endpoint);
        self.register(&endpoint, command_id, tag, listener, &connection);
        Ok(())
    }

    /// Unsubscribe. Three cases:
    ///
    /// - `command_id` empty: full teardown of the endpoint — disconnect
    ///   its connection, forget it, and drop all of its subscriptions.
    /// - `tag == 0`: drop every subscriber of `(endpoint, command_id)` and
    ///   tell the connection to stop delivering that command; the
    ///   connection itself stays up for other commands.
    /// - `tag != 0`: drop only the matching subscription.
    pub fn off(&self, endpoint: &str, command_id: &str, tag: u64) -> Result<()> {
        let endpoint = Endpoint::try_new(endpoint)?;
        if command_id.is_empty() {
            if let Some((_, connection)) = self.connections.remove(&endpoint) {
                connection.disconnect();
            }
            self.subscriptions.remove_endpoint(&endpoint);
        } else if tag == 0 {
            if let Some(connection) = self.connections.get(&endpoint) {
                connection.off(command_id);
            }
            self.subscriptions.clear_command(&endpoint, command_id);
        } else {
            self.subscriptions.remove_tag(&endpoint, command_id, tag);
        }
        Ok(())
    }

    /// Disconnect and forget every connection and every subscription.
    /// After this the registry behaves as freshly constructed.
    pub fn off_all(&self) {
        for entry in self.connections.iter() {
            entry.value().disconnect();
        }
        self.connections.clear();
        self.subscriptions.clear();
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of subscribers currently registered for the pair. Returns 0
    /// for a malformed endpoint.
    pub fn subscriber_count(&self, endpoint: &str, command_id: &str) -> usize {
        match Endpoint::try_new(endpoint) {
            Ok(endpoint) => self.subscriptions.subscriber_count(&endpoint, command_id),
            Err(_) => 0,
        }
    }

    /// Get or create the connection for `endpoint` and make sure a connect
    /// is at least in flight. Creation races on a cold entry resolve inside
    /// the concurrent map, so at most one instance ever exists per
    /// endpoint.
    fn ensure_connected(&self, endpoint: &Endpoint) -> Arc<dyn SocketConnection> {
        let connection = self
            .connections
            .entry(endpoint.clone())
            .or_insert_with(|| {
                log::debug!("[relay-link] creating connection for {}", endpoint);
                self.factory.create(endpoint)
            })
            .clone();
        if !connection.is_connected() {
            connection.connect();
        }
        connection
    }

    /// Insert the subscription record and, on the first registration for
    /// the pair, install the fan-out adapter with the connection.
    fn register(
        &self,
        endpoint: &Endpoint,
        command_id: &str,
        tag: u64,
        listener: Arc<dyn CommandListener>,
        connection: &Arc<dyn SocketConnection>,
    ) {
        let first = self
            .subscriptions
            .insert(endpoint, command_id, Subscription { tag, listener });
        if first {
            let adapter = FanoutAdapter {
                endpoint: endpoint.clone(),
                command_id: command_id.to_string(),
                subscriptions: Arc::clone(&self.subscriptions),
                poster: self.poster.clone(),
            };
            connection.on(command_id, Arc::new(adapter));
        }
    }
}

/// One inbound event, owned so it can cross onto the poster thread.
enum Inbound {
    Result(String),
    Error(String),
}

/// The single per-(endpoint, command) listener installed with the
/// connection. Looks up the current subscriber set at delivery time and
/// fans the event out to all of them.
struct FanoutAdapter {
    endpoint: Endpoint,
    command_id: String,
    subscriptions: Arc<SubscriptionTable>,
    poster: Option<Arc<TaskPoster>>,
}

impl FanoutAdapter {
    fn dispatch(&self, event: Inbound) {
        match &self.poster {
            Some(poster) => {
                let endpoint = self.endpoint.clone();
                let command_id = self.command_id.clone();
                let subscriptions = Arc::clone(&self.subscriptions);
                poster.post_ordered(move || {
                    fan_out(&subscriptions, &endpoint, &command_id, &event);
                });
            }
            None => fan_out(&self.subscriptions, &self.endpoint, &self.command_id, &event),
        }
    }
}

impl CommandListener for FanoutAdapter {
    fn on_result(&self, payload: &str) -> std::result::Result<(), crate::error::CallbackError> {
        self.dispatch(Inbound::Result(payload.to_string()));
        Ok(())
    }

    fn on_error(&self, message: &str) -> std::result::Result<(), crate::error::CallbackError> {
        self.dispatch(Inbound::Error(message.to_string()));
        Ok(())
    }
}

/// Deliver one inbound event to every current subscriber of the pair.
///
/// Failures are isolated per subscriber: a failing success callback gets
/// the failure back as an error delivery; a failing error delivery gets
/// one more attempt carrying its own failure message, then the event is
/// dropped for that subscriber only. Iteration always continues with the
/// next subscriber.
fn fan_out(
    subscriptions: &SubscriptionTable,
    endpoint: &Endpoint,
    command_id: &str,
    event: &Inbound,
) {
    for sub in subscriptions.snapshot(endpoint, command_id) {
        let delivery = match event {
            Inbound::Result(payload) => sub.listener.on_result(payload),
            Inbound::Error(message) => sub.listener.on_error(message),
        };
        if let Err(err) = delivery {
            log::debug!(
                "[relay-link] {} (tag {} on {}/{})",
                RelayLinkError::CallbackFailure(err.message.clone()),
                sub.tag,
                endpoint,
                command_id
            );
            if let Err(second) = sub.listener.on_error(&err.message) {
                log::warn!(
                    "[relay-link] {} (tag {} on {}/{})",
                    RelayLinkError::DeliveryFailure(second.message),
                    sub.tag,
                    endpoint,
                    command_id
                );
            }
        }
    }
}
