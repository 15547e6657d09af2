//! The narrow interface between the registry and a low-level socket
//! implementation.
//!
//! The registry never performs I/O itself; it drives a [`SocketConnection`]
//! obtained from an injected [`ConnectionFactory`]. Subscribers are never
//! handed a connection reference — only the registry calls these methods.

use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::listener::CommandListener;

/// One logical endpoint: a persistent bidirectional connection multiplexing
/// many command channels.
///
/// Every method is non-blocking. `connect` and `send` only trigger
/// asynchronous work; completion and failures surface later through the
/// listeners registered with [`on`](SocketConnection::on). Implementations
/// must tolerate `connect` while already connecting or connected (no-op)
/// so the registry's reconnect-in-place path stays idempotent.
pub trait SocketConnection: Send + Sync {
    /// Begin connecting, or reconnect after a drop. No-op when already
    /// connected or a connect attempt is in flight.
    fn connect(&self);

    /// Tear the connection down. Pending outbound payloads are discarded.
    fn disconnect(&self);

    /// Whether the connection is currently established.
    fn is_connected(&self) -> bool;

    /// Forward one opaque payload. Never blocks; payloads queued before the
    /// connection is established are flushed once it is.
    fn send(&self, payload: &str);

    /// Register the single delivery listener for a command id, replacing
    /// any previous one.
    fn on(&self, command_id: &str, listener: Arc<dyn CommandListener>);

    /// Stop delivering a command id.
    fn off(&self, command_id: &str);
}

/// Creates connections for endpoints the registry sees for the first time.
///
/// Injected into [`SocketRegistry`](crate::registry::SocketRegistry) so the
/// transport is chosen at construction time rather than baked in.
pub trait ConnectionFactory: Send + Sync {
    /// Create an unconnected connection for `endpoint`.
    fn create(&self, endpoint: &Endpoint) -> Arc<dyn SocketConnection>;
}
