//! relay-link: client-side multiplexing over persistent socket connections.
//!
//! Many independent subscribers share a small number of underlying
//! connections — one per endpoint. A [`SocketRegistry`] owns connection
//! lifecycle and routes every inbound command result or error to the
//! subscriber set registered for its (endpoint, command) pair, with
//! per-subscriber failure isolation. A [`TaskPoster`] optionally carries
//! the deliveries onto a single dispatch thread in time-sliced drain
//! cycles so callbacks never block producers and a backlog never
//! monopolizes the delivery thread.
//!
//! The low-level socket is behind the narrow [`SocketConnection`] seam;
//! [`WsConnection`] is the bundled WebSocket implementation.
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_link::{FnListener, SocketRegistry, TaskPoster, WsConnectionFactory, WsOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> relay_link::Result<()> {
//! let factory = Arc::new(WsConnectionFactory::new(WsOptions::default())?);
//! let poster = Arc::new(TaskPoster::new());
//! let registry = SocketRegistry::with_poster(factory, poster);
//!
//! // Two parties interested in the same push channel.
//! let ui = Arc::new(FnListener::new().on_result(|payload| {
//!     println!("ui: {}", payload);
//!     Ok(())
//! }));
//! let audit = Arc::new(FnListener::new().on_result(|payload| {
//!     println!("audit: {}", payload);
//!     Ok(())
//! }));
//! registry.on("ws://127.0.0.1:9000", "ticker", 1, ui)?;
//! registry.on("ws://127.0.0.1:9000", "ticker", 2, audit)?;
//!
//! // Later: drop one subscriber, keep the other.
//! registry.off("ws://127.0.0.1:9000", "ticker", 1)?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod poster;
pub mod registry;
mod subscriptions;
pub mod ws;

pub use connection::{ConnectionFactory, SocketConnection};
pub use endpoint::Endpoint;
pub use error::{CallbackError, RelayLinkError, Result};
pub use listener::{CommandListener, ErrorCallback, FnListener, ResultCallback};
pub use poster::{PosterConfig, TaskPoster, DEFAULT_TIME_BUDGET};
pub use registry::SocketRegistry;
pub use ws::{CommandFrame, WsConnection, WsConnectionFactory, WsOptions};
