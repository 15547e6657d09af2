//! Subscriber callback contract.
//!
//! Every subscriber registers a [`CommandListener`] — the capability
//! interface through which command results and errors reach it:
//!
//! - [`on_result`](CommandListener::on_result): a success payload arrived
//!   for the subscribed command
//! - [`on_error`](CommandListener::on_error): the command failed, or a
//!   prior delivery to this subscriber failed
//!
//! Both hooks report their own failures as explicit [`CallbackError`]
//! values. The registry converts a failed `on_result` into an `on_error`
//! delivery to the same subscriber and never lets one subscriber's failure
//! reach its siblings.

use std::fmt;
use std::sync::Arc;

use crate::error::CallbackError;

/// Receives command results and errors for one subscription.
pub trait CommandListener: Send + Sync {
    /// Called with the opaque payload of a successful result or push.
    fn on_result(&self, payload: &str) -> std::result::Result<(), CallbackError>;

    /// Called with a human-readable error message.
    fn on_error(&self, message: &str) -> std::result::Result<(), CallbackError>;
}

/// Type alias for the result callback of [`FnListener`].
pub type ResultCallback =
    Arc<dyn Fn(&str) -> std::result::Result<(), CallbackError> + Send + Sync>;

/// Type alias for the error callback of [`FnListener`].
pub type ErrorCallback =
    Arc<dyn Fn(&str) -> std::result::Result<(), CallbackError> + Send + Sync>;

/// Closure-backed [`CommandListener`] for call sites that don't want to
/// hand-write an impl.
///
/// Both callbacks are optional; a missing callback accepts the delivery
/// silently.
///
/// # Example
/// ```rust
/// use relay_link::FnListener;
///
/// let listener = FnListener::new()
///     .on_result(|payload| {
///         println!("result: {}", payload);
///         Ok(())
///     })
///     .on_error(|message| {
///         eprintln!("error: {}", message);
///         Ok(())
///     });
/// ```
#[derive(Clone, Default)]
pub struct FnListener {
    on_result: Option<ResultCallback>,
    on_error: Option<ErrorCallback>,
}

impl FnListener {
    /// Create a listener with no callbacks registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the result callback.
    pub fn on_result(
        mut self,
        f: impl Fn(&str) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    ) -> Self {
        self.on_result = Some(Arc::new(f));
        self
    }

    /// Register the error callback.
    pub fn on_error(
        mut self,
        f: impl Fn(&str) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for FnListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener")
            .field("on_result", &self.on_result.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl CommandListener for FnListener {
    fn on_result(&self, payload: &str) -> std::result::Result<(), CallbackError> {
        match &self.on_result {
            Some(cb) => cb(payload),
            None => Ok(()),
        }
    }

    fn on_error(&self, message: &str) -> std::result::Result<(), CallbackError> {
        match &self.on_error {
            Some(cb) => cb(message),
            None => Ok(()),
        }
    }
}
