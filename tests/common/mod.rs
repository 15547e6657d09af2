//! Shared test doubles: an in-memory `SocketConnection`, a factory that
//! records every creation, and a listener that records every delivery.

use relay_link::{
    CallbackError, CommandListener, ConnectionFactory, Endpoint, SocketConnection,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

/// In-memory connection: records calls, lets tests inject inbound events.
pub struct MockConnection {
    pub endpoint: String,
    connected: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    sent: Mutex<Vec<String>>,
    offs: Mutex<Vec<String>>,
    listeners: Mutex<HashMap<String, Arc<dyn CommandListener>>>,
}

impl MockConnection {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            offs: Mutex::new(Vec::new()),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Inject an inbound success event, as the transport would on a frame.
    pub fn emit_result(&self, command_id: &str, payload: &str) {
        let listener = self.listeners.lock().unwrap().get(command_id).cloned();
        if let Some(listener) = listener {
            let _ = listener.on_result(payload);
        }
    }

    /// Inject an inbound error event.
    pub fn emit_error(&self, command_id: &str, message: &str) {
        let listener = self.listeners.lock().unwrap().get(command_id).cloned();
        if let Some(listener) = listener {
            let _ = listener.on_error(message);
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn off_commands(&self) -> Vec<String> {
        self.offs.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Simulate a transport-level drop (e.g. the server went away).
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl SocketConnection for MockConnection {
    fn connect(&self) {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, payload: &str) {
        self.sent.lock().unwrap().push(payload.to_string());
    }

    fn on(&self, command_id: &str, listener: Arc<dyn CommandListener>) {
        self.listeners
            .lock()
            .unwrap()
            .insert(command_id.to_string(), listener);
    }

    fn off(&self, command_id: &str) {
        self.listeners.lock().unwrap().remove(command_id);
        self.offs.lock().unwrap().push(command_id.to_string());
    }
}

/// Factory recording every connection it hands out.
#[derive(Default)]
pub struct MockFactory {
    pub create_calls: AtomicUsize,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The n-th connection created, panicking when none exists yet.
    pub fn connection(&self, index: usize) -> Arc<MockConnection> {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn created(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for MockFactory {
    fn create(&self, endpoint: &Endpoint) -> Arc<dyn SocketConnection> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(MockConnection::new(endpoint.as_str()));
        self.connections.lock().unwrap().push(connection.clone());
        connection
    }
}

/// Listener recording deliveries; can be told to fail either hook.
#[derive(Default)]
pub struct RecordingListener {
    results: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    threads: Mutex<Vec<ThreadId>>,
    pub fail_results: AtomicBool,
    pub fail_errors: AtomicBool,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A listener whose success hook always fails.
    pub fn failing_results() -> Arc<Self> {
        let listener = Self::default();
        listener.fail_results.store(true, Ordering::SeqCst);
        Arc::new(listener)
    }

    pub fn results(&self) -> Vec<String> {
        self.results.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    /// Threads the success deliveries arrived on.
    pub fn delivery_threads(&self) -> Vec<ThreadId> {
        self.threads.lock().unwrap().clone()
    }
}

impl CommandListener for RecordingListener {
    fn on_result(&self, payload: &str) -> Result<(), CallbackError> {
        if self.fail_results.load(Ordering::SeqCst) {
            return Err(CallbackError::new(format!("choked on: {}", payload)));
        }
        self.results.lock().unwrap().push(payload.to_string());
        self.threads.lock().unwrap().push(std::thread::current().id());
        Ok(())
    }

    fn on_error(&self, message: &str) -> Result<(), CallbackError> {
        if self.fail_errors.load(Ordering::SeqCst) {
            return Err(CallbackError::new("error handler down"));
        }
        self.errors.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Route `log` output into the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `predicate` until it holds or `deadline` elapses.
pub fn wait_for(predicate: impl Fn() -> bool, deadline: std::time::Duration) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    predicate()
}
