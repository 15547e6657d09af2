//! Cooperative task poster: a single-consumer, time-sliced dispatch queue.
//!
//! Two independent FIFO queues feed one dedicated dispatch thread:
//!
//! - the **unordered** queue for fire-and-forget work
//! - the **ordered** queue for work that must execute in strict submission
//!   order relative to other ordered work (e.g. preserving
//!   send-then-response sequencing across producers)
//!
//! Each queue carries an activation flag that is `true` iff a drain cycle
//! for it is scheduled or running, so many concurrent producers coalesce
//! into a single scheduled cycle. A drain cycle pops and runs tasks until
//! its queue empties or the configured time budget is exceeded; on budget
//! exhaustion it re-schedules itself immediately so long-running backlogs
//! never monopolize the dispatch thread.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Default time budget for one drain cycle. Sized to one frame of a
/// 60 Hz update loop so a UI-bound dispatch thread never stalls visibly.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_millis(16);

/// Configuration for [`TaskPoster`].
#[derive(Debug, Clone)]
pub struct PosterConfig {
    /// Maximum wall-clock time one drain cycle may spend executing tasks
    /// before it yields the dispatch thread and re-schedules itself.
    pub time_budget: Duration,
}

impl Default for PosterConfig {
    fn default() -> Self {
        Self {
            time_budget: DEFAULT_TIME_BUDGET,
        }
    }
}

/// Wake-up messages for the dispatch thread. One message schedules one
/// drain cycle for the named queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Unordered,
    Ordered,
    Shutdown,
}

/// One queue plus its activation flag. Producers and the dispatch thread
/// only touch this under the mutex.
struct Pool {
    queue: VecDeque<Task>,
    /// `true` iff a drain cycle for this queue is scheduled or running.
    active: bool,
}

impl Pool {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            active: false,
        }
    }
}

/// Outcome of one drain cycle.
enum Cycle {
    /// Queue emptied; the activation flag was cleared under the lock.
    Drained,
    /// Time budget exhausted with work left; the flag stays set and the
    /// caller re-schedules.
    Exhausted,
}

/// Single-consumer, time-sliced dispatch queue.
///
/// `TaskPoster` owns a dedicated dispatch thread (a thread pool of one);
/// [`post`](TaskPoster::post) and [`post_ordered`](TaskPoster::post_ordered)
/// never block beyond the queue mutex and may be called from any thread.
///
/// A task that panics terminates its drain cycle — tasks queued behind it
/// wait for the next submission to re-schedule — but never the dispatch
/// thread itself; the next scheduled cycle still runs. The poster does not
/// otherwise intercept task failures: propagation policy belongs to the
/// task.
///
/// # Example
/// ```rust
/// use relay_link::TaskPoster;
///
/// let poster = TaskPoster::new();
/// poster.post(|| println!("on the dispatch thread"));
/// poster.post_ordered(|| println!("runs in submission order"));
/// ```
pub struct TaskPoster {
    unordered: Arc<Mutex<Pool>>,
    ordered: Arc<Mutex<Pool>>,
    wake_tx: UnboundedSender<Wake>,
    disposed: AtomicBool,
}

impl TaskPoster {
    /// Create a poster with the default time budget.
    pub fn new() -> Self {
        Self::with_config(PosterConfig::default())
    }

    /// Create a poster with an explicit configuration.
    pub fn with_config(config: PosterConfig) -> Self {
        let unordered = Arc::new(Mutex::new(Pool::new()));
        let ordered = Arc::new(Mutex::new(Pool::new()));
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();

        let thread_unordered = Arc::clone(&unordered);
        let thread_ordered = Arc::clone(&ordered);
        let thread_wake_tx = wake_tx.clone();
        thread::spawn(move || {
            dispatch_loop(
                wake_rx,
                thread_wake_tx,
                thread_unordered,
                thread_ordered,
                config.time_budget,
            );
        });

        Self {
            unordered,
            ordered,
            wake_tx,
            disposed: AtomicBool::new(false),
        }
    }

    /// Submit fire-and-forget work.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.submit(&self.unordered, Wake::Unordered, Box::new(task));
    }

    /// Submit work that executes in strict submission order relative to
    /// all other ordered work.
    pub fn post_ordered(&self, task: impl FnOnce() + Send + 'static) {
        self.submit(&self.ordered, Wake::Ordered, Box::new(task));
    }

    fn submit(&self, pool: &Mutex<Pool>, wake: Wake, task: Task) {
        if self.disposed.load(Ordering::SeqCst) {
            log::debug!("[relay-link] poster disposed; dropping submitted task");
            return;
        }
        let mut pool = pool.lock();
        pool.queue.push_back(task);
        // The flag is flipped under the same lock as the enqueue, so at
        // most one drain cycle is ever scheduled per queue.
        if !pool.active {
            pool.active = true;
            let _ = self.wake_tx.send(wake);
        }
    }

    /// Cancel any pending drain cycles, discard unexecuted tasks, and stop
    /// the dispatch thread. Discarded tasks are not run. Safe to call more
    /// than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut pool = self.unordered.lock();
            pool.queue.clear();
            pool.active = false;
        }
        {
            let mut pool = self.ordered.lock();
            pool.queue.clear();
            pool.active = false;
        }
        let _ = self.wake_tx.send(Wake::Shutdown);
    }
}

impl Default for TaskPoster {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskPoster {
    fn drop(&mut self) {
        // Best-effort shutdown of the dispatch thread.
        self.dispose();
    }
}

/// The dispatch thread: each wake message runs one drain cycle for the
/// named queue.
fn dispatch_loop(
    mut wake_rx: UnboundedReceiver<Wake>,
    wake_tx: UnboundedSender<Wake>,
    unordered: Arc<Mutex<Pool>>,
    ordered: Arc<Mutex<Pool>>,
    time_budget: Duration,
) {
    while let Some(wake) = wake_rx.blocking_recv() {
        let pool = match wake {
            Wake::Unordered => &unordered,
            Wake::Ordered => &ordered,
            Wake::Shutdown => return,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| run_cycle(pool, time_budget))) {
            Ok(Cycle::Drained) => {}
            Ok(Cycle::Exhausted) => {
                // The flag stays set: producers must not schedule a second
                // cycle while this re-scheduled one is pending.
                let _ = wake_tx.send(wake);
            }
            Err(_) => {
                // The cycle died mid-queue. Clear the flag so the next
                // submission schedules a fresh cycle for whatever is left.
                pool.lock().active = false;
                log::warn!(
                    "[relay-link] task panicked; terminating this drain cycle ({:?} queue)",
                    wake
                );
            }
        }
    }
}

/// One bounded execution pass over a queue.
fn run_cycle(pool: &Mutex<Pool>, time_budget: Duration) -> Cycle {
    let started = Instant::now();
    loop {
        let task = pool.lock().queue.pop_front();
        let task = match task {
            Some(task) => task,
            None => {
                // Check again, this time keeping the lock until the flag
                // is cleared: a producer may have enqueued between the pop
                // above and here, and it saw `active == true` so it did
                // not schedule a wake-up.
                let mut pool = pool.lock();
                match pool.queue.pop_front() {
                    Some(task) => task,
                    None => {
                        pool.active = false;
                        return Cycle::Drained;
                    }
                }
            }
        };
        task();
        if started.elapsed() >= time_budget {
            return Cycle::Exhausted;
        }
    }
}
