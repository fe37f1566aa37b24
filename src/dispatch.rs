//! Callback delivery contexts.
//!
//! Completion callbacks can be marshaled onto an execution context instead
//! of running on whichever thread finished the request. A context is
//! anything that accepts posted tasks; [`ThreadDispatcher`] runs them on a
//! dedicated worker thread. Applications with a UI-like foreground loop
//! register it once via [`register_foreground_context`] and opt in per
//! request.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;

/// A callback invocation posted to a dispatch context.
pub type DispatchTask = Box<dyn FnOnce() + Send>;

/// An execution context that runs posted tasks.
pub trait DispatchContext: Send + Sync {
    /// Queue `task` for execution on this context.
    ///
    /// Must not block the posting thread on the task's completion.
    fn post(&self, task: DispatchTask);
}

enum DispatcherOp {
    Run(DispatchTask),
    Shutdown,
}

struct DispatcherShared {
    queue: Mutex<VecDeque<DispatcherOp>>,
    ready: Condvar,
}

impl DispatcherShared {
    fn push(&self, op: DispatcherOp) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(op);
        self.ready.notify_one();
    }
}

/// Dispatch context backed by a dedicated worker thread.
///
/// Tasks run in posting order. Dropping the dispatcher shuts the worker
/// down after the tasks already queued have run.
pub struct ThreadDispatcher {
    shared: Arc<DispatcherShared>,
}

impl ThreadDispatcher {
    /// Spawn the worker thread.
    pub fn spawn(name: impl Into<String>) -> Self {
        let shared = Arc::new(DispatcherShared {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        });
        let loop_shared = shared.clone();
        thread::Builder::new()
            .name(name.into())
            .spawn(move || run_loop(loop_shared))
            .expect("failed to spawn dispatcher thread");
        Self { shared }
    }
}

impl DispatchContext for ThreadDispatcher {
    fn post(&self, task: DispatchTask) {
        self.shared.push(DispatcherOp::Run(task));
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        self.shared.push(DispatcherOp::Shutdown);
    }
}

fn run_loop(shared: Arc<DispatcherShared>) {
    loop {
        let op = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                match queue.pop_front() {
                    Some(op) => break op,
                    None => queue = shared.ready.wait(queue).unwrap(),
                }
            }
        };
        match op {
            DispatcherOp::Run(task) => task(),
            DispatcherOp::Shutdown => return,
        }
    }
}

static FOREGROUND: OnceLock<Box<dyn DispatchContext>> = OnceLock::new();

/// Register the process-wide foreground context used for requests that ask
/// for foreground delivery.
///
/// # Panics
///
/// Panics if a foreground context has already been registered.
pub fn register_foreground_context(context: impl DispatchContext + 'static) {
    if FOREGROUND.set(Box::new(context)).is_err() {
        panic!("Foreground context already registered");
    }
}

pub(crate) fn foreground_context() -> Option<&'static dyn DispatchContext> {
    FOREGROUND.get().map(|ctx| &**ctx)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn runs_tasks_in_posting_order_off_the_posting_thread() {
        let dispatcher = ThreadDispatcher::spawn("test-dispatcher");
        let (tx, rx) = mpsc::channel();
        let posting_thread = thread::current().id();
        for i in 0..4usize {
            let tx = tx.clone();
            dispatcher.post(Box::new(move || {
                tx.send((i, thread::current().id())).unwrap();
            }));
        }
        for expected in 0..4usize {
            let (i, thread_id) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(i, expected);
            assert_ne!(thread_id, posting_thread);
        }
    }

    #[test]
    fn drop_runs_already_queued_tasks() {
        static RAN: AtomicUsize = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        {
            let dispatcher = ThreadDispatcher::spawn("test-dispatcher-drop");
            for _ in 0..3 {
                let tx = tx.clone();
                dispatcher.post(Box::new(move || {
                    RAN.fetch_add(1, Ordering::SeqCst);
                    tx.send(()).unwrap();
                }));
            }
        }
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(RAN.load(Ordering::SeqCst), 3);
    }
}
