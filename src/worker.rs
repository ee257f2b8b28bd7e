//! Single-threaded execution context with delayed dispatch.
//!
//! A [`Worker`] owns one thread that runs posted tasks serially, ordered by deadline and then by
//! posting order. Tasks are tagged with a [`TaskToken`] so every pending task of a token can be
//! cancelled at once. Cancellation never interrupts a task that is already running.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::foundation::error::{RecorderError, RecorderResult};
use crate::foundation::lock;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identity of a (recurring) task, used for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskToken(u64);

impl TaskToken {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Pending {
    token: TaskToken,
    task: Task,
}

#[derive(Default)]
struct Queue {
    // (deadline, sequence) keeps same-deadline tasks in posting order.
    pending: BTreeMap<(Instant, u64), Pending>,
    seq: u64,
    quitting: bool,
}

struct Shared {
    name: String,
    queue: Mutex<Queue>,
    wake: Condvar,
    thread: OnceLock<ThreadId>,
}

/// Owner of the worker thread. Dropping it quits the thread and discards pending tasks.
pub struct Worker {
    handle: WorkerHandle,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a new worker thread named `name`.
    pub fn spawn(name: impl Into<String>) -> RecorderResult<Self> {
        let shared = Arc::new(Shared {
            name: name.into(),
            queue: Mutex::new(Queue::default()),
            wake: Condvar::new(),
            thread: OnceLock::new(),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name(shared.name.clone())
            .spawn(move || run(thread_shared))
            .map_err(|e| {
                RecorderError::Other(anyhow::Error::new(e).context("failed to spawn worker thread"))
            })?;
        let _ = shared.thread.set(thread.thread().id());

        tracing::debug!(worker = %shared.name, "worker started");
        Ok(Self {
            handle: WorkerHandle { shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Stop the thread after the currently running task (if any) and wait for it to exit.
    pub fn quit(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let mut queue = lock(&self.handle.shared.queue);
            queue.quitting = true;
        }
        self.handle.shared.wake.notify_all();

        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.handle.is_current() {
            // Joining ourselves would deadlock; the loop exits once this task returns.
            return;
        }
        if thread.join().is_err() {
            tracing::warn!(worker = %self.handle.shared.name, "worker thread panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.handle.shared.name)
            .finish()
    }
}

/// Cloneable handle to post tasks onto a [`Worker`] from any thread.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Run `task` as soon as possible. Returns `false` if the worker has quit.
    pub fn post(&self, token: TaskToken, task: impl FnOnce() + Send + 'static) -> bool {
        self.post_delayed(token, Duration::ZERO, task)
    }

    /// Run `task` after `delay`. Returns `false` if the worker has quit.
    pub fn post_delayed(
        &self,
        token: TaskToken,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> bool {
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or(now);
        {
            let mut queue = lock(&self.shared.queue);
            if queue.quitting {
                return false;
            }
            queue.seq += 1;
            let key = (deadline, queue.seq);
            queue.pending.insert(
                key,
                Pending {
                    token,
                    task: Box::new(task),
                },
            );
        }
        self.shared.wake.notify_all();
        true
    }

    /// Drop every pending task posted with `token`. Returns how many were removed.
    pub fn remove(&self, token: TaskToken) -> usize {
        let mut queue = lock(&self.shared.queue);
        let before = queue.pending.len();
        queue.pending.retain(|_, p| p.token != token);
        before - queue.pending.len()
    }

    /// Return `true` if a task posted with `token` is waiting to run.
    pub fn has_pending(&self, token: TaskToken) -> bool {
        lock(&self.shared.queue)
            .pending
            .values()
            .any(|p| p.token == token)
    }

    pub fn is_alive(&self) -> bool {
        !lock(&self.shared.queue).quitting
    }

    /// Return `true` when called from the worker thread itself.
    pub fn is_current(&self) -> bool {
        self.shared.thread.get() == Some(&std::thread::current().id())
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.shared.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn run(shared: Arc<Shared>) {
    let mut queue = lock(&shared.queue);
    loop {
        if queue.quitting {
            break;
        }

        let now = Instant::now();
        match queue.pending.keys().next().copied() {
            Some(key) if key.0 <= now => {
                let Some(pending) = queue.pending.remove(&key) else {
                    continue;
                };
                drop(queue);
                (pending.task)();
                queue = lock(&shared.queue);
            }
            Some((deadline, _)) => {
                queue = shared
                    .wake
                    .wait_timeout(queue, deadline - now)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0);
            }
            None => {
                queue = shared
                    .wake
                    .wait(queue)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
        }
    }

    let dropped = std::mem::take(&mut queue.pending);
    drop(queue);
    if !dropped.is_empty() {
        tracing::debug!(worker = %shared.name, dropped = dropped.len(), "worker quit with pending tasks");
    }
}
